// Main entry point for the podplay terminal player
// Wires config, logging, storage and both controllers, then hands the
// terminal to the TUI.

use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podplay::config::EngineConfig;
use podplay::persistence::{FileStorage, PersistenceStore};
use podplay::player::audio::RodioBackend;
use podplay::player::controller::PlaybackController;
use podplay::player::episode::Episode;
use podplay::player::media_session::{MediaControlSurface, MediaSessionBridge};
use podplay::stream::api::HttpStreamApi;
use podplay::stream::controller::StreamingController;
use podplay::ui::{PodplayApp, TerminalSurface};

#[derive(Debug, Parser)]
#[command(name = "podplay", version, about = "Terminal podcast and live radio player")]
struct Cli {
    /// JSON file with the episode list to play
    #[arg(short, long)]
    episodes: Option<PathBuf>,

    /// Config file (defaults to <config dir>/podplay/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Don't set the terminal title or listen for media keys
    #[arg(long)]
    no_media_keys: bool,
}

fn init_logging(data_dir: &Path) -> anyhow::Result<()> {
    // The TUI owns the terminal, so logs go to a file
    fs::create_dir_all(data_dir)?;
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("podplay.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podplay=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();
    Ok(())
}

fn load_episodes(path: Option<&Path>) -> anyhow::Result<Vec<Episode>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read episode list {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Invalid episode list {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Suppress ALSA error messages that pollute TUI
    std::env::set_var("ALSA_PCM_NO_MMAP", "1");

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    let data_dir = config.storage.resolved_data_dir()?;
    init_logging(&data_dir)?;
    tracing::info!("Starting podplay, data in {}", data_dir.display());

    let episodes = load_episodes(cli.episodes.as_deref())?;
    let store = PersistenceStore::new(
        Arc::new(FileStorage::new(data_dir.join("sessions"))?),
        config.storage.session_ttl(),
    );

    let surface = (!cli.no_media_keys).then(|| Arc::new(TerminalSurface::new()));
    let bridge = MediaSessionBridge::new(
        surface
            .clone()
            .map(|surface| surface as Arc<dyn MediaControlSurface>),
    );

    let timeout = config.stream.request_timeout();
    let player = PlaybackController::new(
        RodioBackend::spawn(timeout)?,
        store.clone(),
        bridge.clone(),
        config.playback.clone(),
    );
    player.initialize();
    let _media_actions = bridge.connect(&player);

    let stream = StreamingController::new(
        Arc::new(HttpStreamApi::new(&config.stream)?),
        RodioBackend::spawn(timeout)?,
        store,
        config.stream.clone(),
    );
    {
        // Resolution can be slow; don't hold up the first frame
        let stream = stream.clone();
        tokio::spawn(async move {
            if let Err(e) = stream.initialize().await {
                tracing::warn!("Live stream unavailable: {}", e);
            }
        });
    }

    let mut app = PodplayApp::new(player, stream, episodes, surface);
    app.run().await?;

    tracing::info!("Exiting");
    Ok(())
}
