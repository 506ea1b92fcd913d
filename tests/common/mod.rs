//! Shared fakes for the integration tests: a scriptable media backend,
//! scriptable stream endpoints and a recording media-control surface.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

use podplay::config::{PlaybackConfig, StreamConfig};
use podplay::error::{PlayerError, Result};
use podplay::persistence::PersistenceStore;
use podplay::player::backend::{MediaBackend, MediaEvent, MediaInfo, SourceKind};
use podplay::player::controller::PlaybackController;
use podplay::player::episode::Episode;
use podplay::player::media_session::{
    MediaAction, MediaControlSurface, MediaMetadata, MediaSessionBridge, PositionState,
};
use podplay::stream::api::StreamEndpoints;
use podplay::stream::controller::StreamingController;
use podplay::stream::metadata::{CurrentShow, MetadataSnapshot, Station};

// ===== Media backend =====

#[derive(Default)]
struct BackendState {
    calls: Vec<String>,
    source: Option<String>,
    playing: bool,
    position: f64,
    volume: f64,
    muted: bool,
    rate: f64,
    releases: usize,
    duration: Option<f64>,
    gates: HashMap<String, Arc<Notify>>,
    failing_urls: HashSet<String>,
    reject_play: bool,
}

pub struct FakeBackend {
    state: Mutex<BackendState>,
    events: broadcast::Sender<MediaEvent>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(FakeBackend {
            state: Mutex::new(BackendState {
                volume: 1.0,
                rate: 1.0,
                duration: Some(600.0),
                ..Default::default()
            }),
            events,
        })
    }

    /// Loads of `url` hang until `open_gate(url)` is called
    pub fn gate(&self, url: &str) {
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(url.to_string(), Arc::new(Notify::new()));
    }

    pub fn open_gate(&self, url: &str) {
        if let Some(gate) = self.state.lock().unwrap().gates.get(url) {
            gate.notify_one();
        }
    }

    pub fn fail_loads_of(&self, url: &str) {
        self.state.lock().unwrap().failing_urls.insert(url.to_string());
    }

    pub fn reject_play(&self, reject: bool) {
        self.state.lock().unwrap().reject_play = reject;
    }

    pub fn set_duration(&self, duration: Option<f64>) {
        self.state.lock().unwrap().duration = duration;
    }

    pub fn set_position(&self, position: f64) {
        self.state.lock().unwrap().position = position;
    }

    pub fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn source(&self) -> Option<String> {
        self.state.lock().unwrap().source.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    pub fn volume(&self) -> f64 {
        self.state.lock().unwrap().volume
    }

    pub fn muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().unwrap().rate
    }

    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn load(&self, url: &str, kind: SourceKind) -> Result<MediaInfo> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("load {}", url));
            state.source = Some(url.to_string());
            state.playing = false;
            state.position = 0.0;
            state.gates.get(url).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let state = self.state.lock().unwrap();
        if state.failing_urls.contains(url) {
            return Err(PlayerError::load(format!("404 for {}", url)));
        }
        let duration = match kind {
            SourceKind::OnDemand => state.duration,
            SourceKind::Live => None,
        };
        Ok(MediaInfo { duration })
    }

    async fn play(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("play".to_string());
        if state.reject_play {
            return Err(PlayerError::rejected("autoplay blocked"));
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push("pause".to_string());
        state.playing = false;
    }

    fn release(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("release".to_string());
        state.releases += 1;
        state.source = None;
        state.playing = false;
        Ok(())
    }

    fn seek(&self, position: f64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("seek {}", position));
        state.position = position;
        Ok(())
    }

    fn position(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().unwrap().volume = volume;
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().unwrap().muted = muted;
    }

    fn set_rate(&self, rate: f64) {
        self.state.lock().unwrap().rate = rate;
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }
}

// ===== Stream endpoints =====

pub struct FakeEndpoints {
    resolutions: AtomicUsize,
    metadata_calls: AtomicUsize,
    fail_resolution: AtomicBool,
    resolve_gate: Mutex<Option<Arc<Notify>>>,
    metadata_gate: Mutex<Option<Arc<Notify>>>,
    metadata: Mutex<VecDeque<std::result::Result<MetadataSnapshot, String>>>,
    fallback: Mutex<MetadataSnapshot>,
}

impl FakeEndpoints {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeEndpoints {
            resolutions: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            fail_resolution: AtomicBool::new(false),
            resolve_gate: Mutex::new(None),
            metadata_gate: Mutex::new(None),
            metadata: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(snapshot("Opening Theme")),
        })
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn fail_resolution(&self, fail: bool) {
        self.fail_resolution.store(fail, Ordering::SeqCst);
    }

    /// Resolution hangs until the returned Notify is signalled
    pub fn gate_resolution(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.resolve_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn gate_metadata(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.metadata_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Queued responses are served first; afterwards the last snapshot repeats
    pub fn push_metadata(&self, response: std::result::Result<MetadataSnapshot, String>) {
        self.metadata.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl StreamEndpoints for FakeEndpoints {
    async fn resolve_stream_url(&self) -> Result<String> {
        let n = self.resolutions.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.resolve_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_resolution.load(Ordering::SeqCst) {
            return Err(PlayerError::network("stream server unreachable"));
        }
        Ok(format!("https://radio.test/live-{}.mp3", n))
    }

    async fn fetch_metadata(&self) -> Result<MetadataSnapshot> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.metadata_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let next = self.metadata.lock().unwrap().pop_front();
        match next {
            Some(Ok(snapshot)) => {
                *self.fallback.lock().unwrap() = snapshot.clone();
                Ok(snapshot)
            }
            Some(Err(message)) => Err(PlayerError::network(message)),
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }
}

// ===== Media-control surface =====

#[derive(Default)]
pub struct RecordingSurface {
    pub titles: Mutex<Vec<Option<String>>>,
    pub artwork_counts: Mutex<Vec<usize>>,
    pub playing: Mutex<Vec<bool>>,
    pub positions: Mutex<Vec<PositionState>>,
    actions: Mutex<Option<mpsc::UnboundedSender<MediaAction>>>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn send(&self, action: MediaAction) {
        let actions = self.actions.lock().unwrap();
        actions
            .as_ref()
            .expect("bridge not connected")
            .send(action)
            .expect("action channel closed");
    }

    pub fn last_title(&self) -> Option<String> {
        self.titles.lock().unwrap().last().cloned().flatten()
    }

    pub fn last_playing(&self) -> Option<bool> {
        self.playing.lock().unwrap().last().copied()
    }
}

impl MediaControlSurface for RecordingSurface {
    fn set_metadata(&self, metadata: Option<&MediaMetadata>) {
        self.titles.lock().unwrap().push(metadata.map(|m| m.title.clone()));
        if let Some(metadata) = metadata {
            self.artwork_counts.lock().unwrap().push(metadata.artwork.len());
        }
    }

    fn set_playing(&self, playing: bool) {
        self.playing.lock().unwrap().push(playing);
    }

    fn set_position_state(&self, state: PositionState) {
        self.positions.lock().unwrap().push(state);
    }

    fn attach_actions(&self, actions: mpsc::UnboundedSender<MediaAction>) {
        *self.actions.lock().unwrap() = Some(actions);
    }
}

// ===== Builders =====

pub fn episode(n: usize) -> Episode {
    Episode::new(
        format!("ep{}", n),
        format!("Episode {}", n),
        format!("https://cdn.test/ep{}.mp3", n),
        "pod1",
        "The Test Podcast",
    )
    .with_duration(600.0)
}

pub fn episodes(count: usize) -> Vec<Episode> {
    (1..=count).map(episode).collect()
}

pub fn snapshot(title: &str) -> MetadataSnapshot {
    MetadataSnapshot {
        station: Station {
            name: "KPOD".to_string(),
            image: String::new(),
        },
        current: CurrentShow {
            title: title.to_string(),
            artist: "House Band".to_string(),
            show: "Morning Mix".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn fast_playback_config() -> PlaybackConfig {
    PlaybackConfig {
        auto_advance_delay_ms: 50,
        ..PlaybackConfig::default()
    }
}

pub fn player_with(backend: Arc<FakeBackend>, store: PersistenceStore) -> PlaybackController {
    PlaybackController::new(
        backend,
        store,
        MediaSessionBridge::unavailable(),
        fast_playback_config(),
    )
}

pub fn player(backend: Arc<FakeBackend>) -> PlaybackController {
    player_with(backend, PersistenceStore::in_memory())
}

pub fn stream_config() -> StreamConfig {
    StreamConfig {
        metadata_poll_interval_ms: 60_000,
        ..StreamConfig::default()
    }
}

pub fn streamer(
    api: Arc<FakeEndpoints>,
    backend: Arc<FakeBackend>,
    store: PersistenceStore,
) -> StreamingController {
    StreamingController::new(api, backend, store, stream_config())
}

/// Polls `check` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Lets spawned tasks run until `fut` is parked on a gate
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub async fn spawn_and_settle<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handle = tokio::spawn(fut);
    settle().await;
    handle
}
