// ==========================================
// MEDIA SESSION BRIDGE
// ==========================================
// Connects the playback controller to the host's system media controls
// (lock screen, hardware keys, desktop now-playing widgets).
//
// Two directions:
// - outbound: current episode metadata, playing/paused, and periodic
//   {duration, rate, position} for the OS scrubber
// - inbound: transport actions from the host, delegated to the
//   PlaybackController's public methods
//
// The bridge keeps no playback state of its own. When the host has no
// media-control surface every call is a no-op.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::player::controller::PlaybackController;
use crate::player::episode::Episode;

/// Square artwork sizes offered to the host
pub const ARTWORK_SIZES: [u32; 6] = [96, 128, 192, 256, 384, 512];

#[derive(Debug, Clone, PartialEq)]
pub struct Artwork {
    pub src: String,
    /// e.g. "256x256"
    pub sizes: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Vec<Artwork>,
}

impl MediaMetadata {
    pub fn for_episode(episode: &Episode) -> Self {
        let artwork = episode
            .image_url
            .as_ref()
            .map(|src| {
                ARTWORK_SIZES
                    .iter()
                    .map(|size| Artwork {
                        src: src.clone(),
                        sizes: format!("{}x{}", size, size),
                        mime_type: guess_image_type(src).to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        MediaMetadata {
            title: episode.title.clone(),
            artist: episode.podcast_title.clone(),
            album: episode.podcast_title.clone(),
            artwork,
        }
    }
}

fn guess_image_type(src: &str) -> &'static str {
    let path = src.split(['?', '#']).next().unwrap_or(src).to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Scrubber information for the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionState {
    pub duration: f64,
    pub playback_rate: f64,
    pub position: f64,
}

/// Transport actions a host can send
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaAction {
    Play,
    Pause,
    PreviousTrack,
    NextTrack,
    /// Offset in seconds; None means the configured skip step
    SeekBackward(Option<f64>),
    SeekForward(Option<f64>),
    /// Absolute position in seconds
    SeekTo(f64),
}

impl MediaAction {
    /// Whether the action can start episode audio
    pub fn starts_playback(&self) -> bool {
        matches!(self, Self::Play | Self::NextTrack | Self::PreviousTrack)
    }
}

/// A host's system-level media-control surface
pub trait MediaControlSurface: Send + Sync {
    fn set_metadata(&self, metadata: Option<&MediaMetadata>);

    fn set_playing(&self, playing: bool);

    fn set_position_state(&self, state: PositionState);

    /// Gives the host a channel to deliver transport actions on
    fn attach_actions(&self, actions: mpsc::UnboundedSender<MediaAction>);
}

#[derive(Clone, Default)]
pub struct MediaSessionBridge {
    surface: Option<Arc<dyn MediaControlSurface>>,
}

impl MediaSessionBridge {
    pub fn new(surface: Option<Arc<dyn MediaControlSurface>>) -> Self {
        MediaSessionBridge { surface }
    }

    /// Bridge for hosts without media controls
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.surface.is_some()
    }

    pub fn publish_episode(&self, episode: &Episode) {
        if let Some(surface) = &self.surface {
            surface.set_metadata(Some(&MediaMetadata::for_episode(episode)));
        }
    }

    pub fn publish_playing(&self, playing: bool) {
        if let Some(surface) = &self.surface {
            surface.set_playing(playing);
        }
    }

    pub fn publish_position(&self, duration: Option<f64>, rate: f64, position: f64) {
        let (Some(surface), Some(duration)) = (&self.surface, duration) else {
            return;
        };
        // Hosts reject position > duration
        surface.set_position_state(PositionState {
            duration,
            playback_rate: rate,
            position: position.clamp(0.0, duration),
        });
    }

    pub fn clear(&self) {
        if let Some(surface) = &self.surface {
            surface.set_metadata(None);
            surface.set_playing(false);
        }
    }

    /// Wires the host's actions to `controller`. Returns None when the
    /// host has no media-control surface.
    pub fn connect(&self, controller: &PlaybackController) -> Option<JoinHandle<()>> {
        let surface = self.surface.as_ref()?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        surface.attach_actions(tx);

        let controller = controller.downgrade();
        Some(tokio::spawn(async move {
            while let Some(action) = rx.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if let Err(e) = apply_action(&controller, action).await {
                    tracing::warn!("Media action {:?} failed: {}", action, e);
                }
            }
        }))
    }
}

/// Maps one host action onto the controller's public contract
pub async fn apply_action(controller: &PlaybackController, action: MediaAction) -> Result<()> {
    tracing::debug!("Media action: {:?}", action);
    match action {
        MediaAction::Play => controller.play().await,
        MediaAction::Pause => {
            controller.pause();
            Ok(())
        }
        MediaAction::PreviousTrack => controller.previous_episode().await.map(|_| ()),
        MediaAction::NextTrack => controller.next_episode().await.map(|_| ()),
        MediaAction::SeekBackward(offset) => {
            controller.skip_backward(offset.unwrap_or_else(|| controller.skip_step()))
        }
        MediaAction::SeekForward(offset) => {
            controller.skip_forward(offset.unwrap_or_else(|| controller.skip_step()))
        }
        MediaAction::SeekTo(position) => controller.seek_absolute(position),
    }
}
