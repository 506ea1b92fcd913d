//! Notification contract between the engine and its display surfaces.
//!
//! Controllers publish events on broadcast channels; any number of surfaces
//! (main bar, mini player, list highlighting, analytics) subscribe without the
//! engine knowing how they render. State itself is pulled through the
//! controllers' query methods; events only say that something changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ErrorKind, PlayerError};
use crate::player::episode::{Episode, PodcastContext};
use crate::player::speed::PlaybackSpeed;
use crate::stream::metadata::MetadataSnapshot;

const CHANNEL_CAPACITY: usize = 64;

/// Broadcast sender that tolerates having no subscribers
#[derive(Debug, Clone)]
pub struct Notifier<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Notifier<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Notifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: T) {
        // Err only means nobody is listening right now
        let _ = self.tx.send(event);
    }
}

/// Lifecycle of on-demand playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    Error,
}

/// Lifecycle of the live stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    ResolvingUrl,
    Ready,
    Connecting,
    Playing,
    Buffering,
    /// User paused: connection released and URL dropped
    Paused,
    Error,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Playing | Self::Buffering)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlayerEvent {
    StateChanged(PlaybackStatus),
    EpisodeChanged(Option<Episode>),
    Progress { position: f64, duration: Option<f64> },
    VolumeChanged { volume: f64, muted: bool },
    SpeedChanged(PlaybackSpeed),
    Error { kind: ErrorKind, message: String },
}

impl PlayerEvent {
    pub fn error(err: &PlayerError) -> Self {
        PlayerEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    ConnectionChanged(ConnectionState),
    /// Free-form status line ("Buffering...", "Unable to refresh", ...)
    Status(String),
    NowPlayingChanged(MetadataSnapshot),
    MetadataRefreshed(DateTime<Utc>),
    VolumeChanged { volume: f64, muted: bool },
    /// A hard failure the user can retry by hand
    RetryPrompt(String),
}

/// Consumed by an external analytics subscriber which owns dedupe and delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnalyticsEvent {
    EpisodeStarted {
        episode: Episode,
        podcast: PodcastContext,
    },
    EpisodeDownloaded {
        episode: Episode,
        podcast: PodcastContext,
    },
}
