//! The media subsystem seam.
//!
//! Controllers never touch an audio device directly; they drive a
//! [`MediaBackend`] and react to the [`MediaEvent`]s it reports. The
//! production implementation is [`crate::player::audio::RodioBackend`].

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

/// What kind of source is being assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A finite episode file: seekable, has a duration
    OnDemand,
    /// A continuous stream: no duration, no seeking
    Live,
}

/// What the backend learned while loading a source
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MediaInfo {
    pub duration: Option<f64>,
}

/// Asynchronous notifications from the media subsystem
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Sub-second position report while playing
    Progress { position: f64, duration: Option<f64> },
    /// Playback stalled waiting for data
    Buffering,
    /// Data arrived again after a stall
    Resumed,
    /// Natural end of media
    Ended,
    /// Decode or network failure mid-playback
    Error(String),
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Assigns a new source, replacing whatever was loaded.
    ///
    /// The source starts paused. If another `load` or `release` happens
    /// before this one finishes, it returns `PlayerError::Superseded` and
    /// leaves the output alone.
    async fn load(&self, url: &str, kind: SourceKind) -> Result<MediaInfo>;

    /// Starts or resumes output. Fails with `PlaybackRejected` when the
    /// platform refuses to start audio.
    async fn play(&self) -> Result<()>;

    fn pause(&self);

    /// Drops the source and stops all buffering.
    fn release(&self) -> Result<()>;

    /// Absolute seek in seconds
    fn seek(&self, position: f64) -> Result<()>;

    fn position(&self) -> f64;

    fn set_volume(&self, volume: f64);

    fn set_muted(&self, muted: bool);

    fn set_rate(&self, rate: f64);

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;
}
