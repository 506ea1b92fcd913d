//! Podcast playback engine: on-demand episode playlists, a live stream
//! with metadata polling, session persistence and a system media-control
//! bridge.

pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod persistence;
pub mod player;
pub mod scheduler;
pub mod stream;
pub mod ui;

pub use config::EngineConfig;
pub use error::{PlayerError, Result};
pub use events::{AnalyticsEvent, ConnectionState, PlaybackStatus, PlayerEvent, StreamEvent};
pub use persistence::PersistenceStore;
pub use player::{Episode, PlaybackController, PlaybackSpeed};
pub use stream::StreamingController;
