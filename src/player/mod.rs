pub mod audio;
pub mod backend;
pub mod controller;
pub mod episode;
pub mod media_session;
pub mod speed;

pub use backend::{MediaBackend, MediaEvent, MediaInfo, SourceKind};
pub use controller::{LoadOutcome, PlaybackController, PlaybackSession, SessionSnapshot};
pub use episode::{Episode, Playlist, PodcastContext};
pub use media_session::{MediaAction, MediaControlSurface, MediaSessionBridge};
pub use speed::PlaybackSpeed;
