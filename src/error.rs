// ==========================================
// ERROR TYPES
// ==========================================
// Every fallible engine operation returns `Result<T>`. The first five
// variants are the failure kinds the controllers reason about; the rest
// wrap lower-level errors so `?` works at the edges.

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// Audio resource unreachable or unplayable
    #[error("Failed to load audio: {0}")]
    Load(String),

    /// The platform refused to start playback
    #[error("Playback was blocked: {0}")]
    PlaybackRejected(String),

    /// Stream resolution or metadata fetch failed
    #[error("Network error: {0}")]
    Network(String),

    /// Endpoint returned something we could not decode
    #[error("Malformed response: {0}")]
    Parse(String),

    /// Cleanup of an audio resource failed (logged, never surfaced)
    #[error("Resource teardown failed: {0}")]
    ResourceTeardown(String),

    /// A newer load request replaced this one before it completed
    #[error("Load superseded by a newer request")]
    Superseded,

    /// No audio source is assigned
    #[error("No audio source loaded")]
    NoSource,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PlayerError {
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::PlaybackRejected(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn teardown(msg: impl Into<String>) -> Self {
        Self::ResourceTeardown(msg.into())
    }

    /// Failures that must reach the user through the notification contract
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Load(_) | Self::PlaybackRejected(_) | Self::Network(_) | Self::Http(_)
        )
    }

    /// Short machine-readable label used in error notifications
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Load(_) | Self::NoSource => ErrorKind::Load,
            Self::PlaybackRejected(_) => ErrorKind::PlaybackRejected,
            Self::Network(_) | Self::Http(_) => ErrorKind::Network,
            Self::Parse(_) | Self::Json(_) => ErrorKind::Parse,
            Self::ResourceTeardown(_) => ErrorKind::ResourceTeardown,
            Self::Superseded => ErrorKind::Superseded,
            Self::Io(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Load,
    PlaybackRejected,
    Network,
    Parse,
    ResourceTeardown,
    Superseded,
    Internal,
}
