use thiserror::Error;

/// Ошибки движка связи камера/монитор
#[derive(Debug, Error)]
pub enum LinkError {
    /// Signaling backend missing or the caller is not signed in.
    #[error("signaling backend is not configured or not authenticated")]
    NotConfigured,

    #[error("camera hardware error: {0}")]
    Hardware(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("signaling write failed: {0}")]
    Signaling(String),

    #[error("local archive error: {0}")]
    Archive(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("link engine has shut down")]
    EngineClosed,
}

impl From<webrtc::Error> for LinkError {
    fn from(err: webrtc::Error) -> Self {
        LinkError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Signaling(format!("malformed document: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
