//! Error types for GhostTap

use thiserror::Error;

/// Result type alias for GhostTap operations
pub type Result<T> = std::result::Result<T, Error>;

/// GhostTap error type
#[derive(Error, Debug)]
pub enum Error {
    // Consent errors
    #[error("Record permission denied")]
    PermissionDenied,

    #[error("Capture consent denied")]
    ConsentDenied,

    #[error("Consent request already pending")]
    ConsentPending,

    #[error("Portal error: {0}")]
    Portal(String),

    // Session errors
    #[error("Capture session already streaming")]
    AlreadyStreaming,

    #[error("Playback capture not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("Failed to open capture: {0}")]
    CaptureOpen(String),

    #[error("Capture read failed: {0}")]
    CaptureReadFailure(String),

    #[error("PipeWire error: {0}")]
    PipeWire(String),

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the user (or the OS on their behalf) refused capture.
    ///
    /// These end a start attempt and are never retried automatically.
    pub fn is_user_denial(&self) -> bool {
        matches!(self, Error::PermissionDenied | Error::ConsentDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_classification() {
        assert!(Error::PermissionDenied.is_user_denial());
        assert!(Error::ConsentDenied.is_user_denial());
        assert!(!Error::AlreadyStreaming.is_user_denial());
        assert!(!Error::UnsupportedPlatform("old kernel".into()).is_user_denial());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::CaptureReadFailure("EIO".into()).to_string(),
            "Capture read failed: EIO"
        );
        assert_eq!(
            Error::AlreadyStreaming.to_string(),
            "Capture session already streaming"
        );
    }
}
