//! Error types for the map rendering service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised outside of a single render.
///
/// Per-request outcomes (bad input, stalled renders) are not errors: they are
/// reported as [`crate::CaptureResult`] values so a worker is never left busy.
#[derive(Error, Debug)]
pub enum Error {
    /// Style list unreadable or malformed
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A rendering surface could not load its style
    #[error("Surface for style '{style}' failed to initialize: {message}")]
    SurfaceInitError { style: String, message: String },

    /// A rendering surface failed while serving a request
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The worker thread owning a surface is gone
    #[error("Render worker for style '{0}' has stopped")]
    WorkerStopped(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_init_error_names_the_style() {
        let err = Error::SurfaceInitError {
            style: "satellite".into(),
            message: "style never loaded".into(),
        };
        let text = err.to_string();
        assert!(text.contains("satellite"));
        assert!(text.contains("style never loaded"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "styles.json");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
