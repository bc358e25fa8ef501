use thiserror::Error;

/// Errors that cross the library boundary. Everything else — parse failures,
/// per-file I/O, snapshot I/O, watcher loss — is recovered locally and
/// reported through `FileIssue`s, logs, or the status surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `apply_settings` rejected the new configuration; the previous
    /// configuration remains active.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// A full scan was canceled by reconfiguration. Consumed internally;
    /// surfaced only if a caller was waiting on the scan itself.
    #[error("scan canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable machine-readable kind for transport layers.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidSettings(_) => "invalid_settings",
            EngineError::Canceled => "canceled",
            EngineError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
