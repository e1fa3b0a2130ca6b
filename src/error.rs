use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmenterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("delivery of {name} failed: {reason}")]
    Sink { name: String, reason: String },

    #[error("delivery of {name} failed after {attempts} attempts")]
    RetriesExhausted { name: String, attempts: u32 },
}

impl SegmenterError {
    /// Whether a networked sink should try the same write again.
    pub fn is_transient(&self) -> bool {
        match self {
            SegmenterError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status() == Some(reqwest::StatusCode::SERVICE_UNAVAILABLE)
            }
            SegmenterError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SegmenterError>;
