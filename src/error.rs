//! Error types for drishti-link

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// drishti-link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on a link stream or file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Session is no longer usable
    #[error("Link closed")]
    LinkClosed,

    /// No peer connected to send to
    #[error("Not connected")]
    NotConnected,

    /// Wire encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Config file parse failure
    #[error("Config error: {0}")]
    Config(String),

    /// HTTP fetch failure (tiles, routing backend)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Routing backend returned no usable route
    #[error("Router error: {0}")]
    Router(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}
