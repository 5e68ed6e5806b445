use std::fmt;

/// Result type alias for sloth core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for sloth core operations
#[derive(Debug)]
pub enum Error {
    /// I/O errors
    Io(std::io::Error),

    /// Socket creation or connect failures
    Connection(String),

    /// Target URL or resolution errors
    Target(String),

    /// Configuration errors
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Connection(msg) => write!(f, "Connection error: {msg}"),
            Error::Target(msg) => write!(f, "Target error: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Target(err.to_string())
    }
}

impl From<sloth_transport::Error> for Error {
    fn from(err: sloth_transport::Error) -> Self {
        match err {
            sloth_transport::Error::Io(e) => Error::Io(e),
            sloth_transport::Error::Connection(msg) => Error::Connection(msg),
            sloth_transport::Error::Config(msg) => Error::Config(msg),
        }
    }
}
