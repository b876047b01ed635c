use crate::channel::ChannelError;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// The advection worker pool could not be built.
    ThreadPool(rayon::ThreadPoolBuildError),
    InvalidParameters(String),
    Channel(ChannelError),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ThreadPool(e) => write!(f, "failed to build advection thread pool: {}", e),
            Error::InvalidParameters(msg) => write!(f, "invalid parameters: {}", msg),
            Error::Channel(e) => write!(f, "frame channel: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Json(e) => write!(f, "failed to parse parameters: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ThreadPool(e) => Some(e),
            Error::InvalidParameters(_) => None,
            Error::Channel(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Error::ThreadPool(e)
    }
}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        Error::Channel(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}
