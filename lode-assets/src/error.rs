use std::sync::Arc;

pub type LodeResult<T> = Result<T, LodeError>;

/// Generic error covering everything that can go wrong while requesting or
/// loading a resource.
#[derive(Debug, Clone)]
pub enum LodeError {
    StringError(String),
    IoError(Arc<std::io::Error>),
    /// The requested path has no extension, so no factory can be chosen.
    InvalidPath(String),
    /// No factory is registered for the path's extension.
    UnknownResourceType(String),
    /// The load task panicked; the panic was contained at the dispatcher
    /// boundary and converted into this error.
    LoadPanicked,
}

impl std::error::Error for LodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            LodeError::IoError(ref e) => Some(&**e),
            _ => None,
        }
    }
}

impl core::fmt::Display for LodeError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            LodeError::StringError(ref e) => e.fmt(fmt),
            LodeError::IoError(ref e) => e.fmt(fmt),
            LodeError::InvalidPath(ref path) => {
                write!(fmt, "resource path '{}' has no extension", path)
            }
            LodeError::UnknownResourceType(ref ext) => {
                write!(fmt, "no resource factory registered for extension '{}'", ext)
            }
            LodeError::LoadPanicked => write!(fmt, "resource load task panicked"),
        }
    }
}

impl From<&str> for LodeError {
    fn from(str: &str) -> Self {
        LodeError::StringError(str.to_string())
    }
}

impl From<String> for LodeError {
    fn from(string: String) -> Self {
        LodeError::StringError(string)
    }
}

impl From<std::io::Error> for LodeError {
    fn from(error: std::io::Error) -> Self {
        LodeError::IoError(Arc::new(error))
    }
}
