use thiserror::Error;

/// Errors raised by location parsing, codecs, the registry and the handler.
///
/// Every variant is `Clone` so that the outcome of a single decode can be
/// handed to all callers waiting on the same path.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// A value passed where a location was expected could not be interpreted.
    #[error("Invalid location '{value}': {reason}")]
    InvalidLocation { value: String, reason: String },

    /// A codec was asked for a capability it does not implement.
    #[error("Unsupported operation: {operation} is not available for {format}")]
    UnsupportedOperation {
        operation: &'static str,
        format: String,
    },

    /// Header fields failed sanity checks.
    #[error("Malformed container {path}: {reason}")]
    MalformedContainer { path: String, reason: String },

    /// The file addressed by a mutating operation does not exist.
    #[error("File not found: {0}")]
    MissingFile(String),

    /// Filesystem error while reading or writing a container
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    /// Pixel data could not be decoded.
    #[error("Failed to decode {path} as {format}: {message}")]
    Decode {
        path: String,
        format: &'static str,
        message: String,
    },

    /// Pixel data could not be encoded.
    #[error("Failed to encode {path} as {format}: {message}")]
    Encode {
        path: String,
        format: &'static str,
        message: String,
    },

    /// A 1-based index addresses a frame past the end of the file.
    #[error("Index {index} out of range for {path} ({count} frames)")]
    IndexOutOfRange {
        path: String,
        index: u32,
        count: usize,
    },

    /// Frame shapes disagree.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Request parameters are inconsistent.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// An external collaborator program failed.
    #[error("External program '{program}' failed: {message}")]
    External { program: String, message: String },

    /// A conversion failed; names both ends and the attempted output format.
    #[error("Cannot convert {input} to {output} ({format}): {source}")]
    Conversion {
        input: String,
        output: String,
        format: String,
        #[source]
        source: Box<ImageError>,
    },
}

impl ImageError {
    /// Wrap a `std::io::Error` with the path it happened on.
    pub fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return ImageError::MissingFile(path.into());
        }
        ImageError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ImageError::MalformedContainer {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(operation: &'static str, format: impl Into<String>) -> Self {
        ImageError::UnsupportedOperation {
            operation,
            format: format.into(),
        }
    }

    pub fn invalid_location(value: impl Into<String>, reason: impl Into<String>) -> Self {
        ImageError::InvalidLocation {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
