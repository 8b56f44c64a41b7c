use thiserror::Error;

/// Kind of runtime resource named in a [`ComposeError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Container,
    Path,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Container => write!(f, "container"),
            Self::Path => write!(f, "path"),
        }
    }
}

/// Which end of an archive transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSide {
    Source,
    Destination,
}

impl std::fmt::Display for TransferSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

/// cnb-compose error types
#[derive(Error, Debug)]
pub enum ComposeError {
    /// Referenced container or image does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// Source container of an archive copy does not exist
    #[error("Unable to locate container '{container_id}'")]
    ArchiveSourceNotFound { container_id: String },

    /// Streaming copy failed on one end
    #[error("Archive transfer failed on {side} side ({container_id}:{path}): {message}")]
    TransferFailed {
        side: TransferSide,
        container_id: String,
        path: String,
        message: String,
    },

    /// The concurrent archive writer failed
    #[error("Archive producer failed: {source}")]
    ProducerFailed {
        #[source]
        source: std::io::Error,
    },

    /// A joined task panicked or was cancelled
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Any other container runtime failure
    #[error("Runtime error during {operation} ({id}): {message}")]
    Runtime {
        operation: &'static str,
        id: String,
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ComposeError {
    /// Shorthand for a wrapped runtime failure.
    pub fn runtime(
        operation: &'static str,
        id: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        ComposeError::Runtime {
            operation,
            id: id.into(),
            message: message.to_string(),
        }
    }

    pub fn container_not_found(id: impl Into<String>) -> Self {
        ComposeError::NotFound {
            kind: ResourceKind::Container,
            id: id.into(),
        }
    }

    pub fn image_not_found(id: impl Into<String>) -> Self {
        ComposeError::NotFound {
            kind: ResourceKind::Image,
            id: id.into(),
        }
    }

    /// Whether this error reports a missing container, image or path.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ComposeError::NotFound { .. } | ComposeError::ArchiveSourceNotFound { .. }
        )
    }
}

impl From<serde_yaml::Error> for ComposeError {
    fn from(err: serde_yaml::Error) -> Self {
        ComposeError::SerializationError(err.to_string())
    }
}

/// Result type alias for cnb-compose operations
pub type Result<T> = std::result::Result<T, ComposeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_not_found_display() {
        let error = ComposeError::image_not_found("paketobuildpacks/builder:base");
        assert_eq!(
            error.to_string(),
            "image not found: paketobuildpacks/builder:base"
        );
        assert!(error.is_not_found());
    }

    #[test]
    fn test_archive_source_not_found_display() {
        let error = ComposeError::ArchiveSourceNotFound {
            container_id: "abc123".to_string(),
        };
        assert_eq!(error.to_string(), "Unable to locate container 'abc123'");
        assert!(error.is_not_found());
    }

    #[test]
    fn test_transfer_failed_names_side() {
        let error = ComposeError::TransferFailed {
            side: TransferSide::Destination,
            container_id: "def456".to_string(),
            path: "/cnb".to_string(),
            message: "connection reset".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Archive transfer failed on destination side (def456:/cnb): connection reset"
        );
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_producer_failed_keeps_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad path");
        let error = ComposeError::ProducerFailed { source: cause };
        assert_eq!(error.to_string(), "Archive producer failed: bad path");
        let source = error.source().unwrap();
        assert_eq!(source.to_string(), "bad path");
    }

    #[test]
    fn test_runtime_error_display() {
        let error = ComposeError::runtime("start", "c1", "daemon unavailable");
        assert_eq!(
            error.to_string(),
            "Runtime error during start (c1): daemon unavailable"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ComposeError = io_error.into();
        assert!(matches!(error, ComposeError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let yaml_str = "invalid: yaml: content:";
        let result: std::result::Result<serde_yaml::Value, _> = serde_yaml::from_str(yaml_str);
        let error: ComposeError = result.unwrap_err().into();
        assert!(matches!(error, ComposeError::SerializationError(_)));
    }

    #[test]
    fn test_config_error_display() {
        let error = ComposeError::ConfigError("Missing builder image".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: Missing builder image"
        );
    }
}
