// Failure kinds of the show, one enum per source.
// Data, device and surface failures degrade the show; none of them halts the timer chain.

use thiserror::Error;

use crate::types::ElementId;

/// Errors returned across the host boundary.
#[derive(Error, Debug)]
pub enum ShowError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Unknown pointer event: {0}")]
    UnknownPointer(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ShowError {
    fn from(err: serde_json::Error) -> Self {
        ShowError::Serialization(err.to_string())
    }
}

/// Layout fetch or decode failure. Degrades to an empty placement set.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Failed to fetch layout {path}: {message}")]
    Fetch { path: String, message: String },

    #[error("Failed to parse layout {path}: {message}")]
    Parse { path: String, message: String },
}

impl DataError {
    pub fn path(&self) -> &str {
        match self {
            DataError::Fetch { path, .. } | DataError::Parse { path, .. } => path,
        }
    }
}

/// Capture device failure. Degrades to the static fallback block.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Capture device denied: {0}")]
    Denied(String),

    #[error("Capture device unavailable: {0}")]
    Unavailable(String),
}

/// Missing or unsuitable surface target. The dependent step is skipped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("Element {0:?} is not attached")]
    Detached(ElementId),

    #[error("Element {0:?} cannot be painted")]
    NotPaintable(ElementId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_target() {
        let err = DataError::Fetch {
            path: "a/Spine.json".to_string(),
            message: "404".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to fetch layout a/Spine.json: 404");
        assert_eq!(
            ShowError::UnknownPhase("phase9".to_string()).to_string(),
            "Unknown phase: phase9"
        );
        assert_eq!(
            DeviceError::Denied("NotAllowedError".to_string()).to_string(),
            "Capture device denied: NotAllowedError"
        );
    }

    #[test]
    fn data_error_keeps_path() {
        let err = DataError::Parse {
            path: "dvd spine/Spine.json".to_string(),
            message: "EOF".to_string(),
        };
        assert_eq!(err.path(), "dvd spine/Spine.json");
        assert!(err.to_string().contains("EOF"));
    }
}
