use thiserror::Error;

/// Errors reported by editing commands and their collaborators.
#[derive(Debug, Error)]
pub enum EditorError {
    /// Unknown filter / blend mode / adjustment name, malformed dimensions
    /// or command syntax.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("nothing to composite: document has no layers")]
    EmptyDocument,

    #[error("layer index {index} out of range ({len} layers)")]
    OutOfRangeIndex { index: usize, len: usize },

    #[error("no layer selected")]
    NoSelection,

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("draft error: {0}")]
    Draft(String),
}

impl EditorError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn draft(msg: impl Into<String>) -> Self {
        Self::Draft(msg.into())
    }
}

impl From<bincode::Error> for EditorError {
    fn from(e: bincode::Error) -> Self {
        Self::Draft(e.to_string())
    }
}

pub type Result<T, E = EditorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(EditorError::invalid("x").to_string().starts_with("invalid argument:"));
        assert!(EditorError::draft("x").to_string().starts_with("draft error:"));
        assert_eq!(
            EditorError::OutOfRangeIndex { index: 3, len: 2 }.to_string(),
            "layer index 3 out of range (2 layers)"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EditorError = io.into();
        assert!(matches!(err, EditorError::Io(_)));
    }
}
