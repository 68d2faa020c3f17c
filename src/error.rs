use thiserror::Error;

/// Errors raised by the classifier, the activation-map generator and the
/// surrounding storage / configuration plumbing.
#[derive(Error, Debug)]
pub enum Error {
    // Input errors
    #[error("No image uploaded")]
    MissingImage,

    #[error("Upload too large: {size} bytes (limit {limit})")]
    UploadTooLarge { size: usize, limit: usize },

    // Decode / encode errors
    #[error("Could not read uploaded image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Could not encode heatmap image: {0}")]
    Encode(#[source] image::ImageError),

    // Model / graph errors
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    Shape {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Rank mismatch in {context}: expected rank {expected}, got shape {actual:?}")]
    Rank {
        context: String,
        expected: usize,
        actual: Vec<usize>,
    },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("No layer with 4-dimensional output found in model '{0}'")]
    NoSpatialLayer(String),

    #[error("Gradient computation failed: {0}")]
    Gradient(String),

    // Plumbing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Coarse classification of an [`Error`], used to keep log lines apart even
/// though every non-input failure maps to the same wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Decode,
    Model,
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingImage | Error::UploadTooLarge { .. } => ErrorKind::Input,
            Error::Decode(_) | Error::Encode(_) => ErrorKind::Decode,
            Error::Shape { .. }
            | Error::Rank { .. }
            | Error::InvalidModel(_)
            | Error::LayerNotFound(_)
            | Error::NoSpatialLayer(_)
            | Error::Gradient(_) => ErrorKind::Model,
            Error::Io(_) | Error::Json(_) | Error::Config(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn rank(context: impl Into<String>, expected: usize, actual: &[usize]) -> Error {
        Error::Rank {
            context: context.into(),
            expected,
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn shape(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Error {
        Error::Shape {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::MissingImage.kind(), ErrorKind::Input);
        assert_eq!(Error::Gradient("x".into()).kind(), ErrorKind::Model);
        assert_eq!(Error::NoSpatialLayer("m".into()).kind(), ErrorKind::Model);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Error::from(io).kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_missing_image_message() {
        assert_eq!(Error::MissingImage.to_string(), "No image uploaded");
    }
}
