use serde::{Deserialize, Serialize};

/// Labels used for single-output sigmoid models that carry no metadata:
/// index 0 is the negative class, index 1 the positive class.
pub const DEFAULT_BINARY_LABELS: [&str; 2] = ["Normal", "Sickle"];

/// Optional annotations attached to a saved Network.
/// All fields are Option<> so models without metadata deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelMetadata {
    pub description: Option<String>,
    /// Human-readable class labels. For a single sigmoid output this is
    /// `[negative, positive]`; for softmax outputs one label per class.
    pub output_labels: Option<Vec<String>>,
}

impl ModelMetadata {
    /// Label for class `index` of a model with `outputs` output units.
    ///
    /// Falls back to the built-in binary labels for single-output models and
    /// to the class index otherwise.
    pub fn label_for(metadata: Option<&ModelMetadata>, index: usize, outputs: usize) -> String {
        let configured = metadata
            .and_then(|m| m.output_labels.as_ref())
            .and_then(|labels| labels.get(index).cloned());
        match configured {
            Some(label) => label,
            None if outputs == 1 => DEFAULT_BINARY_LABELS
                .get(index)
                .map(|s| s.to_string())
                .unwrap_or_else(|| index.to_string()),
            None => index.to_string(),
        }
    }
}
