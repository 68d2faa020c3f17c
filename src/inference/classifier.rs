use serde::Serialize;

use crate::error::{Error, Result};
use crate::math::tensor::Tensor;
use crate::network::metadata::ModelMetadata;
use crate::network::network::Network;

/// Decision threshold for single-output sigmoid models.
pub const SIGMOID_THRESHOLD: f64 = 0.5;

/// Interpreted classifier output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub class_index: usize,
    /// Raw output of the winning unit (the sigmoid value for binary models).
    pub probability: f64,
    /// Probability mass assigned to the predicted class.
    pub confidence: f64,
}

impl Prediction {
    /// Confidence rounded to four decimals, as reported on the wire.
    pub fn rounded_confidence(&self) -> f64 {
        round4(self.confidence)
    }
}

pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Turns one row of network output into a label and confidence.
///
/// A single unit is read as `P(positive)`: the positive label wins when it
/// exceeds 0.5, and confidence is `max(p, 1 - p)`. Wider outputs are read as
/// class probabilities and the argmax wins.
pub fn interpret(output: &[f64], metadata: Option<&ModelMetadata>) -> Result<Prediction> {
    match output {
        [] => Err(Error::InvalidModel("classifier produced no output".into())),
        [p] => {
            let p = *p;
            let positive = p > SIGMOID_THRESHOLD;
            let class_index = usize::from(positive);
            Ok(Prediction {
                label: ModelMetadata::label_for(metadata, class_index, 1),
                class_index,
                probability: p,
                confidence: if positive { p } else { 1.0 - p },
            })
        }
        probs => {
            let (class_index, &p) = probs
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .ok_or_else(|| Error::InvalidModel("classifier produced no output".into()))?;
            Ok(Prediction {
                label: ModelMetadata::label_for(metadata, class_index, probs.len()),
                class_index,
                probability: p,
                confidence: p,
            })
        }
    }
}

/// Forward pass on a batch-of-one tensor, interpreted with the network's
/// own metadata.
pub fn classify(network: &Network, input: &Tensor) -> Result<Prediction> {
    let output = network.forward(input)?;
    let [_, classes] = output.dims2("classifier output")?;
    interpret(&output.data[..classes], network.metadata.as_ref())
}
