use std::collections::HashSet;
use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::layers::Layer;
use crate::math::tensor::Tensor;
use crate::network::metadata::ModelMetadata;

/// An immutable, sequential computation graph of named layers.
///
/// All passes take `&self` and allocate their own buffers, so one loaded
/// network can serve concurrent requests behind an `Arc` without locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    /// `[height, width, channels]` of a single input image.
    pub input_shape: [usize; 3],
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub metadata: Option<ModelMetadata>,
}

impl Network {
    pub fn new(name: impl Into<String>, input_shape: [usize; 3], layers: Vec<Layer>) -> Network {
        Network { name: name.into(), input_shape, layers, metadata: None }
    }

    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Network {
        self.metadata = Some(metadata);
        self
    }

    /// Shape of a batch-of-one input tensor.
    pub fn batch_input_shape(&self) -> [usize; 4] {
        let [h, w, c] = self.input_shape;
        [1, h, w, c]
    }

    /// Per-layer output shapes for a batch-of-one input. Fails if any layer's
    /// parameters disagree with the shape flowing into it.
    pub fn output_shapes(&self) -> Result<Vec<Vec<usize>>> {
        let mut shapes = Vec::with_capacity(self.layers.len());
        let mut current = self.batch_input_shape().to_vec();
        for layer in &self.layers {
            current = layer.output_shape(&current)?;
            shapes.push(current.clone());
        }
        Ok(shapes)
    }

    /// Checks that the graph is usable as a classifier: non-empty, unique
    /// layer names, consistent shapes and a `[batch, classes]` output.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::InvalidModel(format!("model '{}' has no layers", self.name)));
        }
        if self.input_shape.iter().any(|&d| d == 0) {
            return Err(Error::InvalidModel(format!(
                "model '{}' has a zero-sized input shape {:?}", self.name, self.input_shape
            )));
        }
        let mut seen = HashSet::new();
        for layer in &self.layers {
            if !seen.insert(layer.name.as_str()) {
                return Err(Error::InvalidModel(format!("duplicate layer name '{}'", layer.name)));
            }
        }
        let shapes = self.output_shapes()?;
        match shapes.last().map(|s| s.as_slice()) {
            Some(&[1, classes]) if classes > 0 => Ok(()),
            Some(other) => Err(Error::rank("model output", 2, other)),
            None => Err(Error::InvalidModel("model produced no output".into())),
        }
    }

    /// Index of the layer called `name`, if any.
    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    fn check_input(&self, input: &Tensor) -> Result<()> {
        let [h, w, c] = self.input_shape;
        match input.shape.as_slice() {
            &[n, ih, iw, ic] if n > 0 && ih == h && iw == w && ic == c => Ok(()),
            other => Err(Error::shape("network input", &self.batch_input_shape(), other)),
        }
    }

    /// Plain forward pass.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.check_input(input)?;
        let mut current = input.clone();
        for layer in &self.layers {
            current = layer.forward(&current)?;
        }
        Ok(current)
    }

    /// Forward pass that keeps every intermediate tensor.
    ///
    /// `trace[0]` is the input and `trace[i + 1]` is the output of layer `i`,
    /// so the last element is the prediction.
    pub fn forward_trace(&self, input: &Tensor) -> Result<Vec<Tensor>> {
        self.check_input(input)?;
        let mut trace = Vec::with_capacity(self.layers.len() + 1);
        trace.push(input.clone());
        for layer in &self.layers {
            let next = layer.forward(&trace[trace.len() - 1])?;
            trace.push(next);
        }
        Ok(trace)
    }

    /// Back-propagates `grad_output` (∂y/∂prediction) from the end of a
    /// recorded `trace` down to the output of layer `target`, returning
    /// ∂y/∂(output of `target`).
    pub fn backward_to(&self, trace: &[Tensor], target: usize, grad_output: Tensor) -> Result<Tensor> {
        if trace.len() != self.layers.len() + 1 || target >= self.layers.len() {
            return Err(Error::Gradient(format!(
                "trace of length {} cannot reach layer {} of {}", trace.len(), target, self.layers.len()
            )));
        }
        let prediction = &trace[self.layers.len()];
        if grad_output.shape != prediction.shape {
            return Err(Error::shape("output gradient", &prediction.shape, &grad_output.shape));
        }
        let mut grad = grad_output;
        for i in (target + 1..self.layers.len()).rev() {
            grad = self.layers[i].backward(&trace[i], &grad)?;
        }
        Ok(grad)
    }

    /// Runs one zero image through the graph so that the first request does
    /// not pay for any lazy setup, and to surface shape errors at startup.
    pub fn warm_up(&self) -> Result<Tensor> {
        let output = self.forward(&Tensor::zeros(&self.batch_input_shape()))?;
        debug!(model = %self.name, output = ?output.data, "warm-up pass complete");
        Ok(output)
    }

    /// Serializes the network to a pretty-printed JSON file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes and validates a network previously written by `save_json`.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Network> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let network: Network = serde_json::from_reader(reader)?;
        network.validate()?;
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::layers::{Dense, LayerKind};

    fn tiny() -> Network {
        Network::new(
            "tiny",
            [2, 2, 1],
            vec![
                Layer::new("flat", LayerKind::Flatten),
                Layer::new("out", LayerKind::Dense(Dense {
                    weights: Tensor::from_vec(&[4, 1], vec![1.0, 1.0, 1.0, 1.0]).unwrap(),
                    biases: vec![0.0],
                    activation: ActivationFunction::Identity,
                })),
            ],
        )
    }

    #[test]
    fn test_forward_trace_layout() {
        let net = tiny();
        let input = Tensor::from_vec(&[1, 2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let trace = net.forward_trace(&input).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0], input);
        assert_eq!(trace[2].data, vec![10.0]);
        assert_eq!(net.forward(&input).unwrap(), trace[2]);
    }

    #[test]
    fn test_rejects_wrong_input_shape() {
        let net = tiny();
        assert!(matches!(net.forward(&Tensor::zeros(&[1, 3, 3, 1])), Err(Error::Shape { .. })));
    }

    #[test]
    fn test_validate_catches_duplicates_and_bad_output() {
        let mut net = tiny();
        assert!(net.validate().is_ok());
        net.layers[1].name = "flat".into();
        assert!(matches!(net.validate(), Err(Error::InvalidModel(_))));

        let spatial_out = Network::new("spatial", [2, 2, 1], vec![
            Layer::activation("relu", ActivationFunction::ReLU),
        ]);
        assert!(matches!(spatial_out.validate(), Err(Error::Rank { .. })));
    }

    #[test]
    fn test_backward_to_flatten_output() {
        let net = tiny();
        let input = Tensor::zeros(&[1, 2, 2, 1]);
        let trace = net.forward_trace(&input).unwrap();
        let grad = net.backward_to(&trace, 0, Tensor::filled(&[1, 1], 1.0)).unwrap();
        assert_eq!(grad.shape, vec![1, 4]);
        assert_eq!(grad.data, vec![1.0; 4]);
    }

    #[test]
    fn test_json_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.json");
        tiny().save_json(&path).unwrap();
        let loaded = Network::load_json(&path).unwrap();
        assert_eq!(loaded.layers.len(), 2);
        assert_eq!(loaded.input_shape, [2, 2, 1]);
    }
}
