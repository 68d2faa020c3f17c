pub mod batch_norm;
pub mod conv;
pub mod dense;
pub mod pooling;

use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::math::tensor::Tensor;

pub use batch_norm::BatchNorm;
pub use conv::{Conv2d, DepthwiseConv2d, Padding};
pub use dense::Dense;
pub use pooling::MaxPool2d;

/// A named node of the sequential graph.
///
/// Serialized flat, e.g. `{"name": "Conv_1", "type": "Conv2d", "stride": 1, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    #[serde(flatten)]
    pub kind: LayerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    Conv2d(Conv2d),
    DepthwiseConv2d(DepthwiseConv2d),
    BatchNorm(BatchNorm),
    Activation { function: ActivationFunction },
    MaxPool2d(MaxPool2d),
    GlobalAveragePool,
    Flatten,
    Dense(Dense),
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Layer {
        Layer { name: name.into(), kind }
    }

    pub fn activation(name: impl Into<String>, function: ActivationFunction) -> Layer {
        Layer::new(name, LayerKind::Activation { function })
    }

    /// Output shape for a given input shape, validating parameter shapes on
    /// the way.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let name = self.name.as_str();
        match &self.kind {
            LayerKind::Conv2d(l) => l.output_shape(name, input),
            LayerKind::DepthwiseConv2d(l) => l.output_shape(name, input),
            LayerKind::BatchNorm(l) => l.output_shape(name, input),
            LayerKind::Activation { .. } => Ok(input.to_vec()),
            LayerKind::MaxPool2d(l) => l.output_shape(name, input),
            LayerKind::GlobalAveragePool => pooling::global_average_pool_shape(name, input),
            LayerKind::Flatten => match input {
                [n, rest @ ..] if !rest.is_empty() => Ok(vec![*n, rest.iter().product()]),
                other => Err(Error::rank(name, 2, other)),
            },
            LayerKind::Dense(l) => l.output_shape(name, input),
        }
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let name = self.name.as_str();
        match &self.kind {
            LayerKind::Conv2d(l) => l.forward(name, input),
            LayerKind::DepthwiseConv2d(l) => l.forward(name, input),
            LayerKind::BatchNorm(l) => l.forward(name, input),
            LayerKind::Activation { function } => Ok(function.apply(input)),
            LayerKind::MaxPool2d(l) => l.forward(name, input),
            LayerKind::GlobalAveragePool => pooling::global_average_pool(name, input),
            LayerKind::Flatten => {
                let shape = self.output_shape(&input.shape)?;
                input.clone().reshape(&shape)
            }
            LayerKind::Dense(l) => l.forward(name, input),
        }
    }

    /// Maps ∂L/∂output back to ∂L/∂input. `input` is the tensor this layer
    /// consumed during the recorded forward pass.
    pub fn backward(&self, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let name = self.name.as_str();
        match &self.kind {
            LayerKind::Conv2d(l) => l.backward(name, input, grad_output),
            LayerKind::DepthwiseConv2d(l) => l.backward(name, input, grad_output),
            LayerKind::BatchNorm(l) => l.backward(name, input, grad_output),
            LayerKind::Activation { function } => function.backprop(input, grad_output),
            LayerKind::MaxPool2d(l) => l.backward(name, input, grad_output),
            LayerKind::GlobalAveragePool => pooling::global_average_pool_backward(name, input, grad_output),
            LayerKind::Flatten => {
                let expected = self.output_shape(&input.shape)?;
                if grad_output.shape != expected {
                    return Err(Error::shape(format!("{} gradient", name), &expected, &grad_output.shape));
                }
                grad_output.clone().reshape(&input.shape)
            }
            LayerKind::Dense(l) => l.backward(name, input, grad_output),
        }
    }

    /// Short type label used by the model inspector.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            LayerKind::Conv2d(_) => "Conv2d",
            LayerKind::DepthwiseConv2d(_) => "DepthwiseConv2d",
            LayerKind::BatchNorm(_) => "BatchNorm",
            LayerKind::Activation { .. } => "Activation",
            LayerKind::MaxPool2d(_) => "MaxPool2d",
            LayerKind::GlobalAveragePool => "GlobalAveragePool",
            LayerKind::Flatten => "Flatten",
            LayerKind::Dense(_) => "Dense",
        }
    }
}
