use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};
use crate::math::tensor::Tensor;

/// Inference-mode batch normalization over the last (channel) axis, using
/// the moving statistics frozen at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm {
    pub gamma: Vec<f64>,
    pub beta: Vec<f64>,
    pub moving_mean: Vec<f64>,
    pub moving_variance: Vec<f64>,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_epsilon() -> f64 {
    1e-3
}

impl BatchNorm {
    /// Identity normalization for `channels` channels.
    pub fn identity(channels: usize) -> BatchNorm {
        BatchNorm {
            gamma: vec![1.0; channels],
            beta: vec![0.0; channels],
            moving_mean: vec![0.0; channels],
            moving_variance: vec![1.0; channels],
            epsilon: 0.0,
        }
    }

    fn channels(&self, name: &str, input: &[usize]) -> Result<usize> {
        let c = *input.last().ok_or_else(|| Error::rank(name, 2, input))?;
        for (field, len) in [
            ("gamma", self.gamma.len()),
            ("beta", self.beta.len()),
            ("moving_mean", self.moving_mean.len()),
            ("moving_variance", self.moving_variance.len()),
        ] {
            if len != c {
                return Err(Error::shape(format!("{} {}", name, field), &[c], &[len]));
            }
        }
        Ok(c)
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        self.channels(name, input)?;
        Ok(input.to_vec())
    }

    /// Per-channel `(scale, shift)` so that `y = x * scale + shift`.
    fn affine(&self) -> Vec<(f64, f64)> {
        (0..self.gamma.len())
            .map(|c| {
                let scale = self.gamma[c] / (self.moving_variance[c] + self.epsilon).sqrt();
                (scale, self.beta[c] - self.moving_mean[c] * scale)
            })
            .collect()
    }

    pub fn forward(&self, name: &str, input: &Tensor) -> Result<Tensor> {
        let c = self.channels(name, &input.shape)?;
        let affine = self.affine();
        let mut out = input.clone();
        for row in out.data.chunks_mut(c) {
            for (v, &(scale, shift)) in row.iter_mut().zip(&affine) {
                *v = *v * scale + shift;
            }
        }
        Ok(out)
    }

    pub fn backward(&self, name: &str, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let c = self.channels(name, &input.shape)?;
        if grad_output.shape != input.shape {
            return Err(Error::shape(format!("{} gradient", name), &input.shape, &grad_output.shape));
        }
        let affine = self.affine();
        let mut grad = grad_output.clone();
        for row in grad.data.chunks_mut(c) {
            for (g, &(scale, _)) in row.iter_mut().zip(&affine) {
                *g *= scale;
            }
        }
        Ok(grad)
    }
}
