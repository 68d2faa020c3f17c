use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::math::tensor::Tensor;

/// Fully connected layer over `[batch, features]` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// Shape `[input_size, size]`, so a row vector multiplies from the left.
    pub weights: Tensor,
    pub biases: Vec<f64>,
    pub activation: ActivationFunction,
}

impl Dense {
    /// Initializes weights with He for ReLU-family activations and Xavier
    /// otherwise; biases start at zero.
    pub fn new<R: Rng + ?Sized>(
        size: usize,
        input_size: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Dense {
        let weights = match activation {
            ActivationFunction::ReLU | ActivationFunction::ReLU6 | ActivationFunction::LeakyReLU { .. } => {
                Tensor::he(&[input_size, size], input_size, rng)
            }
            _ => Tensor::xavier(&[input_size, size], input_size, rng),
        };
        Dense { weights, biases: vec![0.0; size], activation }
    }

    fn dims(&self, name: &str) -> Result<[usize; 2]> {
        let [input_size, size] = self.weights.dims2(name)?;
        if self.biases.len() != size {
            return Err(Error::shape(format!("{} biases", name), &[size], &[self.biases.len()]));
        }
        Ok([input_size, size])
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        let [input_size, size] = self.dims(name)?;
        match input {
            &[n, f] if f == input_size => Ok(vec![n, size]),
            &[n, _] => Err(Error::shape(format!("{} input", name), &[n, input_size], input)),
            other => Err(Error::rank(name, 2, other)),
        }
    }

    /// z = x·W + b
    fn linear(&self, name: &str, input: &Tensor) -> Result<Tensor> {
        let shape = self.output_shape(name, &input.shape)?;
        let [input_size, size] = self.dims(name)?;
        let mut out = Tensor::zeros(&shape);
        for (x_row, z_row) in input.data.chunks(input_size).zip(out.data.chunks_mut(size)) {
            z_row.copy_from_slice(&self.biases);
            for (i, &x) in x_row.iter().enumerate() {
                let w_row = &self.weights.data[i * size..(i + 1) * size];
                for (z, &w) in z_row.iter_mut().zip(w_row) {
                    *z += x * w;
                }
            }
        }
        Ok(out)
    }

    pub fn forward(&self, name: &str, input: &Tensor) -> Result<Tensor> {
        Ok(self.activation.apply(&self.linear(name, input)?))
    }

    /// Propagates δ = ∂L/∂a through the activation and then Wᵀ.
    pub fn backward(&self, name: &str, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let z = self.linear(name, input)?;
        let delta = self.activation.backprop(&z, grad_output)?;
        let [input_size, size] = self.dims(name)?;
        let mut grad = Tensor::zeros(&input.shape);
        for (d_row, g_row) in delta.data.chunks(size).zip(grad.data.chunks_mut(input_size)) {
            for (i, g) in g_row.iter_mut().enumerate() {
                let w_row = &self.weights.data[i * size..(i + 1) * size];
                *g = d_row.iter().zip(w_row).map(|(d, w)| d * w).sum();
            }
        }
        Ok(grad)
    }
}
