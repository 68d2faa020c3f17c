use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};
use crate::math::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActivationFunction {
    Sigmoid,
    ReLU,
    /// ReLU clipped at 6, as used throughout MobileNet blocks.
    ReLU6,
    Identity,
    /// Softmax is vector-valued over the last axis; it is handled in
    /// `apply()` / `backprop()` rather than element-wise.
    Softmax,
    Tanh,
    LeakyReLU { alpha: f64 },
    Swish,
}

impl ActivationFunction {
    /// Element-wise activation. Must not be called for `Softmax`.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Sigmoid => sigmoid(x),
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::ReLU6 => x.clamp(0.0, 6.0),
            ActivationFunction::Identity => x,
            ActivationFunction::Softmax => {
                unreachable!("softmax is applied over a whole row by ActivationFunction::apply")
            }
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::LeakyReLU { alpha } => if x > 0.0 { x } else { alpha * x },
            ActivationFunction::Swish => x * sigmoid(x),
        }
    }

    /// Element-wise derivative with respect to the pre-activation `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Sigmoid => {
                let fx = sigmoid(x);
                fx * (1.0 - fx)
            }
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::ReLU6 => if x > 0.0 && x < 6.0 { 1.0 } else { 0.0 },
            ActivationFunction::Identity => 1.0,
            ActivationFunction::Softmax => {
                unreachable!("softmax has no element-wise derivative; use ActivationFunction::backprop")
            }
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationFunction::LeakyReLU { alpha } => if x > 0.0 { 1.0 } else { *alpha },
            ActivationFunction::Swish => {
                let sig = sigmoid(x);
                sig + x * sig * (1.0 - sig)
            }
        }
    }

    /// Applies the activation to a whole tensor. Softmax normalizes over the
    /// last axis.
    pub fn apply(&self, z: &Tensor) -> Tensor {
        match self {
            ActivationFunction::Identity => z.clone(),
            ActivationFunction::Softmax => softmax_last_axis(z),
            _ => z.map(|x| self.function(x)),
        }
    }

    /// Maps ∂L/∂a back to ∂L/∂z, where `a = self.apply(z)`.
    pub fn backprop(&self, z: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        if z.shape != grad_output.shape {
            return Err(Error::shape("activation backprop", &z.shape, &grad_output.shape));
        }
        match self {
            ActivationFunction::Identity => Ok(grad_output.clone()),
            ActivationFunction::Softmax => {
                // J = diag(s) - s sᵀ, so Jᵀg = s ⊙ (g - <g, s>) per row.
                let s = softmax_last_axis(z);
                let width = last_axis(z);
                let mut grad = Tensor::zeros(&z.shape);
                for ((g_row, s_row), out_row) in grad_output.data.chunks(width)
                    .zip(s.data.chunks(width))
                    .zip(grad.data.chunks_mut(width))
                {
                    let dot: f64 = g_row.iter().zip(s_row).map(|(g, s)| g * s).sum();
                    for ((o, &g), &s) in out_row.iter_mut().zip(g_row).zip(s_row) {
                        *o = s * (g - dot);
                    }
                }
                Ok(grad)
            }
            _ => z.zip_map(grad_output, |x, g| g * self.derivative(x)),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn last_axis(t: &Tensor) -> usize {
    t.shape.last().copied().unwrap_or(1).max(1)
}

/// Numerically stable softmax over the last axis.
fn softmax_last_axis(z: &Tensor) -> Tensor {
    let width = last_axis(z);
    let mut out = z.clone();
    for row in out.data.chunks_mut(width) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu6_clips_both_ends() {
        let f = ActivationFunction::ReLU6;
        assert_eq!(f.function(-1.0), 0.0);
        assert_eq!(f.function(3.0), 3.0);
        assert_eq!(f.function(9.0), 6.0);
        assert_eq!(f.derivative(9.0), 0.0);
        assert_eq!(f.derivative(2.0), 1.0);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let z = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, -5.0, 0.0, 5.0]).unwrap();
        let s = ActivationFunction::Softmax.apply(&z);
        for row in s.data.chunks(3) {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_softmax_backprop_matches_finite_difference() {
        let z = Tensor::from_vec(&[1, 3], vec![0.3, -1.2, 2.0]).unwrap();
        let mut g = Tensor::zeros(&[1, 3]);
        g.data[2] = 1.0;
        let analytic = ActivationFunction::Softmax.backprop(&z, &g).unwrap();

        let h = 1e-6;
        for j in 0..3 {
            let mut plus = z.clone();
            plus.data[j] += h;
            let mut minus = z.clone();
            minus.data[j] -= h;
            let numeric = (ActivationFunction::Softmax.apply(&plus).data[2]
                - ActivationFunction::Softmax.apply(&minus).data[2]) / (2.0 * h);
            assert!((numeric - analytic.data[j]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sigmoid_backprop_scales_gradient() {
        let z = Tensor::from_vec(&[1, 1], vec![0.0]).unwrap();
        let g = Tensor::from_vec(&[1, 1], vec![2.0]).unwrap();
        let out = ActivationFunction::Sigmoid.backprop(&z, &g).unwrap();
        assert!((out.data[0] - 0.5).abs() < 1e-12);
    }
}
