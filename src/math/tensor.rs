use rand::Rng;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;

use crate::error::{Error, Result};

/// Dense row-major tensor.
///
/// Image tensors use the N×H×W×C layout throughout the crate, so the channel
/// index is the fastest-moving one in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor::filled(shape, 0.0)
    }

    pub fn filled(shape: &[usize], value: f64) -> Tensor {
        Tensor {
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Tensor> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::shape("Tensor::from_vec", &[expected], &[data.len()]));
        }
        Ok(Tensor { shape: shape.to_vec(), data })
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        // Draw two independent uniform samples in (0, 1] to avoid log(0).
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// He initialization: samples from N(0, sqrt(2 / fan_in)).
    ///
    /// Recommended before ReLU layers. The variance 2/fan_in accounts for
    /// the fact that ReLU zeroes half of its inputs on average.
    pub fn he<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Tensor {
        Tensor::gaussian(shape, (2.0 / fan_in.max(1) as f64).sqrt(), rng)
    }

    /// Xavier (Glorot) initialization: samples from N(0, sqrt(1 / fan_in)).
    ///
    /// Recommended before Sigmoid/Softmax outputs.
    pub fn xavier<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Tensor {
        Tensor::gaussian(shape, (1.0 / fan_in.max(1) as f64).sqrt(), rng)
    }

    fn gaussian<R: Rng + ?Sized>(shape: &[usize], std_dev: f64, rng: &mut R) -> Tensor {
        let len = shape.iter().product();
        let data = (0..len)
            .map(|_| Tensor::sample_standard_normal(rng) * std_dev)
            .collect();
        Tensor { shape: shape.to_vec(), data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `[n, h, w, c]`, or a rank error naming `context`.
    pub fn dims4(&self, context: &str) -> Result<[usize; 4]> {
        match self.shape.as_slice() {
            &[n, h, w, c] => Ok([n, h, w, c]),
            other => Err(Error::rank(context, 4, other)),
        }
    }

    /// Returns `[n, features]`, or a rank error naming `context`.
    pub fn dims2(&self, context: &str) -> Result<[usize; 2]> {
        match self.shape.as_slice() {
            &[n, f] => Ok([n, f]),
            other => Err(Error::rank(context, 2, other)),
        }
    }

    /// Flat offset of `(n, h, w, c)` in a rank-4 tensor. No bounds checking
    /// beyond the final slice index.
    #[inline]
    pub fn offset4(&self, n: usize, h: usize, w: usize, c: usize) -> usize {
        let [_, hh, ww, cc] = [self.shape[0], self.shape[1], self.shape[2], self.shape[3]];
        ((n * hh + h) * ww + w) * cc + c
    }

    pub fn reshape(self, shape: &[usize]) -> Result<Tensor> {
        Tensor::from_vec(shape, self.data)
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f64) -> f64,
    {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Element-wise combination of two same-shape tensors.
    pub fn zip_map<F>(&self, other: &Tensor, functor: F) -> Result<Tensor>
    where
        F: Fn(f64, f64) -> f64,
    {
        if self.shape != other.shape {
            return Err(Error::shape("Tensor::zip_map", &self.shape, &other.shape));
        }
        Ok(Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().zip(other.data.iter()).map(|(&a, &b)| functor(a, b)).collect(),
        })
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}
