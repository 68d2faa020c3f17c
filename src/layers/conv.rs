use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::math::tensor::Tensor;

/// Spatial padding mode, matching the usual `same` / `valid` conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Output is `ceil(input / stride)`; the extra padding goes to the
    /// bottom/right when the total is odd.
    Same,
    /// No padding; windows must fit entirely inside the input.
    Valid,
}

/// Resolved sliding-window geometry for one spatial axis.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Axis {
    pub input: usize,
    pub output: usize,
    pub pad_before: usize,
}

impl Axis {
    pub fn resolve(name: &str, input: usize, kernel: usize, stride: usize, padding: Padding) -> Result<Axis> {
        if kernel == 0 || stride == 0 {
            return Err(Error::InvalidModel(format!("{}: kernel and stride must be positive", name)));
        }
        match padding {
            Padding::Valid => {
                if input < kernel {
                    return Err(Error::InvalidModel(format!(
                        "{}: input extent {} is smaller than kernel {}", name, input, kernel
                    )));
                }
                Ok(Axis { input, output: (input - kernel) / stride + 1, pad_before: 0 })
            }
            Padding::Same => {
                let output = (input + stride - 1) / stride;
                let pad_total = ((output.max(1) - 1) * stride + kernel).saturating_sub(input);
                Ok(Axis { input, output, pad_before: pad_total / 2 })
            }
        }
    }

    /// Input coordinate read by output position `o` at kernel tap `k`, if it
    /// falls inside the (unpadded) input.
    #[inline]
    pub fn tap(&self, o: usize, k: usize, stride: usize) -> Option<usize> {
        let i = (o * stride + k).checked_sub(self.pad_before)?;
        if i < self.input { Some(i) } else { None }
    }
}

// ---------------------------------------------------------------------------
// Conv2d
// ---------------------------------------------------------------------------

/// Standard 2-D convolution over NHWC input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    pub stride: usize,
    pub padding: Padding,
    /// Shape `[kernel_h, kernel_w, in_channels, filters]`.
    pub weights: Tensor,
    /// One bias per filter.
    pub biases: Vec<f64>,
    #[serde(default = "identity")]
    pub activation: ActivationFunction,
}

fn identity() -> ActivationFunction {
    ActivationFunction::Identity
}

impl Conv2d {
    /// He-initialized square convolution with zero biases.
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        filters: usize,
        kernel: usize,
        stride: usize,
        padding: Padding,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Conv2d {
        let fan_in = kernel * kernel * in_channels;
        Conv2d {
            stride,
            padding,
            weights: Tensor::he(&[kernel, kernel, in_channels, filters], fan_in, rng),
            biases: vec![0.0; filters],
            activation,
        }
    }

    fn kernel_dims(&self, name: &str) -> Result<[usize; 4]> {
        let dims = self.weights.dims4(name)?;
        if self.biases.len() != dims[3] {
            return Err(Error::shape(format!("{} biases", name), &[dims[3]], &[self.biases.len()]));
        }
        Ok(dims)
    }

    fn geometry(&self, name: &str, input: &[usize]) -> Result<(Axis, Axis, [usize; 4])> {
        let [kh, kw, cin, filters] = self.kernel_dims(name)?;
        let (h, w, c) = match input {
            &[_, h, w, c] => (h, w, c),
            other => return Err(Error::rank(name, 4, other)),
        };
        if c != cin {
            return Err(Error::shape(format!("{} input channels", name), &[cin], &[c]));
        }
        let rows = Axis::resolve(name, h, kh, self.stride, self.padding)?;
        let cols = Axis::resolve(name, w, kw, self.stride, self.padding)?;
        Ok((rows, cols, [kh, kw, cin, filters]))
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        let (rows, cols, [_, _, _, filters]) = self.geometry(name, input)?;
        Ok(vec![input[0], rows.output, cols.output, filters])
    }

    /// Pre-activation output `z = W * x + b`.
    fn linear(&self, name: &str, input: &Tensor) -> Result<Tensor> {
        let (rows, cols, [kh, kw, cin, filters]) = self.geometry(name, &input.shape)?;
        let n = input.shape[0];
        let mut out = Tensor::zeros(&[n, rows.output, cols.output, filters]);
        let w = &self.weights.data;

        for b in 0..n {
            for oy in 0..rows.output {
                for ox in 0..cols.output {
                    let base = out.offset4(b, oy, ox, 0);
                    let acc = &mut out.data[base..base + filters];
                    acc.copy_from_slice(&self.biases);
                    for ky in 0..kh {
                        let Some(iy) = rows.tap(oy, ky, self.stride) else { continue };
                        for kx in 0..kw {
                            let Some(ix) = cols.tap(ox, kx, self.stride) else { continue };
                            let in_base = input.offset4(b, iy, ix, 0);
                            let w_base = (ky * kw + kx) * cin * filters;
                            for ci in 0..cin {
                                let x = input.data[in_base + ci];
                                let w_row = &w[w_base + ci * filters..w_base + (ci + 1) * filters];
                                for (a, &wv) in acc.iter_mut().zip(w_row) {
                                    *a += x * wv;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn forward(&self, name: &str, input: &Tensor) -> Result<Tensor> {
        Ok(self.activation.apply(&self.linear(name, input)?))
    }

    /// ∂L/∂input given ∂L/∂output. Weight gradients are never needed here.
    pub fn backward(&self, name: &str, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let z = self.linear(name, input)?;
        let dz = self.activation.backprop(&z, grad_output)?;
        let (rows, cols, [kh, kw, cin, filters]) = self.geometry(name, &input.shape)?;
        let mut grad = Tensor::zeros(&input.shape);
        let w = &self.weights.data;

        for b in 0..input.shape[0] {
            for oy in 0..rows.output {
                for ox in 0..cols.output {
                    let g_base = dz.offset4(b, oy, ox, 0);
                    let g = &dz.data[g_base..g_base + filters];
                    for ky in 0..kh {
                        let Some(iy) = rows.tap(oy, ky, self.stride) else { continue };
                        for kx in 0..kw {
                            let Some(ix) = cols.tap(ox, kx, self.stride) else { continue };
                            let in_base = grad.offset4(b, iy, ix, 0);
                            let w_base = (ky * kw + kx) * cin * filters;
                            for ci in 0..cin {
                                let w_row = &w[w_base + ci * filters..w_base + (ci + 1) * filters];
                                let s: f64 = g.iter().zip(w_row).map(|(gv, wv)| gv * wv).sum();
                                grad.data[in_base + ci] += s;
                            }
                        }
                    }
                }
            }
        }
        Ok(grad)
    }
}

// ---------------------------------------------------------------------------
// DepthwiseConv2d
// ---------------------------------------------------------------------------

/// Per-channel convolution (depth multiplier 1), the building block of
/// MobileNet's inverted residual blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthwiseConv2d {
    pub stride: usize,
    pub padding: Padding,
    /// Shape `[kernel_h, kernel_w, channels]`.
    pub weights: Tensor,
    pub biases: Vec<f64>,
    #[serde(default = "identity")]
    pub activation: ActivationFunction,
}

impl DepthwiseConv2d {
    pub fn new<R: Rng + ?Sized>(
        channels: usize,
        kernel: usize,
        stride: usize,
        padding: Padding,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> DepthwiseConv2d {
        DepthwiseConv2d {
            stride,
            padding,
            weights: Tensor::he(&[kernel, kernel, channels], kernel * kernel, rng),
            biases: vec![0.0; channels],
            activation,
        }
    }

    fn geometry(&self, name: &str, input: &[usize]) -> Result<(Axis, Axis, [usize; 3])> {
        let [kh, kw, channels] = match self.weights.shape.as_slice() {
            &[kh, kw, c] => [kh, kw, c],
            other => return Err(Error::rank(name, 3, other)),
        };
        if self.biases.len() != channels {
            return Err(Error::shape(format!("{} biases", name), &[channels], &[self.biases.len()]));
        }
        let (h, w, c) = match input {
            &[_, h, w, c] => (h, w, c),
            other => return Err(Error::rank(name, 4, other)),
        };
        if c != channels {
            return Err(Error::shape(format!("{} input channels", name), &[channels], &[c]));
        }
        let rows = Axis::resolve(name, h, kh, self.stride, self.padding)?;
        let cols = Axis::resolve(name, w, kw, self.stride, self.padding)?;
        Ok((rows, cols, [kh, kw, channels]))
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        let (rows, cols, [_, _, channels]) = self.geometry(name, input)?;
        Ok(vec![input[0], rows.output, cols.output, channels])
    }

    fn linear(&self, name: &str, input: &Tensor) -> Result<Tensor> {
        let (rows, cols, [kh, kw, channels]) = self.geometry(name, &input.shape)?;
        let n = input.shape[0];
        let mut out = Tensor::zeros(&[n, rows.output, cols.output, channels]);

        for b in 0..n {
            for oy in 0..rows.output {
                for ox in 0..cols.output {
                    let base = out.offset4(b, oy, ox, 0);
                    out.data[base..base + channels].copy_from_slice(&self.biases);
                    for ky in 0..kh {
                        let Some(iy) = rows.tap(oy, ky, self.stride) else { continue };
                        for kx in 0..kw {
                            let Some(ix) = cols.tap(ox, kx, self.stride) else { continue };
                            let in_base = input.offset4(b, iy, ix, 0);
                            let w_base = (ky * kw + kx) * channels;
                            for c in 0..channels {
                                out.data[base + c] += input.data[in_base + c] * self.weights.data[w_base + c];
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn forward(&self, name: &str, input: &Tensor) -> Result<Tensor> {
        Ok(self.activation.apply(&self.linear(name, input)?))
    }

    pub fn backward(&self, name: &str, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let z = self.linear(name, input)?;
        let dz = self.activation.backprop(&z, grad_output)?;
        let (rows, cols, [kh, kw, channels]) = self.geometry(name, &input.shape)?;
        let mut grad = Tensor::zeros(&input.shape);

        for b in 0..input.shape[0] {
            for oy in 0..rows.output {
                for ox in 0..cols.output {
                    let g_base = dz.offset4(b, oy, ox, 0);
                    for ky in 0..kh {
                        let Some(iy) = rows.tap(oy, ky, self.stride) else { continue };
                        for kx in 0..kw {
                            let Some(ix) = cols.tap(ox, kx, self.stride) else { continue };
                            let in_base = grad.offset4(b, iy, ix, 0);
                            let w_base = (ky * kw + kx) * channels;
                            for c in 0..channels {
                                grad.data[in_base + c] += dz.data[g_base + c] * self.weights.data[w_base + c];
                            }
                        }
                    }
                }
            }
        }
        Ok(grad)
    }
}
