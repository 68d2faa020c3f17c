use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};
use crate::layers::conv::{Axis, Padding};
use crate::math::tensor::Tensor;

/// Max pooling over square windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPool2d {
    pub pool: usize,
    pub stride: usize,
    #[serde(default = "valid")]
    pub padding: Padding,
}

fn valid() -> Padding {
    Padding::Valid
}

impl MaxPool2d {
    pub fn new(pool: usize, stride: usize) -> MaxPool2d {
        MaxPool2d { pool, stride, padding: Padding::Valid }
    }

    fn geometry(&self, name: &str, input: &[usize]) -> Result<(Axis, Axis)> {
        let (h, w) = match input {
            &[_, h, w, _] => (h, w),
            other => return Err(Error::rank(name, 4, other)),
        };
        Ok((
            Axis::resolve(name, h, self.pool, self.stride, self.padding)?,
            Axis::resolve(name, w, self.pool, self.stride, self.padding)?,
        ))
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        let (rows, cols) = self.geometry(name, input)?;
        Ok(vec![input[0], rows.output, cols.output, input[3]])
    }

    /// For every output element, the flat input offset that won the max.
    fn winners(&self, name: &str, input: &Tensor) -> Result<(Vec<usize>, Vec<usize>)> {
        let (rows, cols) = self.geometry(name, &input.shape)?;
        let [n, _, _, channels] = input.dims4(name)?;
        let out_shape = vec![n, rows.output, cols.output, channels];
        let mut winners = Vec::with_capacity(out_shape.iter().product());

        for b in 0..n {
            for oy in 0..rows.output {
                for ox in 0..cols.output {
                    for c in 0..channels {
                        let mut best: Option<usize> = None;
                        for ky in 0..self.pool {
                            let Some(iy) = rows.tap(oy, ky, self.stride) else { continue };
                            for kx in 0..self.pool {
                                let Some(ix) = cols.tap(ox, kx, self.stride) else { continue };
                                let idx = input.offset4(b, iy, ix, c);
                                // Strict `>` keeps the first maximum on ties.
                                if best.map_or(true, |bi| input.data[idx] > input.data[bi]) {
                                    best = Some(idx);
                                }
                            }
                        }
                        let idx = best.ok_or_else(|| {
                            Error::InvalidModel(format!("{}: pooling window covers no input", name))
                        })?;
                        winners.push(idx);
                    }
                }
            }
        }
        Ok((out_shape, winners))
    }

    pub fn forward(&self, name: &str, input: &Tensor) -> Result<Tensor> {
        let (shape, winners) = self.winners(name, input)?;
        Tensor::from_vec(&shape, winners.into_iter().map(|i| input.data[i]).collect())
    }

    pub fn backward(&self, name: &str, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let (shape, winners) = self.winners(name, input)?;
        if grad_output.shape != shape {
            return Err(Error::shape(format!("{} gradient", name), &shape, &grad_output.shape));
        }
        let mut grad = Tensor::zeros(&input.shape);
        for (&idx, &g) in winners.iter().zip(&grad_output.data) {
            grad.data[idx] += g;
        }
        Ok(grad)
    }
}

/// `[n, h, w, c]` → `[n, c]` by averaging over the spatial axes.
pub fn global_average_pool_shape(name: &str, input: &[usize]) -> Result<Vec<usize>> {
    match input {
        &[n, _, _, c] => Ok(vec![n, c]),
        other => Err(Error::rank(name, 4, other)),
    }
}

pub fn global_average_pool(name: &str, input: &Tensor) -> Result<Tensor> {
    let [n, h, w, c] = input.dims4(name)?;
    let area = (h * w).max(1) as f64;
    let mut out = Tensor::zeros(&[n, c]);
    for b in 0..n {
        for pixel in input.data[b * h * w * c..(b + 1) * h * w * c].chunks(c) {
            for (acc, &v) in out.data[b * c..(b + 1) * c].iter_mut().zip(pixel) {
                *acc += v;
            }
        }
    }
    Ok(out.map(|s| s / area))
}

pub fn global_average_pool_backward(name: &str, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
    let [n, h, w, c] = input.dims4(name)?;
    if grad_output.shape != [n, c] {
        return Err(Error::shape(format!("{} gradient", name), &[n, c], &grad_output.shape));
    }
    let area = (h * w).max(1) as f64;
    let mut grad = Tensor::zeros(&input.shape);
    for b in 0..n {
        let g = &grad_output.data[b * c..(b + 1) * c];
        for pixel in grad.data[b * h * w * c..(b + 1) * h * w * c].chunks_mut(c) {
            for (dst, &gv) in pixel.iter_mut().zip(g) {
                *dst = gv / area;
            }
        }
    }
    Ok(grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_pool_routes_gradient_to_winner() {
        let pool = MaxPool2d::new(2, 2);
        let input = Tensor::from_vec(&[1, 2, 2, 1], vec![1.0, 4.0, 3.0, 2.0]).unwrap();
        let out = pool.forward("p", &input).unwrap();
        assert_eq!(out.shape, vec![1, 1, 1, 1]);
        assert_eq!(out.data, vec![4.0]);

        let g = Tensor::from_vec(&[1, 1, 1, 1], vec![2.5]).unwrap();
        let grad = pool.backward("p", &input, &g).unwrap();
        assert_eq!(grad.data, vec![0.0, 2.5, 0.0, 0.0]);
    }

    #[test]
    fn test_global_average_pool_forward_and_backward() {
        let input = Tensor::from_vec(&[1, 2, 1, 2], vec![1.0, 10.0, 3.0, 20.0]).unwrap();
        let out = global_average_pool("g", &input).unwrap();
        assert_eq!(out.shape, vec![1, 2]);
        assert_eq!(out.data, vec![2.0, 15.0]);

        let g = Tensor::from_vec(&[1, 2], vec![1.0, 4.0]).unwrap();
        let grad = global_average_pool_backward("g", &input, &g).unwrap();
        assert_eq!(grad.data, vec![0.5, 2.0, 0.5, 2.0]);
    }

    #[test]
    fn test_global_average_pool_requires_rank4() {
        let input = Tensor::zeros(&[1, 3]);
        assert!(matches!(global_average_pool("g", &input), Err(Error::Rank { .. })));
    }
}
