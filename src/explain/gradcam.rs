use tracing::debug;

use crate::error::{Error, Result};
use crate::explain::target::TargetLayer;
use crate::math::tensor::Tensor;
use crate::network::network::Network;

/// Added to the maximum before normalizing so an all-zero map stays zero.
pub const NORMALIZE_EPSILON: f64 = 1e-8;

/// Single-channel saliency grid, row-major, values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    pub height: usize,
    pub width: usize,
    pub values: Vec<f64>,
}

impl Heatmap {
    pub fn get(&self, y: usize, x: usize) -> f64 {
        self.values[y * self.width + x]
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Result of one Grad-CAM pass.
#[derive(Debug, Clone)]
pub struct GradCam {
    pub heatmap: Heatmap,
    /// Output unit the map explains.
    pub class_index: usize,
    /// Prediction produced by the same recorded forward pass.
    pub prediction: Tensor,
}

/// Output unit to explain: the only unit of a sigmoid head, otherwise the
/// highest-scoring class of the first batch item.
pub fn class_channel(prediction: &Tensor) -> Result<usize> {
    let [n, classes] = prediction.dims2("prediction")?;
    if n == 0 || classes == 0 {
        return Err(Error::shape("prediction", &[1, 1], &prediction.shape));
    }
    if classes == 1 {
        return Ok(0);
    }
    let row = &prediction.data[..classes];
    Ok(row
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0))
}

/// Mean of the gradient over batch, height and width: one weight per channel.
pub fn pool_gradients(grads: &Tensor) -> Result<Vec<f64>> {
    let [n, h, w, c] = grads.dims4("activation gradient")?;
    let count = (n * h * w).max(1) as f64;
    let mut pooled = vec![0.0; c];
    for pixel in grads.data.chunks(c.max(1)) {
        for (acc, &g) in pooled.iter_mut().zip(pixel) {
            *acc += g;
        }
    }
    Ok(pooled.into_iter().map(|s| s / count).collect())
}

/// Channel-weighted sum of the first batch item's activations, clamped at
/// zero and divided by `max + NORMALIZE_EPSILON`.
pub fn weighted_activation_map(activations: &Tensor, weights: &[f64]) -> Result<Heatmap> {
    let [_, h, w, c] = activations.dims4("target activations")?;
    if weights.len() != c {
        return Err(Error::shape("channel weights", &[c], &[weights.len()]));
    }
    let first = &activations.data[..h * w * c];
    let raw: Vec<f64> = first
        .chunks(c.max(1))
        .map(|pixel| pixel.iter().zip(weights).map(|(a, wt)| a * wt).sum::<f64>().max(0.0))
        .collect();

    let max = raw.iter().copied().fold(0.0, f64::max);
    let denom = max + NORMALIZE_EPSILON;
    Ok(Heatmap {
        height: h,
        width: w,
        values: raw.into_iter().map(|v| v / denom).collect(),
    })
}

/// Gradient-weighted class activation map of `input` at `target`.
pub fn grad_cam(network: &Network, input: &Tensor, target: &TargetLayer) -> Result<GradCam> {
    let layer = network.layers.get(target.index).filter(|l| l.name == target.name).ok_or_else(|| {
        Error::LayerNotFound(format!("{} (index {})", target.name, target.index))
    })?;

    let trace = network.forward_trace(input)?;
    let activations = &trace[target.index + 1];
    activations.dims4(&format!("target layer '{}'", layer.name))?;

    let prediction = trace[trace.len() - 1].clone();
    let class_index = class_channel(&prediction)?;
    let [n, classes] = prediction.dims2("prediction")?;

    // Seed: ∂(Σ_batch prediction[b, class]) / ∂prediction.
    let mut seed = Tensor::zeros(&[n, classes]);
    for b in 0..n {
        seed.data[b * classes + class_index] = 1.0;
    }

    let grads = network.backward_to(&trace, target.index, seed)?;
    if grads.shape != activations.shape {
        return Err(Error::Gradient(format!(
            "gradient shape {:?} does not match activations {:?} at '{}'",
            grads.shape, activations.shape, layer.name
        )));
    }
    if !grads.is_finite() {
        return Err(Error::Gradient(format!("non-finite gradient at '{}'", layer.name)));
    }

    let weights = pool_gradients(&grads)?;
    let heatmap = weighted_activation_map(activations, &weights)?;
    debug!(
        layer = %layer.name,
        class_index,
        height = heatmap.height,
        width = heatmap.width,
        "computed grad-cam heatmap"
    );

    Ok(GradCam { heatmap, class_index, prediction })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::explain::target::{resolve_target_layer, DEFAULT_CANDIDATE_LAYERS};
    use crate::layers::{Conv2d, Dense, Layer, LayerKind, Padding};
    use crate::network::mobilenet::mobilenet_like;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// 2x2 single-channel input → identity 1x1 conv (2 filters) → GAP → dense.
    fn hand_built(head: Vec<f64>, activation: ActivationFunction) -> Network {
        let classes = head.len() / 2;
        Network::new("hand", [2, 2, 1], vec![
            Layer::new("Conv_1", LayerKind::Conv2d(Conv2d {
                stride: 1,
                padding: Padding::Valid,
                weights: Tensor::from_vec(&[1, 1, 1, 2], vec![1.0, -1.0]).unwrap(),
                biases: vec![0.0, 0.0],
                activation: ActivationFunction::Identity,
            })),
            Layer::new("gap", LayerKind::GlobalAveragePool),
            Layer::new("head", LayerKind::Dense(Dense {
                weights: Tensor::from_vec(&[2, classes], head).unwrap(),
                biases: vec![0.0; classes],
                activation,
            })),
        ])
    }

    fn target(net: &Network) -> TargetLayer {
        resolve_target_layer(net, None, &DEFAULT_CANDIDATE_LAYERS).unwrap()
    }

    #[test]
    fn test_pool_gradients_averages_batch_and_space() {
        let grads = Tensor::from_vec(&[2, 1, 2, 2], vec![1.0, 0.0, 3.0, 0.0, 5.0, 4.0, 7.0, 8.0]).unwrap();
        assert_eq!(pool_gradients(&grads).unwrap(), vec![4.0, 3.0]);
    }

    #[test]
    fn test_weighted_map_clamps_and_normalizes() {
        let acts = Tensor::from_vec(&[1, 1, 3, 2], vec![1.0, 0.0, 2.0, 0.0, 0.0, 1.0]).unwrap();
        let map = weighted_activation_map(&acts, &[1.0, -1.0]).unwrap();
        assert_eq!((map.height, map.width), (1, 3));
        assert!((map.values[0] - 0.5).abs() < 1e-6);
        assert!((map.values[1] - 1.0).abs() < 1e-6);
        assert_eq!(map.values[2], 0.0);
    }

    #[test]
    fn test_all_zero_map_stays_zero() {
        let acts = Tensor::zeros(&[1, 2, 2, 3]);
        let map = weighted_activation_map(&acts, &[1.0, 1.0, 1.0]).unwrap();
        assert!(map.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_hand_computed_sigmoid_map() {
        // Class score rises with channel 0 (the input itself), so the map is
        // the input pattern clamped at zero and normalized.
        let net = hand_built(vec![1.0, 0.0], ActivationFunction::Sigmoid);
        let input = Tensor::from_vec(&[1, 2, 2, 1], vec![0.0, 1.0, 2.0, -4.0]).unwrap();
        let cam = grad_cam(&net, &input, &target(&net)).unwrap();
        assert_eq!(cam.class_index, 0);
        let v = &cam.heatmap.values;
        assert_eq!(v[0], 0.0);
        assert!((v[1] - 0.5).abs() < 1e-6);
        assert!((v[2] - 1.0).abs() < 1e-6);
        assert_eq!(v[3], 0.0);
    }

    #[test]
    fn test_softmax_explains_argmax_class() {
        // class 0 reads channel 0, class 1 reads channel 1 (= -input).
        let net = hand_built(vec![1.0, 0.0, 0.0, 1.0], ActivationFunction::Softmax);
        let input = Tensor::from_vec(&[1, 2, 2, 1], vec![-1.0, -2.0, -3.0, 1.0]).unwrap();
        let cam = grad_cam(&net, &input, &target(&net)).unwrap();
        assert_eq!(cam.class_index, 1);
        assert!((cam.heatmap.max() - 1.0).abs() < 1e-6);
        assert_eq!(cam.heatmap.values[3], 0.0);
    }

    #[test]
    fn test_mobilenet_map_properties_and_determinism() {
        let net = mobilenet_like(32, &mut StdRng::seed_from_u64(21));
        let t = target(&net);
        assert_eq!(t.name, "Conv_1");
        let input = Tensor::he(&[1, 32, 32, 3], 1, &mut StdRng::seed_from_u64(4)).map(f64::abs);

        let a = grad_cam(&net, &input, &t).unwrap();
        let b = grad_cam(&net, &input, &t).unwrap();
        assert_eq!(a.heatmap, b.heatmap);
        assert_eq!(a.prediction, b.prediction);

        assert_eq!((a.heatmap.height, a.heatmap.width), (8, 8));
        assert!(a.heatmap.min() >= 0.0);
        let max = a.heatmap.max();
        assert!(max == 0.0 || (max - 1.0).abs() < 1e-6, "max was {}", max);
    }

    #[test]
    fn test_stale_target_is_rejected() {
        let net = hand_built(vec![1.0, 0.0], ActivationFunction::Sigmoid);
        let stale = TargetLayer { index: 1, name: "Conv_1".into(), shape: vec![1, 2, 2, 2] };
        let input = Tensor::zeros(&[1, 2, 2, 1]);
        assert!(matches!(grad_cam(&net, &input, &stale), Err(Error::LayerNotFound(_))));
    }
}
