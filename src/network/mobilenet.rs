use rand::Rng;

use crate::activation::activation::ActivationFunction;
use crate::layers::{BatchNorm, Conv2d, Dense, DepthwiseConv2d, Layer, LayerKind, Padding};
use crate::network::metadata::{ModelMetadata, DEFAULT_BINARY_LABELS};
use crate::network::network::Network;

/// Builds a small, randomly initialized classifier laid out like a trimmed
/// MobileNetV2 with a single sigmoid output.
///
/// Layer names follow the Keras MobileNetV2 naming (`Conv1`, `Conv_1`,
/// `out_relu`, ...) so target-layer resolution behaves the same way it does
/// for the real architecture. The weights are untrained; this is for smoke
/// tests and demos, not for diagnosis.
pub fn mobilenet_like<R: Rng + ?Sized>(input_size: usize, rng: &mut R) -> Network {
    let relu6 = ActivationFunction::ReLU6;
    let mut layers = Vec::new();

    // Stem: 3x3 stride-2 convolution.
    layers.push(Layer::new("Conv1", LayerKind::Conv2d(
        Conv2d::new(3, 8, 3, 2, Padding::Same, ActivationFunction::Identity, rng),
    )));
    layers.push(Layer::new("bn_Conv1", LayerKind::BatchNorm(BatchNorm::identity(8))));
    layers.push(Layer::activation("Conv1_relu", relu6));

    // Two depthwise-separable blocks, the second one downsampling.
    push_block(&mut layers, "expanded_conv", 8, 8, 1, rng);
    push_block(&mut layers, "block_1", 8, 16, 2, rng);

    // Head: pointwise expansion, then the spatial layer Grad-CAM explains.
    layers.push(Layer::new("Conv_1", LayerKind::Conv2d(
        Conv2d::new(16, 32, 1, 1, Padding::Same, ActivationFunction::Identity, rng),
    )));
    layers.push(Layer::new("Conv_1_bn", LayerKind::BatchNorm(BatchNorm::identity(32))));
    layers.push(Layer::activation("out_relu", relu6));
    layers.push(Layer::new("global_average_pooling2d", LayerKind::GlobalAveragePool));
    layers.push(Layer::new("dense", LayerKind::Dense(
        Dense::new(1, 32, ActivationFunction::Sigmoid, rng),
    )));

    Network::new("mobilenet_like", [input_size, input_size, 3], layers).with_metadata(ModelMetadata {
        description: Some("Randomly initialized MobileNet-shaped binary classifier".into()),
        output_labels: Some(DEFAULT_BINARY_LABELS.iter().map(|s| s.to_string()).collect()),
    })
}

fn push_block<R: Rng + ?Sized>(
    layers: &mut Vec<Layer>,
    prefix: &str,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    rng: &mut R,
) {
    layers.push(Layer::new(format!("{}_depthwise", prefix), LayerKind::DepthwiseConv2d(
        DepthwiseConv2d::new(in_channels, 3, stride, Padding::Same, ActivationFunction::Identity, rng),
    )));
    layers.push(Layer::new(
        format!("{}_depthwise_BN", prefix),
        LayerKind::BatchNorm(BatchNorm::identity(in_channels)),
    ));
    layers.push(Layer::activation(format!("{}_depthwise_relu", prefix), ActivationFunction::ReLU6));
    layers.push(Layer::new(format!("{}_project", prefix), LayerKind::Conv2d(
        Conv2d::new(in_channels, out_channels, 1, 1, Padding::Same, ActivationFunction::Identity, rng),
    )));
    layers.push(Layer::new(
        format!("{}_project_BN", prefix),
        LayerKind::BatchNorm(BatchNorm::identity(out_channels)),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_builds_valid_network() {
        let net = mobilenet_like(32, &mut StdRng::seed_from_u64(1));
        net.validate().unwrap();
        let shapes = net.output_shapes().unwrap();
        let conv_1 = net.layer_index("Conv_1").unwrap();
        assert_eq!(shapes[conv_1], vec![1, 8, 8, 32]);
        assert_eq!(shapes.last().unwrap(), &vec![1, 1]);
    }

    #[test]
    fn test_output_is_a_probability() {
        let net = mobilenet_like(16, &mut StdRng::seed_from_u64(2));
        let out = net.warm_up().unwrap();
        assert!(out.data[0] > 0.0 && out.data[0] < 1.0);
    }
}
