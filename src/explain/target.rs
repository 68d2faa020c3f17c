use tracing::debug;

use crate::error::{Error, Result};
use crate::network::network::Network;

/// Layer names tried first, in order. They cover the last spatial layers of
/// the MobileNetV2 (`Conv_1`, `out_relu`, `block_16_expand_relu`) and
/// MobileNetV1 (`conv_pw_13_relu`) families.
pub const DEFAULT_CANDIDATE_LAYERS: [&str; 4] = [
    "Conv_1",
    "out_relu",
    "conv_pw_13_relu",
    "block_16_expand_relu",
];

/// The layer whose activations a heatmap is computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLayer {
    pub index: usize,
    pub name: String,
    /// Output shape for a batch of one: `[1, h, w, c]`.
    pub shape: Vec<usize>,
}

/// First candidate name that exists on the network with a rank-4 output.
pub fn find_candidate<S: AsRef<str>>(
    network: &Network,
    shapes: &[Vec<usize>],
    candidates: &[S],
) -> Option<usize> {
    candidates
        .iter()
        .filter_map(|name| network.layer_index(name.as_ref()))
        .find(|&idx| shapes[idx].len() == 4)
}

/// Last layer, in declaration order, whose output has rank 4.
pub fn last_spatial_layer(shapes: &[Vec<usize>]) -> Option<usize> {
    shapes.iter().rposition(|shape| shape.len() == 4)
}

/// Resolves the target layer: an explicit name if one is configured,
/// otherwise the candidate list, otherwise the reverse scan.
pub fn resolve_target_layer<S: AsRef<str>>(
    network: &Network,
    explicit: Option<&str>,
    candidates: &[S],
) -> Result<TargetLayer> {
    let shapes = network.output_shapes()?;

    let index = match explicit {
        Some(name) => {
            let idx = network
                .layer_index(name)
                .ok_or_else(|| Error::LayerNotFound(name.to_owned()))?;
            if shapes[idx].len() != 4 {
                return Err(Error::rank(format!("target layer '{}'", name), 4, &shapes[idx]));
            }
            idx
        }
        None => find_candidate(network, &shapes, candidates)
            .or_else(|| last_spatial_layer(&shapes))
            .ok_or_else(|| Error::NoSpatialLayer(network.name.clone()))?,
    };

    let target = TargetLayer {
        index,
        name: network.layers[index].name.clone(),
        shape: shapes[index].clone(),
    };
    debug!(layer = %target.name, shape = ?target.shape, "resolved target layer");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::layers::{Conv2d, Dense, Layer, LayerKind, Padding};
    use crate::math::tensor::Tensor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn net(conv_names: &[&str]) -> Network {
        let mut rng = StdRng::seed_from_u64(9);
        let mut layers: Vec<Layer> = conv_names
            .iter()
            .map(|n| Layer::new(*n, LayerKind::Conv2d(
                Conv2d::new(1, 1, 1, 1, Padding::Same, ActivationFunction::ReLU, &mut rng),
            )))
            .collect();
        layers.push(Layer::new("gap", LayerKind::GlobalAveragePool));
        layers.push(Layer::new("head", LayerKind::Dense(Dense {
            weights: Tensor::filled(&[1, 1], 1.0),
            biases: vec![0.0],
            activation: ActivationFunction::Sigmoid,
        })));
        Network::new("t", [4, 4, 1], layers)
    }

    #[test]
    fn test_prefers_candidate_order() {
        let n = net(&["out_relu", "Conv_1", "late"]);
        let t = resolve_target_layer(&n, None, &DEFAULT_CANDIDATE_LAYERS).unwrap();
        assert_eq!(t.name, "Conv_1");
        assert_eq!(t.index, 1);
        assert_eq!(t.shape, vec![1, 4, 4, 1]);
    }

    #[test]
    fn test_falls_back_to_last_spatial_layer() {
        let n = net(&["a", "b", "c"]);
        let t = resolve_target_layer(&n, None, &DEFAULT_CANDIDATE_LAYERS).unwrap();
        assert_eq!(t.name, "c");
    }

    #[test]
    fn test_candidate_without_spatial_output_is_skipped() {
        let mut n = net(&["a"]);
        n.layers[1].name = "Conv_1".into(); // the pooling layer, rank 2
        let t = resolve_target_layer(&n, None, &DEFAULT_CANDIDATE_LAYERS).unwrap();
        assert_eq!(t.name, "a");
    }

    #[test]
    fn test_no_spatial_layer_is_an_error() {
        let n = Network::new("flat_only", [1, 1, 2], vec![
            Layer::new("flat", LayerKind::Flatten),
            Layer::new("head", LayerKind::Dense(Dense {
                weights: Tensor::zeros(&[2, 1]),
                biases: vec![0.0],
                activation: ActivationFunction::Sigmoid,
            })),
        ]);
        assert!(last_spatial_layer(&n.output_shapes().unwrap()).is_none());
        let err = resolve_target_layer(&n, None, &DEFAULT_CANDIDATE_LAYERS).unwrap_err();
        assert!(matches!(err, Error::NoSpatialLayer(_)));
    }

    #[test]
    fn test_explicit_name() {
        let n = net(&["a", "b"]);
        assert_eq!(resolve_target_layer(&n, Some("a"), &DEFAULT_CANDIDATE_LAYERS).unwrap().index, 0);
        assert!(matches!(
            resolve_target_layer(&n, Some("nope"), &DEFAULT_CANDIDATE_LAYERS),
            Err(Error::LayerNotFound(_))
        ));
        assert!(matches!(
            resolve_target_layer(&n, Some("head"), &DEFAULT_CANDIDATE_LAYERS),
            Err(Error::Rank { .. })
        ));
    }
}
