use std::sync::Arc;

use image::{DynamicImage, RgbImage};
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::explain::gradcam::{grad_cam, Heatmap};
use crate::explain::overlay::{encode_jpeg, render_overlay};
use crate::explain::target::{resolve_target_layer, TargetLayer};
use crate::inference::classifier::{classify, Prediction};
use crate::inference::preprocess::{decode_image, prepare};
use crate::network::network::Network;

/// A loaded network paired with its resolved Grad-CAM layer.
///
/// Constructed once at startup and shared read-only; `analyze` takes
/// `&self`, so one `Explainer` serves any number of threads.
#[derive(Debug, Clone)]
pub struct Explainer {
    network: Arc<Network>,
    target: TargetLayer,
}

/// Everything produced for one image.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub prediction: Prediction,
    pub heatmap: Heatmap,
    pub overlay: RgbImage,
}

impl Analysis {
    pub fn overlay_jpeg(&self) -> Result<Vec<u8>> {
        encode_jpeg(&self.overlay)
    }
}

impl Explainer {
    pub fn new(network: Arc<Network>, target: TargetLayer) -> Explainer {
        Explainer { network, target }
    }

    /// Loads the model artifact, checks it against the configured input
    /// size, warms it up and resolves the target layer.
    pub fn load(config: &ModelConfig) -> Result<Explainer> {
        let network = Network::load_json(&config.path)?;
        Explainer::from_network(network, config)
    }

    pub fn from_network(network: Network, config: &ModelConfig) -> Result<Explainer> {
        let size = config.input_size as usize;
        if network.input_shape != [size, size, 3] {
            return Err(Error::shape("model input vs configured input_size", &[size, size, 3], &network.input_shape));
        }

        info!(model = %network.name, layers = network.layers.len(), "warming up model");
        network.warm_up()?;

        let target = resolve_target_layer(&network, config.target_layer.as_deref(), config.candidate_layers.as_slice())?;
        info!(model = %network.name, layer = %target.name, shape = ?target.shape, "model ready");
        Ok(Explainer::new(Arc::new(network), target))
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn target(&self) -> &TargetLayer {
        &self.target
    }

    pub fn input_size(&self) -> u32 {
        self.network.input_shape[0] as u32
    }

    /// Decodes `bytes` and runs [`Explainer::analyze_image`].
    pub fn analyze(&self, bytes: &[u8]) -> Result<Analysis> {
        self.analyze_image(&decode_image(bytes)?)
    }

    /// Classifies the image and explains the prediction. Both passes read
    /// the same preprocessed tensor.
    pub fn analyze_image(&self, image: &DynamicImage) -> Result<Analysis> {
        let prepared = prepare(image, self.input_size());

        let prediction = classify(&self.network, &prepared.tensor)?;
        let cam = grad_cam(&self.network, &prepared.tensor, &self.target)?;
        let overlay = render_overlay(&cam.heatmap, &prepared.resized)?;

        debug!(
            label = %prediction.label,
            confidence = prediction.confidence,
            class_index = cam.class_index,
            "analysis complete"
        );
        Ok(Analysis { prediction, heatmap: cam.heatmap, overlay })
    }
}
