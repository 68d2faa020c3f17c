pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod explain;
pub mod inference;
pub mod pipeline;
pub mod storage;
pub mod config;
pub mod error;

// Convenience re-exports
pub use math::tensor::Tensor;
pub use activation::activation::ActivationFunction;
pub use layers::{Layer, LayerKind};
pub use network::network::Network;
pub use network::metadata::ModelMetadata;
pub use explain::{grad_cam, Heatmap, TargetLayer};
pub use inference::Prediction;
pub use pipeline::{Analysis, Explainer};
pub use storage::Storage;
pub use config::ServiceConfig;
pub use error::{Error, ErrorKind, Result};
