pub mod gradcam;
pub mod overlay;
pub mod target;

pub use gradcam::{grad_cam, GradCam, Heatmap};
pub use target::{resolve_target_layer, TargetLayer, DEFAULT_CANDIDATE_LAYERS};
