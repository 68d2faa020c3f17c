pub mod heatmaps;
pub mod home;
pub mod predict;
