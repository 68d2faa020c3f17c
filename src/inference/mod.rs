pub mod classifier;
pub mod preprocess;

pub use classifier::{classify, interpret, Prediction};
pub use preprocess::{decode_image, prepare, prepare_bytes, PreparedImage};
