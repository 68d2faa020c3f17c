pub mod metadata;
pub mod mobilenet;
pub mod network;

pub use metadata::ModelMetadata;
pub use network::Network;
