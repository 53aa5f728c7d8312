#[allow(clippy::module_inception)]
pub mod error;
pub mod executor;
pub mod graph;

pub use error::ConfigError;
pub use executor::EngineError;
pub use graph::GraphError;
