pub mod config;
pub mod error;
pub mod types;

pub use config::{ClusterType, ConfigSnapshot, SimulationConfig};
pub use error::{EpiError, Result};
