//! Epidemia - stochastic agent-based epidemic simulation
//!
//! A synthetic population is spread over non-overlapping cities and nested
//! social clusters, then simulated day by day. Infectious people expose
//! their clusters and a city; susceptible people draw against the exposure
//! they meet.

pub mod core;
pub mod epidemic;
pub mod sampling;

pub use crate::core::{ConfigSnapshot, EpiError, Result, SimulationConfig};
pub use crate::epidemic::{DailySnapshot, SimulationOutput, World};
