//! Epidemic simulation: population structure, disease state and the daily loop

pub mod build;
pub mod city;
pub mod cluster;
pub mod counter;
pub mod hierarchy;
pub mod nesting;
pub mod output;
pub mod person;
pub mod simulation;
pub mod stream;
pub mod world;

pub use build::CityPlan;
pub use city::City;
pub use cluster::{Cluster, ClusterArena};
pub use counter::{CounterHierarchy, CounterNode, InfectionCounter, Transition};
pub use hierarchy::Hierarchy;
pub use output::{CitySnapshot, DailySnapshot, HistoryLog, SimulationOutput, SimulationStats, SnapshotField};
pub use person::{DiseaseParams, Person};
pub use stream::{spawn_run, DayStatus, SnapshotStream};
pub use world::World;
