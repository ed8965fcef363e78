//! Simulation configuration with documented constants
//!
//! Settings load from TOML through serde. Every section falls back to the
//! defaults below, so a file only has to name what it changes. Cluster types
//! are a registry keyed by name; the `"*"` entry supplies values for any field
//! a named type leaves out, and built-in defaults cover whatever is left.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::{EpiError, Result};
use crate::core::types::{ClusterTypeId, Day};

/// Cluster type key whose values act as defaults for every other type
pub const WILDCARD_CLUSTER: &str = "*";

/// How the configured `infectiousness` becomes the per-exposure coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfectiousnessMode {
    /// `infectiousness` is added to a cluster as-is for every infectious member
    Direct,
    /// `infectiousness` is the expected number of onward infections; it is
    /// divided by the exposure time (mean recovery less mean gestation, at
    /// least one day) and the cluster size RMS factor
    #[default]
    Reproduction,
}

/// Mean and standard deviation of a log-normally distributed duration, in days
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationConfig {
    pub mean: f64,
    pub sd: f64,
}

impl DurationConfig {
    pub fn new(mean: f64, sd: f64) -> Self {
        Self { mean, sd }
    }

    /// A duration with no variance
    pub fn fixed(days: f64) -> Self {
        Self { mean: days, sd: 0.0 }
    }
}

/// Daily loop termination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hard stop, in simulated days
    pub max_days: Day,

    /// The run never stops on its own before this day
    pub warmup_days: Day,

    /// The run continues while more than this fraction of the population
    /// is infected, even if the infected count is falling
    pub stop_fraction: f64,

    /// Attach a per-city breakdown to every daily snapshot
    pub record_cities: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_days: 1000,
            warmup_days: 14,
            stop_fraction: 0.001,
            record_cities: false,
        }
    }
}

/// City generation and city-level exposure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CityConfig {
    /// Number of cities. 0 derives the count from the population.
    pub count: usize,

    /// Lower bound for a derived city count
    pub min_count: usize,

    /// Explicit smallest city population. 0 derives it.
    pub min_pop: u32,

    /// Explicit largest city population. 0 derives it.
    pub max_pop: u32,

    /// Derived count is `population^auto_power / auto_divider`
    pub auto_power: f64,
    pub auto_divider: f64,

    /// Derived largest city as a share of the population
    pub auto_max_pop: f64,

    /// Derived smallest city is `(population - max_pop) / (count * min_size_multiplier)`
    pub min_size_multiplier: f64,

    /// People per unit area for the smallest city
    pub min_density: f64,

    /// People per unit area for the largest city
    pub max_density: f64,

    /// Weight of city-wide exposure relative to cluster exposure
    pub exposure: f64,

    /// Larger cities dilute per-capita exposure by `(pop / min_pop)^pop_ratio_power`
    pub pop_ratio_power: f64,

    /// Passes over all city pairs before placement gives up
    pub max_placement_attempts: usize,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            count: 0,
            min_count: 10,
            min_pop: 0,
            max_pop: 0,
            auto_power: 0.67,
            auto_divider: 250.0,
            auto_max_pop: 0.3,
            min_size_multiplier: 2.5,
            min_density: 1000.0,
            max_density: 5000.0,
            exposure: 0.001,
            pop_ratio_power: 0.5,
            max_placement_attempts: 1000,
        }
    }
}

/// Raw cluster type settings as written in the config file
///
/// Every field is optional so a named type can inherit from `"*"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterTypeConfig {
    pub min_pop: Option<u32>,
    pub max_pop: Option<u32>,
    pub average_pop: Option<u32>,
    /// Largest leaf cluster as a share of its city's population
    pub max_proportion: Option<f64>,
    pub nest_average: Option<u32>,
    pub nest_min: Option<u32>,
    pub nest_max: Option<u32>,
    /// Nesting continues only while a level would have more clusters than this
    pub min_nested_count: Option<u32>,
    /// Deepest nesting level; absent means unlimited
    pub max_depth: Option<u32>,
    /// Probability that a parent is drawn from the child's own city
    pub same_city: Option<f64>,
    /// Exposure multiplier applied at each step up or down the forest
    pub attenuation: Option<f64>,
}

impl ClusterTypeConfig {
    /// Fill unset fields from `defaults`
    pub fn inherit(&self, defaults: &ClusterTypeConfig) -> ClusterTypeConfig {
        ClusterTypeConfig {
            min_pop: self.min_pop.or(defaults.min_pop),
            max_pop: self.max_pop.or(defaults.max_pop),
            average_pop: self.average_pop.or(defaults.average_pop),
            max_proportion: self.max_proportion.or(defaults.max_proportion),
            nest_average: self.nest_average.or(defaults.nest_average),
            nest_min: self.nest_min.or(defaults.nest_min),
            nest_max: self.nest_max.or(defaults.nest_max),
            min_nested_count: self.min_nested_count.or(defaults.min_nested_count),
            max_depth: self.max_depth.or(defaults.max_depth),
            same_city: self.same_city.or(defaults.same_city),
            attenuation: self.attenuation.or(defaults.attenuation),
        }
    }
}

/// A fully resolved cluster type
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterType {
    pub id: ClusterTypeId,
    pub name: String,
    pub min_pop: u32,
    pub max_pop: u32,
    pub average_pop: u32,
    pub max_proportion: f64,
    pub nest_average: u32,
    pub nest_min: u32,
    pub nest_max: u32,
    pub min_nested_count: u32,
    pub max_depth: Option<u32>,
    pub same_city: f64,
    pub attenuation: f64,
}

impl ClusterType {
    fn resolve(id: ClusterTypeId, name: &str, raw: &ClusterTypeConfig) -> Result<Self> {
        let missing = |field: &str| {
            EpiError::Config(format!("cluster type '{}' does not set {}", name, field))
        };

        let resolved = Self {
            id,
            name: name.to_string(),
            min_pop: raw.min_pop.ok_or_else(|| missing("min_pop"))?,
            max_pop: raw.max_pop.ok_or_else(|| missing("max_pop"))?,
            average_pop: raw.average_pop.ok_or_else(|| missing("average_pop"))?,
            max_proportion: raw.max_proportion.unwrap_or(1.0),
            nest_average: raw.nest_average.unwrap_or(10),
            nest_min: raw.nest_min.unwrap_or(2),
            nest_max: raw.nest_max.unwrap_or(20),
            min_nested_count: raw.min_nested_count.unwrap_or(3),
            max_depth: raw.max_depth,
            same_city: raw.same_city.unwrap_or(0.9),
            attenuation: raw.attenuation.unwrap_or(0.5),
        };
        resolved.validate().map_err(EpiError::Config)?;
        Ok(resolved)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_pop == 0 {
            return Err(format!("cluster type '{}': min_pop must be positive", self.name));
        }
        if self.max_pop < self.min_pop {
            return Err(format!(
                "cluster type '{}': max_pop ({}) is below min_pop ({})",
                self.name, self.max_pop, self.min_pop
            ));
        }
        if self.average_pop < self.min_pop || self.average_pop > self.max_pop {
            return Err(format!(
                "cluster type '{}': average_pop ({}) must lie in [{}, {}]",
                self.name, self.average_pop, self.min_pop, self.max_pop
            ));
        }
        if !(self.max_proportion > 0.0 && self.max_proportion <= 1.0) {
            return Err(format!("cluster type '{}': max_proportion must be in (0, 1]", self.name));
        }
        // A nesting ratio of 1 never shrinks the level count
        if self.nest_average < 2 {
            return Err(format!("cluster type '{}': nest_average must be at least 2", self.name));
        }
        if self.nest_min == 0 || self.nest_max < self.nest_min {
            return Err(format!(
                "cluster type '{}': nest bounds [{}, {}] are invalid",
                self.name, self.nest_min, self.nest_max
            ));
        }
        if !(0.0..=1.0).contains(&self.same_city) {
            return Err(format!("cluster type '{}': same_city must be a probability", self.name));
        }
        if !(self.attenuation >= 0.0 && self.attenuation.is_finite()) {
            return Err(format!("cluster type '{}': attenuation must be non-negative", self.name));
        }
        Ok(())
    }
}

/// Complete simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for the world's random number generator
    pub seed: u64,

    /// Number of people in the world
    pub population: u32,

    /// World extent in world units
    pub width: f64,
    pub height: f64,

    /// People infected on day 0
    pub initial_infected: u32,

    /// Share of cities (largest first) eligible for the initial infections
    pub infected_cities: f64,

    /// See [`InfectiousnessMode`]
    pub infectiousness: f64,
    pub infectiousness_mode: InfectiousnessMode,

    /// Share of successful exposures that produce immunity instead of infection
    pub auto_immunity: f64,

    /// Daily probability that a person spends the day in a neighboring city
    pub travel: f64,

    /// Probability that an infection ends in death rather than recovery
    pub fatality: f64,

    /// Daily probability that a susceptible person is vaccinated
    pub vaccination_rate: f64,

    /// Days from exposure to becoming infectious
    pub gestation: DurationConfig,

    /// Days from becoming infectious to recovery
    pub recovery: DurationConfig,

    pub run: RunConfig,
    pub city: CityConfig,

    /// Cluster types by name; `"*"` holds shared defaults
    pub clusters: BTreeMap<String, ClusterTypeConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let mut clusters = BTreeMap::new();
        clusters.insert(
            "household".to_string(),
            ClusterTypeConfig {
                min_pop: Some(1),
                max_pop: Some(8),
                average_pop: Some(3),
                max_depth: Some(0),
                attenuation: Some(0.0),
                ..Default::default()
            },
        );
        clusters.insert(
            "work".to_string(),
            ClusterTypeConfig {
                min_pop: Some(2),
                max_pop: Some(500),
                average_pop: Some(20),
                max_proportion: Some(0.2),
                nest_average: Some(10),
                nest_min: Some(2),
                nest_max: Some(30),
                min_nested_count: Some(3),
                same_city: Some(0.8),
                attenuation: Some(0.2),
                ..Default::default()
            },
        );

        Self {
            seed: 42,
            population: 10_000,
            width: 100.0,
            height: 100.0,
            initial_infected: 10,
            infected_cities: 0.5,
            infectiousness: 2.5,
            infectiousness_mode: InfectiousnessMode::Reproduction,
            auto_immunity: 0.0,
            travel: 0.01,
            fatality: 0.0,
            vaccination_rate: 0.0,
            gestation: DurationConfig::new(5.0, 2.0),
            recovery: DurationConfig::new(7.0, 3.0),
            run: RunConfig::default(),
            city: CityConfig::default(),
            clusters,
        }
    }
}

impl SimulationConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check that values are in range
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.population == 0 {
            return Err("population must be positive".into());
        }
        if self.initial_infected > self.population {
            return Err(format!(
                "initial_infected ({}) exceeds population ({})",
                self.initial_infected, self.population
            ));
        }
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err("world width and height must be positive".into());
        }

        let probabilities = [
            ("infected_cities", self.infected_cities),
            ("auto_immunity", self.auto_immunity),
            ("travel", self.travel),
            ("fatality", self.fatality),
            ("vaccination_rate", self.vaccination_rate),
            ("run.stop_fraction", self.run.stop_fraction),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} ({}) must be between 0 and 1", name, value));
            }
        }

        if !(self.infectiousness >= 0.0 && self.infectiousness.is_finite()) {
            return Err("infectiousness must be non-negative".into());
        }

        for (name, duration) in [("gestation", self.gestation), ("recovery", self.recovery)] {
            if !(duration.mean > 0.0) || duration.sd < 0.0 {
                return Err(format!(
                    "{} needs a positive mean and non-negative sd (got {} / {})",
                    name, duration.mean, duration.sd
                ));
            }
        }

        let city = &self.city;
        if !(city.min_density > 0.0) || city.max_density < city.min_density {
            return Err(format!(
                "city densities [{}, {}] are invalid",
                city.min_density, city.max_density
            ));
        }
        if city.count == 0 && city.min_count == 0 {
            return Err("city.min_count must be positive when the city count is derived".into());
        }
        if city.max_pop != 0 && city.max_pop < city.min_pop {
            return Err(format!(
                "city.max_pop ({}) is below city.min_pop ({})",
                city.max_pop, city.min_pop
            ));
        }
        if city.max_placement_attempts == 0 {
            return Err("city.max_placement_attempts must be positive".into());
        }

        Ok(())
    }

    /// Resolve cluster types in name order, applying `"*"` defaults
    pub fn cluster_types(&self) -> Result<Vec<ClusterType>> {
        let defaults = self
            .clusters
            .get(WILDCARD_CLUSTER)
            .cloned()
            .unwrap_or_default();

        self.clusters
            .iter()
            .filter(|(name, _)| name.as_str() != WILDCARD_CLUSTER)
            .enumerate()
            .map(|(index, (name, raw))| {
                ClusterType::resolve(ClusterTypeId::new(index), name, &raw.inherit(&defaults))
            })
            .collect()
    }

    /// Validate and freeze into the snapshot a world is built from
    pub fn snapshot(&self) -> Result<ConfigSnapshot> {
        self.validate().map_err(EpiError::Config)?;
        let cluster_types = self.cluster_types()?;
        Ok(ConfigSnapshot {
            settings: Arc::new(self.clone()),
            cluster_types: cluster_types.into(),
        })
    }
}

/// Immutable, validated configuration shared by a world and its observers
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    settings: Arc<SimulationConfig>,
    cluster_types: Arc<[ClusterType]>,
}

impl ConfigSnapshot {
    pub fn settings(&self) -> &SimulationConfig {
        &self.settings
    }

    pub fn cluster_types(&self) -> &[ClusterType] {
        &self.cluster_types
    }
}
