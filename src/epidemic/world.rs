//! World state container

use std::time::Duration;

use rand_chacha::ChaCha8Rng;

use crate::core::config::ConfigSnapshot;
use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, Day, PersonId};
use crate::epidemic::city::City;
use crate::epidemic::cluster::ClusterArena;
use crate::epidemic::hierarchy::Hierarchy;
use crate::epidemic::output::{DailySnapshot, HistoryLog, SimulationOutput, SimulationStats, SnapshotField};
use crate::epidemic::person::{DiseaseParams, Person};

/// Figures carried from one day to the next
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    pub max_infected: u32,
    pub peak_day: Day,
    pub max_growth: f64,
    pub growth: f64,
    pub days_to_double: f64,
    pub vaccinated: u32,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            max_infected: 0,
            peak_day: 0,
            max_growth: 1.0,
            growth: 1.0,
            days_to_double: 0.0,
            vaccinated: 0,
        }
    }
}

/// People in each active state, in the order they will be visited
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub susceptible: Vec<PersonId>,
    pub gestating: Vec<PersonId>,
    pub infected: Vec<PersonId>,
}

/// The complete simulation state
pub struct World {
    pub(crate) config: ConfigSnapshot,
    pub(crate) params: DiseaseParams,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) hierarchy: Hierarchy,
    pub(crate) people: Vec<Person>,
    pub(crate) buckets: Buckets,
    /// Last simulated day; 0 before the first
    pub(crate) day: Day,
    /// Set once the continuation rule fails
    pub(crate) finished: bool,
    pub(crate) stats: RunningStats,
    pub(crate) history: HistoryLog,
    pub(crate) setup_time: Duration,
    pub(crate) run_time: Duration,
}

impl World {
    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn params(&self) -> &DiseaseParams {
        &self.params
    }

    pub fn day(&self) -> Day {
        self.day
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn population(&self) -> u32 {
        self.people.len() as u32
    }

    pub fn cities(&self) -> &[City] {
        &self.hierarchy.cities
    }

    pub fn city(&self, id: CityId) -> Result<&City> {
        self.hierarchy.city(id)
    }

    pub fn clusters(&self) -> &ClusterArena {
        &self.hierarchy.clusters
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn people(&self) -> &[Person] {
        &self.people
    }

    pub fn person(&self, id: PersonId) -> Result<&Person> {
        self.people
            .get(id.index())
            .ok_or(EpiError::UnknownId { kind: "person", id: id.0 })
    }

    pub fn infected(&self) -> u32 {
        self.hierarchy.counter.infected()
    }

    pub fn total_infected(&self) -> u32 {
        self.hierarchy.counter.total_infected()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn latest(&self) -> Option<&DailySnapshot> {
        self.history.latest()
    }

    pub fn days(&self) -> Vec<Day> {
        self.history.days()
    }

    pub fn data(&self, field: SnapshotField) -> Vec<f64> {
        self.history.data(field)
    }

    pub fn data_point(&self, field: SnapshotField, day: Day) -> Option<f64> {
        self.history.data_point(field, day)
    }

    pub fn interesting_window(&self) -> Option<(Day, Day)> {
        self.history.interesting_window(self.population())
    }

    pub fn statistics(&self) -> SimulationStats {
        let counter = &self.hierarchy.counter;
        SimulationStats {
            days_simulated: self.history.len() as u32,
            population: self.population(),
            cities: self.hierarchy.cities.len() as u32,
            clusters: self.hierarchy.clusters.len() as u32,
            max_infected: self.stats.max_infected,
            peak_day: self.stats.peak_day,
            total_infected: counter.total_infected(),
            dead: counter.dead(),
            vaccinated: self.stats.vaccinated,
            max_growth: self.stats.max_growth,
            days_to_double: self.stats.days_to_double,
            setup_time_ms: self.setup_time.as_millis() as u64,
            simulation_time_ms: self.run_time.as_millis() as u64,
        }
    }

    pub fn output(&self) -> SimulationOutput {
        SimulationOutput {
            history: self.history.clone(),
            statistics: self.statistics(),
        }
    }

    pub fn into_output(self) -> SimulationOutput {
        let statistics = self.statistics();
        SimulationOutput {
            history: self.history,
            statistics,
        }
    }
}
