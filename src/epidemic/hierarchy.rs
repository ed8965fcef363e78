//! The aggregate side of the world: root counter, cities and cluster arena
//!
//! People live outside this struct so the daily loop can borrow a person
//! mutably while the hierarchy records that person's transitions.

use rayon::prelude::*;

use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, DiseaseState};
use crate::epidemic::city::City;
use crate::epidemic::cluster::ClusterArena;
use crate::epidemic::counter::{CounterHierarchy, CounterNode, InfectionCounter, Transition};
use crate::epidemic::person::Person;

#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    pub counter: InfectionCounter,
    pub cities: Vec<City>,
    pub clusters: ClusterArena,
}

impl Hierarchy {
    pub fn new(cities: Vec<City>, clusters: ClusterArena) -> Self {
        Self {
            counter: InfectionCounter::new(None),
            cities,
            clusters,
        }
    }

    pub fn city(&self, id: CityId) -> Result<&City> {
        self.cities
            .get(id.index())
            .ok_or(EpiError::UnknownId { kind: "city", id: id.0 })
    }

    pub fn city_mut(&mut self, id: CityId) -> Result<&mut City> {
        self.cities
            .get_mut(id.index())
            .ok_or(EpiError::UnknownId { kind: "city", id: id.0 })
    }

    /// Add a person to their city and leaf clusters, counting them susceptible
    /// on every chain they belong to
    pub fn enroll(&mut self, person: &Person) -> Result<()> {
        self.city_mut(person.city)?.people.push(person.id);
        for &cluster in &person.clusters {
            self.clusters.get_mut(cluster)?.people.push(person.id);
        }
        self.record_person(person, Transition::Enroll)
    }

    /// Record a transition for `person`, who is still in the prior state
    pub fn record_person(&mut self, person: &Person, transition: Transition) -> Result<()> {
        let from = person.state();
        self.record(CounterNode::City(person.city), transition, from)?;
        for &cluster in &person.clusters {
            self.record(CounterNode::Cluster(cluster), transition, from)?;
        }
        Ok(())
    }

    /// Clear the day's exposure everywhere
    pub fn reset(&mut self) -> Result<()> {
        for city in self.cities.iter_mut() {
            city.reset(&mut self.clusters)?;
        }
        Ok(())
    }

    /// Recount per-city untouched and susceptible leaf clusters
    pub fn refresh_cluster_counts(&mut self) {
        let clusters = &self.clusters;
        self.cities
            .par_iter_mut()
            .for_each(|city| city.refresh_cluster_counts(clusters));
    }

    pub fn untouched_cities(&self) -> u32 {
        self.cities.iter().filter(|c| c.counter.is_untouched()).count() as u32
    }

    pub fn susceptible_cities(&self) -> u32 {
        self.cities.iter().filter(|c| c.counter.is_susceptible()).count() as u32
    }

    pub fn untouched_clusters(&self) -> u32 {
        self.cities.iter().map(|c| c.untouched_clusters).sum()
    }

    pub fn susceptible_clusters(&self) -> u32 {
        self.cities.iter().map(|c| c.susceptible_clusters).sum()
    }

    /// Every counter matches its capacity
    pub fn check_counters(&self) -> Result<()> {
        let bad_city = self.cities.iter().find(|c| !c.counter.is_consistent());
        let bad_cluster = self.clusters.iter().find(|c| !c.counter.is_consistent());
        if !self.counter.is_consistent() {
            return Err(EpiError::InvariantViolation("world counter out of balance".into()));
        }
        if let Some(city) = bad_city {
            return Err(EpiError::InvariantViolation(format!("city {} counter out of balance", city.name)));
        }
        if let Some(cluster) = bad_cluster {
            return Err(EpiError::InvariantViolation(format!(
                "cluster {} counter out of balance",
                cluster.name
            )));
        }
        Ok(())
    }

    /// Count of people in `state` across the world
    pub fn count(&self, state: DiseaseState) -> u32 {
        self.counter.count(state)
    }
}

impl CounterHierarchy for Hierarchy {
    fn counter_mut(&mut self, node: CounterNode) -> Result<&mut InfectionCounter> {
        match node {
            CounterNode::World => Ok(&mut self.counter),
            CounterNode::City(id) => Ok(&mut self.city_mut(id)?.counter),
            CounterNode::Cluster(id) => Ok(&mut self.clusters.get_mut(id)?.counter),
        }
    }
}
