//! Cities: circular regions with their own cluster forests and city-wide exposure

use std::f64::consts::PI;

use ordered_float::OrderedFloat;
use rand::Rng;

use crate::core::error::Result;
use crate::core::types::{CityId, ClusterId, ClusterTypeId, Day, PersonId, Point};
use crate::epidemic::cluster::{ClusterArena, ClusterFamily};
use crate::epidemic::counter::{CounterNode, InfectionCounter};
use crate::sampling::WeightedSampler;

/// Another city and how far away it is
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub city: CityId,
    pub distance: f64,
}

/// Population-to-area parameters shared by every city
#[derive(Debug, Clone, Copy)]
pub struct DensityRange {
    pub min_pop: u32,
    pub max_pop: u32,
    pub min_density: f64,
    pub max_density: f64,
}

impl DensityRange {
    /// Density interpolated by where `population` sits between the smallest
    /// and largest city
    pub fn density(&self, population: u32) -> f64 {
        let ratio = if self.max_pop > self.min_pop {
            ((population as f64 - self.min_pop as f64) / (self.max_pop - self.min_pop) as f64)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };
        ratio * (self.max_density - self.min_density) + self.min_density
    }

    /// Radius of a disc holding `population` at its density
    pub fn radius(&self, population: u32) -> f64 {
        (population as f64 / self.density(population) / PI).sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct City {
    pub id: CityId,
    pub name: String,
    pub location: Point,
    pub target_population: u32,
    /// Radius in world units
    pub size: f64,
    /// Nearest first
    pub neighbors: Vec<Neighbor>,
    neighbor_sampler: Option<WeightedSampler<Neighbor>>,
    /// One per cluster type, indexed by type id
    pub families: Vec<ClusterFamily>,
    pub people: Vec<PersonId>,
    pub counter: InfectionCounter,
    pub pop_ratio: f64,
    pub exposure_per_person: f64,
    exposure: f64,
    exposure_day: Option<Day>,
    pub susceptible_clusters: u32,
    pub untouched_clusters: u32,
}

impl City {
    pub fn new(id: CityId, location: Point, target_population: u32, size: f64) -> Self {
        Self {
            id,
            name: id.to_string(),
            location,
            target_population,
            size,
            neighbors: Vec::new(),
            neighbor_sampler: None,
            families: Vec::new(),
            people: Vec::new(),
            counter: InfectionCounter::new(Some(CounterNode::World)),
            pop_ratio: 1.0,
            exposure_per_person: 0.0,
            exposure: 0.0,
            exposure_day: None,
            susceptible_clusters: 0,
            untouched_clusters: 0,
        }
    }

    /// People actually living here
    pub fn population(&self) -> u32 {
        self.counter.capacity()
    }

    pub fn distance(&self, other: &City) -> f64 {
        self.location.distance(&other.location)
    }

    pub fn touches(&self, other: &City) -> bool {
        self.size + other.size > self.distance(other)
    }

    /// A point inside the city, denser toward the centre
    pub fn random_location<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let bearing = rng.gen_range(0.0..(2.0 * PI));
        let u: f64 = rng.gen();
        self.location.polar_offset(u * u * self.size, bearing)
    }

    /// Record every other city as a neighbor, nearest first
    pub fn make_neighbors(&mut self, cities: &[(CityId, Point)]) -> Result<()> {
        self.neighbors = cities
            .iter()
            .filter(|(id, _)| *id != self.id)
            .map(|(id, location)| Neighbor {
                city: *id,
                distance: self.location.distance(location),
            })
            .collect();
        self.neighbors.sort_by_key(|n| OrderedFloat(n.distance));

        self.neighbor_sampler = if self.neighbors.is_empty() {
            None
        } else {
            Some(WeightedSampler::build(self.neighbors.clone(), |n| {
                1.0 / n.distance.max(f64::EPSILON)
            })?)
        };
        Ok(())
    }

    /// A neighbor drawn by inverse distance, if there is one
    pub fn random_neighbor<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<CityId> {
        self.neighbor_sampler.as_ref().map(|s| s.choose(rng).city)
    }

    pub fn family(&self, cluster_type: ClusterTypeId) -> Option<&ClusterFamily> {
        self.families.get(cluster_type.index())
    }

    /// Every cluster this city owns, all types and levels
    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.families.iter().flat_map(|f| f.cluster_ids())
    }

    /// Precompute what one infectious visitor adds to the city's exposure.
    /// Larger cities dilute it by `(population / min_pop)^pop_ratio_power`.
    pub fn set_exposure(&mut self, coefficient: f64, city_exposure: f64, min_pop: u32, pop_ratio_power: f64) {
        let population = self.population();
        self.pop_ratio = if population > 0 && min_pop > 0 {
            1.0 / (population as f64 / min_pop as f64).powf(pop_ratio_power)
        } else {
            1.0
        };
        self.exposure_per_person = coefficient * city_exposure * self.pop_ratio;
    }

    pub fn expose(&mut self, day: Day) {
        if self.exposure_day != Some(day) {
            self.exposure = 0.0;
            self.exposure_day = Some(day);
        }
        self.exposure += self.exposure_per_person;
    }

    pub fn exposure(&self, day: Day) -> f64 {
        if self.exposure_day == Some(day) {
            self.exposure
        } else {
            0.0
        }
    }

    /// Clear city exposure and the exposure of every owned cluster
    pub fn reset(&mut self, arena: &mut ClusterArena) -> Result<()> {
        self.exposure = 0.0;
        self.exposure_day = None;
        for id in self.cluster_ids() {
            arena.reset(id)?;
        }
        Ok(())
    }

    /// Recount leaf clusters that are untouched or still have susceptibles
    pub fn refresh_cluster_counts(&mut self, arena: &ClusterArena) {
        let mut susceptible = 0;
        let mut untouched = 0;
        for leaf in self
            .families
            .iter()
            .filter_map(|f| f.leaves())
            .flat_map(|level| level.clusters.iter())
        {
            if let Ok(cluster) = arena.get(*leaf) {
                if cluster.counter.is_susceptible() {
                    susceptible += 1;
                }
                if cluster.counter.is_untouched() {
                    untouched += 1;
                }
            }
        }
        self.susceptible_clusters = susceptible;
        self.untouched_clusters = untouched;
    }
}
