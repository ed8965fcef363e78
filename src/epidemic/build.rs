//! World construction
//!
//! Order matters: city sizes, then placement, then cluster forests and
//! nesting, then people, then city exposure weights, then seeding. Every
//! random draw comes from the world's single seeded generator, so the same
//! configuration always builds the same world.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::core::config::{ConfigSnapshot, InfectiousnessMode, SimulationConfig};
use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, ClusterId, DiseaseState, PersonId, Point};
use crate::epidemic::city::{City, DensityRange};
use crate::epidemic::cluster::ClusterArena;
use crate::epidemic::hierarchy::Hierarchy;
use crate::epidemic::nesting::{build_family, nest_clusters};
use crate::epidemic::output::HistoryLog;
use crate::epidemic::person::{DayContext, DiseaseParams, Person};
use crate::epidemic::world::{Buckets, RunningStats, World};
use crate::sampling::{round_significant, DurationDistribution, SizeDistributionFitter, WeightedSampler};

/// How many cities, and the population range they span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CityPlan {
    pub count: usize,
    pub min_pop: u32,
    pub max_pop: u32,
}

impl CityPlan {
    /// Explicit settings win; zeros are derived from the population
    pub fn derive(settings: &SimulationConfig) -> Result<Self> {
        let population = settings.population;
        let city = &settings.city;

        let count = if city.count > 0 {
            city.count
        } else {
            let derived = round_significant(
                (population as f64).powf(city.auto_power) / city.auto_divider,
                2,
            );
            (derived as usize).max(city.min_count)
        };
        if count > population as usize {
            return Err(EpiError::Config(format!(
                "{} cities for {} people",
                count, population
            )));
        }
        if count == 1 {
            return Ok(Self {
                count,
                min_pop: population,
                max_pop: population,
            });
        }

        let (min_pop, max_pop) = if city.max_pop > 0 {
            (city.min_pop.max(1), city.max_pop)
        } else {
            let max_pop = round_significant(population as f64 * city.auto_max_pop, 2).max(1.0);
            let min_pop = round_significant(
                (population as f64 - max_pop) / (count as f64 * city.min_size_multiplier),
                2,
            )
            .max(1.0);
            (min_pop as u32, max_pop as u32)
        };

        Ok(Self {
            count,
            min_pop,
            max_pop,
        })
    }
}

fn random_point(settings: &SimulationConfig, rng: &mut ChaCha8Rng) -> Point {
    Point::new(
        rng.gen_range(0.0..settings.width),
        rng.gen_range(0.0..settings.height),
    )
}

/// Fit city populations and scatter cities until none overlap
pub fn place_cities(settings: &SimulationConfig, plan: &CityPlan, rng: &mut ChaCha8Rng) -> Result<Vec<City>> {
    let populations = SizeDistributionFitter::new(
        plan.count,
        plan.min_pop,
        plan.max_pop,
        settings.population as u64,
    )?
    .fit(rng)?;

    let densities = DensityRange {
        min_pop: plan.min_pop,
        max_pop: plan.max_pop,
        min_density: settings.city.min_density,
        max_density: settings.city.max_density,
    };

    let mut cities: Vec<City> = populations
        .iter()
        .enumerate()
        .map(|(index, &population)| {
            let location = random_point(settings, rng);
            City::new(CityId::new(index), location, population, densities.radius(population))
        })
        .collect();

    for attempt in 0..settings.city.max_placement_attempts {
        let mut moved = 0;
        for i in 0..cities.len() {
            for j in (i + 1)..cities.len() {
                if cities[i].touches(&cities[j]) {
                    cities[j].location = random_point(settings, rng);
                    moved += 1;
                }
            }
        }
        if moved == 0 {
            debug!(attempt, cities = cities.len(), "city placement settled");
            return Ok(cities);
        }
    }

    Err(EpiError::Build(format!(
        "could not place {} cities in a {}x{} world without overlap after {} passes",
        cities.len(),
        settings.width,
        settings.height,
        settings.city.max_placement_attempts
    )))
}

/// Per-exposure coefficient for the configured infectiousness mode
pub fn infection_coefficient(
    settings: &SimulationConfig,
    gestation: &DurationDistribution,
    recovery: &DurationDistribution,
    arena: &ClusterArena,
    type_count: usize,
) -> f64 {
    match settings.infectiousness_mode {
        InfectiousnessMode::Direct => settings.infectiousness,
        InfectiousnessMode::Reproduction => {
            // Root-mean-square leaf size per type, summed over types
            let mut squares = vec![(0.0f64, 0usize); type_count];
            for cluster in arena.iter().filter(|c| c.is_leaf()) {
                if let Some(entry) = squares.get_mut(cluster.cluster_type.index()) {
                    entry.0 += (cluster.size as f64).powi(2);
                    entry.1 += 1;
                }
            }
            let factor: f64 = squares
                .iter()
                .filter(|(_, n)| *n > 0)
                .map(|(sum, n)| (sum / *n as f64).sqrt())
                .sum();
            let exposure_days = (recovery.mean() - gestation.mean()).max(1.0);
            settings.infectiousness / (exposure_days * factor.max(1.0))
        }
    }
}

fn populate(
    hierarchy: &mut Hierarchy,
    population: u32,
    gestation: &DurationDistribution,
    recovery: &DurationDistribution,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<Person>> {
    let targets: Vec<(CityId, u32)> = hierarchy
        .cities
        .iter()
        .map(|c| (c.id, c.target_population))
        .collect();
    let city_sampler = WeightedSampler::build(targets, |(_, target)| *target as f64)?;

    let mut people = Vec::with_capacity(population as usize);
    for index in 0..population {
        let city_id = city_sampler.choose(rng).0;
        let city = hierarchy.city(city_id)?;
        let clusters: Vec<ClusterId> = city
            .families
            .iter()
            .filter_map(|family| family.leaves())
            .map(|leaves| *leaves.sampler.choose(rng))
            .collect();

        let person = Person::new(
            PersonId(index),
            city_id,
            clusters,
            gestation.sample_days(rng),
            recovery.sample_days(rng),
        );
        hierarchy.enroll(&person)?;
        people.push(person);
    }
    Ok(people)
}

impl World {
    /// Build a world seeded from the configuration
    pub fn build(config: ConfigSnapshot) -> Result<Self> {
        let seed = config.settings().seed;
        Self::build_with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn build_with_rng(config: ConfigSnapshot, mut rng: ChaCha8Rng) -> Result<Self> {
        let started = Instant::now();
        let settings = config.settings();
        let cluster_types = config.cluster_types();

        let gestation = DurationDistribution::from_config(&settings.gestation)?;
        let recovery = DurationDistribution::from_config(&settings.recovery)?;

        let plan = CityPlan::derive(settings)?;
        let mut cities = place_cities(settings, &plan, &mut rng)?;
        let places: Vec<(CityId, Point)> = cities.iter().map(|c| (c.id, c.location)).collect();
        for city in cities.iter_mut() {
            city.make_neighbors(&places)?;
        }
        info!(
            cities = cities.len(),
            min_pop = plan.min_pop,
            max_pop = plan.max_pop,
            "placed cities"
        );

        let mut arena = ClusterArena::new();
        for index in 0..cities.len() {
            let mut families = Vec::with_capacity(cluster_types.len());
            for cluster_type in cluster_types {
                families.push(build_family(&mut arena, &cities[index], cluster_type, &mut rng)?);
            }
            cities[index].families = families;
        }
        nest_clusters(&mut cities, &mut arena, cluster_types, &mut rng)?;
        info!(clusters = arena.len(), types = cluster_types.len(), "built cluster forests");

        let coefficient = infection_coefficient(settings, &gestation, &recovery, &arena, cluster_types.len());
        let params = DiseaseParams {
            coefficient,
            auto_immunity: settings.auto_immunity,
            travel: settings.travel,
            fatality: settings.fatality,
            vaccination_rate: settings.vaccination_rate,
        };

        let mut hierarchy = Hierarchy::new(cities, arena);
        let people = populate(&mut hierarchy, settings.population, &gestation, &recovery, &mut rng)?;
        for city in hierarchy.cities.iter_mut() {
            city.set_exposure(
                coefficient,
                settings.city.exposure,
                plan.min_pop,
                settings.city.pop_ratio_power,
            );
        }
        hierarchy.refresh_cluster_counts();
        info!(people = people.len(), coefficient, "enrolled people");

        let mut world = World {
            config,
            params,
            rng,
            hierarchy,
            people,
            buckets: Buckets::default(),
            day: 0,
            finished: false,
            stats: RunningStats::default(),
            history: HistoryLog::new(),
            setup_time: Duration::ZERO,
            run_time: Duration::ZERO,
        };
        world.seed_infections()?;
        world.setup_time = started.elapsed();
        Ok(world)
    }

    /// Infect the initial cases on day 0, drawing from the largest cities
    /// by population and then by leaf cluster size
    fn seed_infections(&mut self) -> Result<()> {
        let settings = self.config.settings();
        let wanted = settings.initial_infected.min(self.people.len() as u32) as usize;
        let share = settings.infected_cities;

        let mut ranked: Vec<(CityId, u32)> = self
            .hierarchy
            .cities
            .iter()
            .filter(|c| c.population() > 0)
            .map(|c| (c.id, c.population()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let selected = ((ranked.len() as f64 * share).round() as usize).clamp(1, ranked.len().max(1));
        ranked.truncate(selected);

        let mut seeds: Vec<PersonId> = Vec::with_capacity(wanted);
        if wanted > 0 && !ranked.is_empty() {
            let sampler = WeightedSampler::build(ranked, |(_, population)| *population as f64)?;
            let limit = wanted * 100 + 1000;
            let mut attempts = 0;
            while seeds.len() < wanted && attempts < limit {
                attempts += 1;
                let city = self.hierarchy.city(sampler.choose(&mut self.rng).0)?;
                let pool = match city.families.first().and_then(|f| f.leaves()) {
                    Some(leaves) => {
                        let leaf = *leaves.sampler.choose(&mut self.rng);
                        &self.hierarchy.clusters.get(leaf)?.people
                    }
                    None => &city.people,
                };
                if pool.is_empty() {
                    continue;
                }
                let id = pool[self.rng.gen_range(0..pool.len())];
                if self.seed(id)? {
                    seeds.push(id);
                }
            }
        }

        if seeds.len() < wanted {
            warn!(seeded = seeds.len(), wanted, "seeding fell back to person order");
            for index in 0..self.people.len() {
                if seeds.len() >= wanted {
                    break;
                }
                let id = PersonId::new(index);
                if self.seed(id)? {
                    seeds.push(id);
                }
            }
        }

        self.buckets = Buckets {
            susceptible: self
                .people
                .iter()
                .filter(|p| p.state() == DiseaseState::Susceptible)
                .map(|p| p.id)
                .collect(),
            gestating: Vec::new(),
            infected: seeds,
        };
        info!(seeded = self.buckets.infected.len(), cities = selected, "seeded infections");
        Ok(())
    }

    /// Infect `id` on day 0 if still susceptible
    fn seed(&mut self, id: PersonId) -> Result<bool> {
        let person = self
            .people
            .get_mut(id.index())
            .ok_or(EpiError::UnknownId { kind: "person", id: id.0 })?;
        if person.state() != DiseaseState::Susceptible {
            return Ok(false);
        }
        let mut ctx = DayContext {
            hierarchy: &mut self.hierarchy,
            rng: &mut self.rng,
            params: &self.params,
        };
        person.infect(0, &mut ctx)?;
        Ok(true)
    }
}
