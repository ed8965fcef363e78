//! The daily loop
//!
//! Each day visits infected people first (they expose their clusters and a
//! city), then gestating people, then susceptible people, who test the
//! exposure accumulated so far. People change bucket only after their own
//! visit, so someone infected today starts exposing others tomorrow.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, info};

use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, Day, DiseaseState, PersonId};
use crate::epidemic::hierarchy::Hierarchy;
use crate::epidemic::output::{CitySnapshot, DailySnapshot, SimulationStats};
use crate::epidemic::person::{DayContext, Person};
use crate::epidemic::world::{Buckets, RunningStats, World};

fn person_mut(people: &mut [Person], id: PersonId) -> Result<&mut Person> {
    people
        .get_mut(id.index())
        .ok_or(EpiError::UnknownId { kind: "person", id: id.0 })
}

/// Fold today's counts into the running figures
fn update_stats(stats: &mut RunningStats, day: Day, infected: u32, prev_infected: u32, population: u32) {
    stats.growth = if prev_infected == 0 {
        1.0
    } else {
        infected as f64 / prev_infected as f64
    };
    if infected > population / 100 && stats.growth > stats.max_growth {
        stats.max_growth = stats.growth;
        stats.days_to_double = std::f64::consts::LN_2 / stats.max_growth.ln();
    }
    if infected > stats.max_infected {
        stats.max_infected = infected;
        stats.peak_day = day;
    }
}

fn city_breakdown(hierarchy: &Hierarchy) -> BTreeMap<CityId, CitySnapshot> {
    hierarchy
        .cities
        .iter()
        .map(|city| {
            let counter = &city.counter;
            (
                city.id,
                CitySnapshot {
                    name: city.name.clone(),
                    population: counter.capacity(),
                    susceptible: counter.susceptible(),
                    gestating: counter.gestating(),
                    infected: counter.infected(),
                    recovered: counter.recovered(),
                    immune: counter.immune(),
                    dead: counter.dead(),
                },
            )
        })
        .collect()
}

impl World {
    /// Simulate one day and record its snapshot.
    ///
    /// Returns whether the run should continue. Once it returns false the
    /// world is finished and further calls do nothing.
    pub fn one_day(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        let day = self.day + 1;
        let population = self.population();

        let World {
            config,
            params,
            rng,
            hierarchy,
            people,
            buckets,
            stats,
            history,
            ..
        } = self;
        let run = &config.settings().run;
        let prev_infected = hierarchy.counter.infected();

        hierarchy.reset()?;
        let mut ctx = DayContext {
            hierarchy: &mut *hierarchy,
            rng: &mut *rng,
            params: &*params,
        };

        let mut next = Buckets {
            susceptible: Vec::with_capacity(buckets.susceptible.len()),
            gestating: Vec::with_capacity(buckets.gestating.len()),
            infected: Vec::with_capacity(buckets.infected.len()),
        };

        for &id in &buckets.infected {
            if !person_mut(people, id)?.infectious(day, &mut ctx)? {
                next.infected.push(id);
            }
        }

        let mut became_infected = Vec::new();
        for &id in &buckets.gestating {
            if person_mut(people, id)?.gestating(day, &mut ctx)? {
                became_infected.push(id);
            } else {
                next.gestating.push(id);
            }
        }

        let mut became_gestating = Vec::new();
        for &id in &buckets.susceptible {
            let person = person_mut(people, id)?;
            if ctx.params.vaccination_rate > 0.0 && ctx.rng.gen::<f64>() < ctx.params.vaccination_rate {
                person.vaccinate(&mut ctx)?;
                stats.vaccinated += 1;
                continue;
            }
            if person.expose(day, &mut ctx)? {
                if person.state() == DiseaseState::Gestating {
                    became_gestating.push(id);
                }
            } else {
                next.susceptible.push(id);
            }
        }

        next.infected.extend(became_infected);
        next.gestating.extend(became_gestating);
        *buckets = next;

        hierarchy.refresh_cluster_counts();
        let counter = &hierarchy.counter;
        let infected = counter.infected();
        let gestating = counter.gestating();
        update_stats(stats, day, infected, prev_infected, population);

        let snapshot = DailySnapshot {
            day,
            susceptible: counter.susceptible(),
            gestating,
            infected,
            recovered: counter.recovered(),
            immune: counter.immune(),
            vaccinated: stats.vaccinated,
            dead: counter.dead(),
            total: counter.total_infected(),
            growth: stats.growth,
            days_to_double: stats.days_to_double,
            population,
            max_infected: stats.max_infected,
            peak_day: stats.peak_day,
            untouched_cities: hierarchy.untouched_cities(),
            susceptible_cities: hierarchy.susceptible_cities(),
            untouched_clusters: hierarchy.untouched_clusters(),
            susceptible_clusters: hierarchy.susceptible_clusters(),
            cities: if run.record_cities {
                Some(city_breakdown(hierarchy))
            } else {
                None
            },
        };
        debug!(
            day,
            infected,
            gestating,
            total = snapshot.total,
            growth = snapshot.growth,
            "day complete"
        );
        history.push(snapshot)?;

        let continues = day < run.max_days
            && infected + gestating > 0
            && (infected >= prev_infected
                || infected as f64 > population as f64 * run.stop_fraction
                || day < run.warmup_days);

        self.day = day;
        self.finished = !continues;
        Ok(continues)
    }

    /// Run to completion
    pub fn run(&mut self) -> Result<SimulationStats> {
        self.run_with(|_| {}, |_| false)
    }

    /// Run until the continuation rule or `stop` ends it, handing each
    /// day's snapshot to `on_day`
    pub fn run_with<F, S>(&mut self, mut on_day: F, mut stop: S) -> Result<SimulationStats>
    where
        F: FnMut(&DailySnapshot),
        S: FnMut(&World) -> bool,
    {
        let started = Instant::now();
        loop {
            let before = self.day;
            let continues = self.one_day()?;
            if self.day != before {
                if let Some(snapshot) = self.history.latest() {
                    on_day(snapshot);
                }
            }
            if !continues || stop(self) {
                break;
            }
        }
        self.run_time += started.elapsed();

        let stats = self.statistics();
        info!(
            days = stats.days_simulated,
            total_infected = stats.total_infected,
            peak = stats.max_infected,
            peak_day = stats.peak_day,
            elapsed_ms = stats.simulation_time_ms,
            "run finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ClusterTypeConfig, DurationConfig, InfectiousnessMode, SimulationConfig};

    fn single_cluster_config(population: u32) -> SimulationConfig {
        let mut config = SimulationConfig {
            population,
            initial_infected: 1,
            infected_cities: 1.0,
            infectiousness: 1.0,
            infectiousness_mode: InfectiousnessMode::Direct,
            travel: 0.0,
            gestation: DurationConfig::fixed(3.0),
            recovery: DurationConfig::fixed(3.0),
            ..Default::default()
        };
        config.city.count = 1;
        config.clusters.clear();
        config.clusters.insert(
            "everyone".into(),
            ClusterTypeConfig {
                min_pop: Some(1),
                max_pop: Some(population),
                average_pop: Some(population),
                max_proportion: Some(1.0),
                ..Default::default()
            },
        );
        config
    }

    #[test]
    fn test_growth_from_zero_is_one() {
        let mut stats = RunningStats::default();
        update_stats(&mut stats, 1, 5, 0, 100);
        assert_eq!(stats.growth, 1.0);
        assert_eq!(stats.max_infected, 5);
        assert_eq!(stats.peak_day, 1);
    }

    #[test]
    fn test_max_growth_needs_one_percent_infected() {
        let mut stats = RunningStats::default();
        update_stats(&mut stats, 1, 10, 5, 10_000);
        assert_eq!(stats.max_growth, 1.0);
        assert_eq!(stats.days_to_double, 0.0);

        update_stats(&mut stats, 2, 200, 100, 10_000);
        assert_eq!(stats.max_growth, 2.0);
        assert!((stats.days_to_double - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_everyone_gestating_after_first_day() {
        let config = single_cluster_config(200).snapshot().unwrap();
        let mut world = World::build(config).unwrap();
        assert_eq!(world.infected(), 1);

        assert!(world.one_day().unwrap());
        let day_one = world.latest().unwrap().clone();
        assert_eq!(day_one.day, 1);
        assert_eq!(day_one.infected, 1);
        assert_eq!(day_one.gestating, 199);
        assert_eq!(day_one.susceptible, 0);
    }

    #[test]
    fn test_finished_world_stays_finished() {
        let config = single_cluster_config(50).snapshot().unwrap();
        let mut world = World::build(config).unwrap();
        let stats = world.run().unwrap();
        assert!(world.is_finished());
        assert_eq!(stats.total_infected, 50);

        let days = world.history().len();
        assert!(!world.one_day().unwrap());
        assert_eq!(world.history().len(), days);
    }

    #[test]
    fn test_stop_callback_ends_run() {
        let config = SimulationConfig::default().snapshot().unwrap();
        let mut world = World::build(config).unwrap();
        let mut seen = Vec::new();
        world
            .run_with(|s| seen.push(s.day), |w| w.day() >= 5)
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(!world.is_finished());
    }

    #[test]
    fn test_city_breakdown_is_recorded() {
        let mut settings = SimulationConfig::default();
        settings.run.record_cities = true;
        let mut world = World::build(settings.snapshot().unwrap()).unwrap();
        world.one_day().unwrap();
        let cities = world.latest().unwrap().cities.as_ref().unwrap();
        assert_eq!(cities.len(), world.cities().len());
        let people: u32 = cities.values().map(|c| c.population).sum();
        assert_eq!(people, world.population());
    }

    #[test]
    fn test_vaccination_moves_people_to_immune() {
        let mut settings = single_cluster_config(100);
        settings.vaccination_rate = 1.0;
        let mut world = World::build(settings.snapshot().unwrap()).unwrap();
        world.one_day().unwrap();
        let snapshot = world.latest().unwrap();
        assert_eq!(snapshot.vaccinated, 99);
        assert_eq!(snapshot.immune, 99);
        assert_eq!(snapshot.susceptible, 0);
        assert!(world.hierarchy().check_counters().is_ok());
    }
}
