//! Individual people and their disease state machine

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, ClusterId, Day, DiseaseState, PersonId};
use crate::epidemic::counter::Transition;
use crate::epidemic::hierarchy::Hierarchy;

/// Per-run disease parameters derived from the configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiseaseParams {
    /// Added to a cluster for each infectious member each day
    pub coefficient: f64,
    pub auto_immunity: f64,
    pub travel: f64,
    pub fatality: f64,
    pub vaccination_rate: f64,
}

/// Everything a person touches during one simulated day
pub struct DayContext<'a> {
    pub hierarchy: &'a mut Hierarchy,
    pub rng: &'a mut ChaCha8Rng,
    pub params: &'a DiseaseParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: PersonId,
    pub city: CityId,
    /// One leaf cluster per cluster type, indexed by type id
    pub clusters: Vec<ClusterId>,
    state: DiseaseState,
    /// Day the disease began (gestation, or infection for seeds)
    onset: Option<Day>,
    /// Day the person became infectious
    infected_on: Option<Day>,
    gestation_days: u32,
    recovery_days: u32,
}

impl Person {
    pub fn new(
        id: PersonId,
        city: CityId,
        clusters: Vec<ClusterId>,
        gestation_days: u32,
        recovery_days: u32,
    ) -> Self {
        Self {
            id,
            city,
            clusters,
            state: DiseaseState::Susceptible,
            onset: None,
            infected_on: None,
            gestation_days,
            recovery_days,
        }
    }

    pub fn state(&self) -> DiseaseState {
        self.state
    }

    pub fn onset(&self) -> Option<Day> {
        self.onset
    }

    fn change(&mut self, next: DiseaseState, transition: Transition, ctx: &mut DayContext) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(EpiError::InvariantViolation(format!(
                "person {} cannot go from {} to {}",
                self.id.0, self.state, next
            )));
        }
        ctx.hierarchy.record_person(self, transition)?;
        self.state = next;
        Ok(())
    }

    pub fn gestate(&mut self, day: Day, ctx: &mut DayContext) -> Result<()> {
        self.change(DiseaseState::Gestating, Transition::Gestate, ctx)?;
        self.onset = Some(day);
        Ok(())
    }

    /// Become infectious; seeds arrive here straight from susceptible
    pub fn infect(&mut self, day: Day, ctx: &mut DayContext) -> Result<()> {
        self.change(DiseaseState::Infected, Transition::Infect, ctx)?;
        self.onset.get_or_insert(day);
        self.infected_on = Some(day);
        Ok(())
    }

    pub fn recover(&mut self, ctx: &mut DayContext) -> Result<()> {
        self.change(DiseaseState::Recovered, Transition::Recover, ctx)
    }

    pub fn die(&mut self, ctx: &mut DayContext) -> Result<()> {
        self.change(DiseaseState::Dead, Transition::Kill, ctx)
    }

    pub fn immunise(&mut self, ctx: &mut DayContext) -> Result<()> {
        self.change(DiseaseState::Immune, Transition::Immunise, ctx)
    }

    /// City where today is spent: home, or a neighbor when travelling
    fn whereabouts(&self, ctx: &mut DayContext) -> Result<CityId> {
        if ctx.params.travel > 0.0 && ctx.rng.gen::<f64>() < ctx.params.travel {
            let home = ctx.hierarchy.city(self.city)?;
            return Ok(home.random_neighbor(ctx.rng).unwrap_or(self.city));
        }
        Ok(self.city)
    }

    /// An infected person's day. Returns true once the infection is over.
    pub fn infectious(&mut self, day: Day, ctx: &mut DayContext) -> Result<bool> {
        let since = self.infected_on.ok_or_else(|| {
            EpiError::InvariantViolation(format!("person {} is not infectious", self.id.0))
        })?;

        if day.saturating_sub(since) >= self.recovery_days {
            if ctx.params.fatality > 0.0 && ctx.rng.gen::<f64>() < ctx.params.fatality {
                self.die(ctx)?;
            } else {
                self.recover(ctx)?;
            }
            return Ok(true);
        }

        for &cluster in &self.clusters {
            ctx.hierarchy.clusters.expose(cluster, day, ctx.params.coefficient)?;
        }
        let city = self.whereabouts(ctx)?;
        ctx.hierarchy.city_mut(city)?.expose(day);
        Ok(false)
    }

    /// A gestating person's day. Returns true on becoming infectious.
    pub fn gestating(&mut self, day: Day, ctx: &mut DayContext) -> Result<bool> {
        let onset = self.onset.ok_or_else(|| {
            EpiError::InvariantViolation(format!("person {} has no onset", self.id.0))
        })?;
        if day.saturating_sub(onset) >= self.gestation_days {
            self.infect(day, ctx)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// A susceptible person's day. Returns true if exposure caught them,
    /// either as an infection or as immunity.
    pub fn expose(&mut self, day: Day, ctx: &mut DayContext) -> Result<bool> {
        let city = self.whereabouts(ctx)?;
        let mut risk = ctx.hierarchy.city(city)?.exposure(day);
        for &cluster in &self.clusters {
            risk += ctx.hierarchy.clusters.exposure(cluster, day)?;
        }
        if risk <= 0.0 {
            return Ok(false);
        }

        let r: f64 = ctx.rng.gen();
        if r >= risk {
            return Ok(false);
        }
        if r < risk * ctx.params.auto_immunity {
            self.immunise(ctx)?;
        } else {
            self.gestate(day, ctx)?;
        }
        Ok(true)
    }

    /// Vaccination moves a susceptible person straight to immune
    pub fn vaccinate(&mut self, ctx: &mut DayContext) -> Result<()> {
        self.immunise(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ClusterTypeId, Point};
    use crate::epidemic::city::City;
    use crate::epidemic::cluster::{Cluster, ClusterArena};
    use rand::SeedableRng;

    fn params(coefficient: f64) -> DiseaseParams {
        DiseaseParams {
            coefficient,
            auto_immunity: 0.0,
            travel: 0.0,
            fatality: 0.0,
            vaccination_rate: 0.0,
        }
    }

    /// One city, one cluster, `n` enrolled people
    fn small_world(n: u32) -> (Hierarchy, Vec<Person>) {
        let mut arena = ClusterArena::new();
        let cluster = arena.insert_with(|id| {
            Cluster::new(id, "c".into(), ClusterTypeId(0), 0, CityId(0), n, Point::default(), 0.5)
        });
        let city = City::new(CityId(0), Point::default(), n, 1.0);
        let mut hierarchy = Hierarchy::new(vec![city], arena);
        let mut people = Vec::new();
        for i in 0..n {
            let person = Person::new(PersonId(i), CityId(0), vec![cluster], 2, 3);
            hierarchy.enroll(&person).unwrap();
            people.push(person);
        }
        (hierarchy, people)
    }

    #[test]
    fn test_course_of_infection() {
        let (mut hierarchy, mut people) = small_world(2);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let p = params(1.0);
        let mut ctx = DayContext { hierarchy: &mut hierarchy, rng: &mut rng, params: &p };

        let (seed, rest) = people.split_at_mut(1);
        let (seed, other) = (&mut seed[0], &mut rest[0]);
        seed.infect(0, &mut ctx).unwrap();

        // Day 1: the seed exposes the shared cluster, the other catches it
        assert!(!seed.infectious(1, &mut ctx).unwrap());
        assert!(other.expose(1, &mut ctx).unwrap());
        assert_eq!(other.state(), DiseaseState::Gestating);
        assert_eq!(other.onset(), Some(1));

        assert!(!other.gestating(2, &mut ctx).unwrap());
        assert!(other.gestating(3, &mut ctx).unwrap());
        assert_eq!(other.state(), DiseaseState::Infected);

        assert!(seed.infectious(3, &mut ctx).unwrap());
        assert_eq!(seed.state(), DiseaseState::Recovered);

        let world = &ctx.hierarchy.counter;
        assert_eq!(world.recovered(), 1);
        assert_eq!(world.infected(), 1);
        assert!(ctx.hierarchy.check_counters().is_ok());
    }

    #[test]
    fn test_auto_immunity_diverts_to_immune() {
        let (mut hierarchy, mut people) = small_world(2);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut p = params(1.0);
        p.auto_immunity = 1.0;
        let mut ctx = DayContext { hierarchy: &mut hierarchy, rng: &mut rng, params: &p };

        people[0].infect(0, &mut ctx).unwrap();
        people[0].infectious(1, &mut ctx).unwrap();
        assert!(people[1].expose(1, &mut ctx).unwrap());
        assert_eq!(people[1].state(), DiseaseState::Immune);
        assert_eq!(ctx.hierarchy.counter.total_infected(), 1);
    }

    #[test]
    fn test_no_exposure_no_draw() {
        let (mut hierarchy, mut people) = small_world(1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let p = params(1.0);
        let mut ctx = DayContext { hierarchy: &mut hierarchy, rng: &mut rng, params: &p };
        assert!(!people[0].expose(1, &mut ctx).unwrap());
        assert_eq!(people[0].state(), DiseaseState::Susceptible);
    }

    #[test]
    fn test_backward_transition_is_rejected() {
        let (mut hierarchy, mut people) = small_world(1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let p = params(1.0);
        let mut ctx = DayContext { hierarchy: &mut hierarchy, rng: &mut rng, params: &p };

        people[0].immunise(&mut ctx).unwrap();
        let err = people[0].gestate(2, &mut ctx).unwrap_err();
        assert!(matches!(err, EpiError::InvariantViolation(_)));
        assert!(people[0].recover(&mut ctx).is_err());
        assert!(ctx.hierarchy.check_counters().is_ok());
    }

    #[test]
    fn test_fatality_kills() {
        let (mut hierarchy, mut people) = small_world(1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut p = params(1.0);
        p.fatality = 1.0;
        let mut ctx = DayContext { hierarchy: &mut hierarchy, rng: &mut rng, params: &p };

        people[0].infect(0, &mut ctx).unwrap();
        assert!(people[0].infectious(3, &mut ctx).unwrap());
        assert_eq!(people[0].state(), DiseaseState::Dead);
        assert_eq!(ctx.hierarchy.counter.dead(), 1);
    }
}
