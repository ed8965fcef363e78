//! Disease state tallies with a reporting chain
//!
//! Every world, city and cluster keeps an [`InfectionCounter`]. A transition
//! recorded at one node is applied locally and then forwarded to the node's
//! parent, so a single call keeps a whole chain of aggregates in step.


use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, ClusterId, DiseaseState};

/// Addresses a counter anywhere in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterNode {
    World,
    City(CityId),
    Cluster(ClusterId),
}

/// A state change that every counter on a person's chains must see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enroll,
    Gestate,
    Infect,
    Recover,
    Immunise,
    Kill,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfectionCounter {
    capacity: u32,
    susceptible: u32,
    gestating: u32,
    infected: u32,
    recovered: u32,
    immune: u32,
    dead: u32,
    parent: Option<CounterNode>,
}

fn take(slot: &mut u32, state: DiseaseState) -> Result<()> {
    *slot = slot.checked_sub(1).ok_or_else(|| {
        EpiError::InvariantViolation(format!("{} count would drop below zero", state))
    })?;
    Ok(())
}

fn expect_state(from: DiseaseState, allowed: &[DiseaseState], operation: &str) -> Result<()> {
    if allowed.contains(&from) {
        Ok(())
    } else {
        Err(EpiError::InvariantViolation(format!(
            "{} called for a {} person",
            operation, from
        )))
    }
}

impl InfectionCounter {
    pub fn new(parent: Option<CounterNode>) -> Self {
        Self {
            parent,
            ..Default::default()
        }
    }

    pub fn parent(&self) -> Option<CounterNode> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<CounterNode>) {
        self.parent = parent;
    }

    /// A new member arrives susceptible
    pub fn enroll_one(&mut self) {
        self.capacity += 1;
        self.susceptible += 1;
    }

    pub fn gestate_one(&mut self, from: DiseaseState) -> Result<()> {
        expect_state(from, &[DiseaseState::Susceptible], "gestate_one")?;
        take(&mut self.susceptible, from)?;
        self.gestating += 1;
        Ok(())
    }

    pub fn infect_one(&mut self, from: DiseaseState) -> Result<()> {
        expect_state(
            from,
            &[DiseaseState::Susceptible, DiseaseState::Gestating],
            "infect_one",
        )?;
        match from {
            DiseaseState::Susceptible => take(&mut self.susceptible, from)?,
            _ => take(&mut self.gestating, from)?,
        }
        self.infected += 1;
        Ok(())
    }

    pub fn recover_one(&mut self, from: DiseaseState) -> Result<()> {
        expect_state(from, &[DiseaseState::Infected], "recover_one")?;
        take(&mut self.infected, from)?;
        self.recovered += 1;
        Ok(())
    }

    pub fn immunise_one(&mut self, from: DiseaseState) -> Result<()> {
        expect_state(from, &[DiseaseState::Susceptible], "immunise_one")?;
        take(&mut self.susceptible, from)?;
        self.immune += 1;
        Ok(())
    }

    pub fn kill_one(&mut self, from: DiseaseState) -> Result<()> {
        expect_state(from, &[DiseaseState::Infected], "kill_one")?;
        take(&mut self.infected, from)?;
        self.dead += 1;
        Ok(())
    }

    pub fn apply(&mut self, transition: Transition, from: DiseaseState) -> Result<()> {
        match transition {
            Transition::Enroll => {
                expect_state(from, &[DiseaseState::Susceptible], "enroll_one")?;
                self.enroll_one();
                Ok(())
            }
            Transition::Gestate => self.gestate_one(from),
            Transition::Infect => self.infect_one(from),
            Transition::Recover => self.recover_one(from),
            Transition::Immunise => self.immunise_one(from),
            Transition::Kill => self.kill_one(from),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn susceptible(&self) -> u32 {
        self.susceptible
    }

    pub fn gestating(&self) -> u32 {
        self.gestating
    }

    pub fn infected(&self) -> u32 {
        self.infected
    }

    pub fn recovered(&self) -> u32 {
        self.recovered
    }

    pub fn immune(&self) -> u32 {
        self.immune
    }

    pub fn dead(&self) -> u32 {
        self.dead
    }

    /// Everyone who has ever been infectious
    pub fn total_infected(&self) -> u32 {
        self.infected + self.recovered + self.dead
    }

    pub fn count(&self, state: DiseaseState) -> u32 {
        match state {
            DiseaseState::Susceptible => self.susceptible,
            DiseaseState::Gestating => self.gestating,
            DiseaseState::Infected => self.infected,
            DiseaseState::Recovered => self.recovered,
            DiseaseState::Dead => self.dead,
            DiseaseState::Immune => self.immune,
        }
    }

    /// Sum over all states; always equals capacity
    pub fn total(&self) -> u32 {
        self.susceptible + self.gestating + self.infected + self.recovered + self.immune + self.dead
    }

    pub fn is_consistent(&self) -> bool {
        self.total() == self.capacity
    }

    /// No member has left the susceptible state
    pub fn is_untouched(&self) -> bool {
        self.susceptible == self.capacity
    }

    pub fn is_susceptible(&self) -> bool {
        self.susceptible > 0
    }
}

/// Anything that can hand out counters by node, and so forward transitions
/// along parent links
pub trait CounterHierarchy {
    fn counter_mut(&mut self, node: CounterNode) -> Result<&mut InfectionCounter>;

    /// Apply `transition` at `node` and at every ancestor on its chain
    fn record(&mut self, node: CounterNode, transition: Transition, from: DiseaseState) -> Result<()> {
        let mut current = Some(node);
        while let Some(node) = current {
            let counter = self.counter_mut(node)?;
            counter.apply(transition, from)?;
            current = counter.parent();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enroll_starts_susceptible() {
        let mut counter = InfectionCounter::new(None);
        for _ in 0..5 {
            counter.enroll_one();
        }
        assert_eq!(counter.capacity(), 5);
        assert_eq!(counter.susceptible(), 5);
        assert!(counter.is_untouched());
        assert!(counter.is_consistent());
    }

    #[test]
    fn test_full_course_keeps_totals() {
        let mut counter = InfectionCounter::new(None);
        for _ in 0..3 {
            counter.enroll_one();
        }
        counter.gestate_one(DiseaseState::Susceptible).unwrap();
        counter.infect_one(DiseaseState::Gestating).unwrap();
        counter.infect_one(DiseaseState::Susceptible).unwrap();
        counter.recover_one(DiseaseState::Infected).unwrap();
        counter.kill_one(DiseaseState::Infected).unwrap();
        counter.immunise_one(DiseaseState::Susceptible).unwrap();

        assert!(counter.is_consistent());
        assert_eq!(counter.recovered(), 1);
        assert_eq!(counter.dead(), 1);
        assert_eq!(counter.immune(), 1);
        assert_eq!(counter.total_infected(), 2);
        assert!(!counter.is_susceptible());
        assert!(!counter.is_untouched());
    }

    #[test]
    fn test_wrong_prior_state_is_violation() {
        let mut counter = InfectionCounter::new(None);
        counter.enroll_one();
        let err = counter.recover_one(DiseaseState::Susceptible).unwrap_err();
        assert!(matches!(err, EpiError::InvariantViolation(_)));
        assert!(counter.gestate_one(DiseaseState::Immune).is_err());
        assert!(counter.is_consistent());
    }

    #[test]
    fn test_underflow_is_violation() {
        let mut counter = InfectionCounter::new(None);
        let err = counter.infect_one(DiseaseState::Susceptible).unwrap_err();
        assert!(matches!(err, EpiError::InvariantViolation(_)));
    }

    struct Chain {
        counters: Vec<InfectionCounter>,
    }

    impl CounterHierarchy for Chain {
        fn counter_mut(&mut self, node: CounterNode) -> Result<&mut InfectionCounter> {
            let index = match node {
                CounterNode::World => 0,
                CounterNode::City(id) => id.index(),
                CounterNode::Cluster(id) => id.index(),
            };
            self.counters
                .get_mut(index)
                .ok_or(EpiError::UnknownId { kind: "counter", id: index as u32 })
        }
    }

    #[test]
    fn test_record_forwards_to_every_ancestor() {
        // 2 -> 1 -> 0
        let mut chain = Chain {
            counters: vec![
                InfectionCounter::new(None),
                InfectionCounter::new(Some(CounterNode::World)),
                InfectionCounter::new(Some(CounterNode::City(CityId(1)))),
            ],
        };
        let leaf = CounterNode::Cluster(ClusterId(2));
        chain.record(leaf, Transition::Enroll, DiseaseState::Susceptible).unwrap();
        chain.record(leaf, Transition::Gestate, DiseaseState::Susceptible).unwrap();

        for counter in &chain.counters {
            assert_eq!(counter.capacity(), 1);
            assert_eq!(counter.gestating(), 1);
            assert!(counter.is_consistent());
        }
    }
}
