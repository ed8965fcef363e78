//! Social clusters and the arena that owns them
//!
//! Clusters of one type form a forest per city. Leaves (depth 0) hold people;
//! every higher level holds child clusters, possibly from other cities.
//! Exposure added to a leaf is also added, attenuated once per level, to each
//! ancestor. Reading a leaf's exposure folds the ancestors back in with the
//! same attenuation.

use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, ClusterId, ClusterTypeId, Day, PersonId, Point};
use crate::epidemic::counter::{CounterNode, InfectionCounter};
use crate::sampling::WeightedSampler;

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub cluster_type: ClusterTypeId,
    pub depth: u32,
    pub city: CityId,
    pub parent: Option<ClusterId>,
    /// Fitted size: people for a leaf, child clusters above that
    pub size: u32,
    /// Expected people underneath, back-propagated from the leaf sizes
    pub population: u32,
    pub location: Point,
    pub attenuation: f64,
    pub children: Vec<ClusterId>,
    pub people: Vec<PersonId>,
    pub counter: InfectionCounter,
    exposure: f64,
    exposure_day: Option<Day>,
    folded: f64,
    folded_day: Option<Day>,
}

impl Cluster {
    pub fn new(
        id: ClusterId,
        name: String,
        cluster_type: ClusterTypeId,
        depth: u32,
        city: CityId,
        size: u32,
        location: Point,
        attenuation: f64,
    ) -> Self {
        Self {
            id,
            name,
            cluster_type,
            depth,
            city,
            parent: None,
            size,
            population: if depth == 0 { size } else { 0 },
            location,
            attenuation,
            children: Vec::new(),
            people: Vec::new(),
            counter: InfectionCounter::new(None),
            exposure: 0.0,
            exposure_day: None,
            folded: 0.0,
            folded_day: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.depth == 0
    }

    /// Already holds as many children as its fitted size
    pub fn is_full(&self) -> bool {
        self.children.len() >= self.size as usize
    }

    /// Exposure accumulated on `day`; anything from an earlier day reads as zero
    pub fn raw_exposure(&self, day: Day) -> f64 {
        if self.exposure_day == Some(day) {
            self.exposure
        } else {
            0.0
        }
    }

    fn accumulate(&mut self, day: Day, amount: f64) {
        if self.exposure_day != Some(day) {
            self.exposure = 0.0;
            self.exposure_day = Some(day);
        }
        self.exposure += amount;
    }

    pub fn reset(&mut self) {
        self.exposure = 0.0;
        self.exposure_day = None;
        self.folded = 0.0;
        self.folded_day = None;
    }
}

/// Level `depth` of one city's forest for one cluster type
#[derive(Debug, Clone)]
pub struct ClusterLevel {
    pub depth: u32,
    pub clusters: Vec<ClusterId>,
    pub sampler: WeightedSampler<ClusterId>,
}

/// All levels of one cluster type within one city, leaves first
#[derive(Debug, Clone)]
pub struct ClusterFamily {
    pub cluster_type: ClusterTypeId,
    pub levels: Vec<ClusterLevel>,
}

impl ClusterFamily {
    pub fn leaves(&self) -> Option<&ClusterLevel> {
        self.levels.first()
    }

    pub fn level(&self, depth: u32) -> Option<&ClusterLevel> {
        self.levels.get(depth as usize)
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.levels.iter().flat_map(|level| level.clusters.iter().copied())
    }
}

/// Owns every cluster in the world; links are ids into it
#[derive(Debug, Clone, Default)]
pub struct ClusterArena {
    clusters: Vec<Cluster>,
}

impl ClusterArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cluster built by `make`, which receives the new id
    pub fn insert_with<F>(&mut self, make: F) -> ClusterId
    where
        F: FnOnce(ClusterId) -> Cluster,
    {
        let id = ClusterId::new(self.clusters.len());
        self.clusters.push(make(id));
        id
    }

    pub fn get(&self, id: ClusterId) -> Result<&Cluster> {
        self.clusters
            .get(id.index())
            .ok_or(EpiError::UnknownId { kind: "cluster", id: id.0 })
    }

    pub fn get_mut(&mut self, id: ClusterId) -> Result<&mut Cluster> {
        self.clusters
            .get_mut(id.index())
            .ok_or(EpiError::UnknownId { kind: "cluster", id: id.0 })
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter()
    }

    /// Make `parent` the parent of `child`, for membership and for counting
    pub fn link(&mut self, child: ClusterId, parent: ClusterId) -> Result<()> {
        let parent_depth = self.get(parent)?.depth;
        let child_cluster = self.get_mut(child)?;
        if child_cluster.parent.is_some() {
            return Err(EpiError::InvariantViolation(format!(
                "cluster {} already has a parent",
                child_cluster.name
            )));
        }
        if parent_depth != child_cluster.depth + 1 {
            return Err(EpiError::InvariantViolation(format!(
                "cluster {} at depth {} cannot nest under depth {}",
                child_cluster.name, child_cluster.depth, parent_depth
            )));
        }
        child_cluster.parent = Some(parent);
        child_cluster.counter.set_parent(Some(CounterNode::Cluster(parent)));
        self.get_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Parent chain of `id`, nearest first
    pub fn ancestors(&self, id: ClusterId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: self.clusters.get(id.index()).and_then(|c| c.parent),
        }
    }

    /// An infectious member adds `coefficient` here and an attenuated share
    /// to every ancestor
    pub fn expose(&mut self, id: ClusterId, day: Day, coefficient: f64) -> Result<()> {
        let mut amount = coefficient;
        let mut current = Some(id);
        while let Some(cluster_id) = current {
            let cluster = self.get_mut(cluster_id)?;
            cluster.accumulate(day, amount);
            amount *= cluster.attenuation;
            current = cluster.parent;
        }
        Ok(())
    }

    /// Exposure felt by a member of `id` on `day`, including ancestors.
    /// Only valid once every exposure for `day` has been added.
    pub fn exposure(&mut self, id: ClusterId, day: Day) -> Result<f64> {
        let cluster = self.get(id)?;
        if cluster.folded_day == Some(day) {
            return Ok(cluster.folded);
        }

        let mut total = cluster.raw_exposure(day);
        let mut factor = 1.0;
        for ancestor in self.ancestors(id) {
            factor *= cluster.attenuation;
            total += ancestor.raw_exposure(day) * factor;
        }

        let cluster = self.get_mut(id)?;
        cluster.folded = total;
        cluster.folded_day = Some(day);
        Ok(total)
    }

    pub fn reset(&mut self, id: ClusterId) -> Result<()> {
        self.get_mut(id)?.reset();
        Ok(())
    }
}

pub struct Ancestors<'a> {
    arena: &'a ClusterArena,
    next: Option<ClusterId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Cluster;

    fn next(&mut self) -> Option<Self::Item> {
        let cluster = self.arena.clusters.get(self.next?.index())?;
        self.next = cluster.parent;
        Some(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three-level chain: leaf -> middle -> top
    fn chain(attenuation: f64) -> (ClusterArena, [ClusterId; 3]) {
        let mut arena = ClusterArena::new();
        let mut ids = [ClusterId(0); 3];
        for (depth, slot) in ids.iter_mut().enumerate() {
            *slot = arena.insert_with(|id| {
                Cluster::new(
                    id,
                    format!("c{}", depth),
                    ClusterTypeId(0),
                    depth as u32,
                    CityId(0),
                    4,
                    Point::default(),
                    attenuation,
                )
            });
        }
        arena.link(ids[0], ids[1]).unwrap();
        arena.link(ids[1], ids[2]).unwrap();
        (arena, ids)
    }

    #[test]
    fn test_expose_attenuates_up_the_chain() {
        let (mut arena, [leaf, middle, top]) = chain(0.5);
        arena.expose(leaf, 1, 0.2).unwrap();

        assert!((arena.get(leaf).unwrap().raw_exposure(1) - 0.2).abs() < 1e-12);
        assert!((arena.get(middle).unwrap().raw_exposure(1) - 0.1).abs() < 1e-12);
        assert!((arena.get(top).unwrap().raw_exposure(1) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_exposure_folds_in_ancestors() {
        let (mut arena, [leaf, middle, top]) = chain(0.5);
        // Another branch exposes the top directly
        arena.get_mut(top).unwrap().accumulate(3, 0.4);
        arena.expose(middle, 3, 0.0).unwrap();
        let felt = arena.exposure(leaf, 3).unwrap();
        // 0 own + 0.5 * 0 middle + 0.25 * 0.4 top
        assert!((felt - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_exposure_cache_is_per_day() {
        let (mut arena, [leaf, _, _]) = chain(0.5);
        arena.expose(leaf, 1, 1.0).unwrap();
        assert!((arena.exposure(leaf, 1).unwrap() - 1.0).abs() < 1e-12);
        // Nothing added on day 2, and day 1's value must not leak through
        assert_eq!(arena.exposure(leaf, 2).unwrap(), 0.0);
    }

    #[test]
    fn test_reset_clears_accumulator() {
        let (mut arena, [leaf, _, _]) = chain(0.5);
        arena.expose(leaf, 1, 1.0).unwrap();
        arena.reset(leaf).unwrap();
        assert_eq!(arena.get(leaf).unwrap().raw_exposure(1), 0.0);
    }

    #[test]
    fn test_link_rejects_second_parent_and_wrong_depth() {
        let (mut arena, [leaf, middle, top]) = chain(0.5);
        assert!(arena.link(leaf, middle).is_err());
        let orphan = arena.insert_with(|id| {
            Cluster::new(id, "x".into(), ClusterTypeId(0), 0, CityId(0), 1, Point::default(), 0.5)
        });
        assert!(arena.link(orphan, top).is_err());
        assert_eq!(arena.ancestors(leaf).count(), 2);
        assert_eq!(
            arena.get(leaf).unwrap().counter.parent(),
            Some(CounterNode::Cluster(middle))
        );
    }
}
