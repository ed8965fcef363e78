//! Core type definitions used throughout the codebase

use std::fmt;

use serde::{Deserialize, Serialize};

/// Simulated day counter. Day 0 is the seeding day; the loop starts at day 1.
pub type Day = u32;

/// City identifier (index into the world's city list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CityId(pub u32);

/// Cluster identifier (index into the cluster arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

/// Person identifier (index into the world's person list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonId(pub u32);

/// Cluster type identifier (index into the resolved cluster type registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterTypeId(pub u32);

macro_rules! arena_id {
    ($name:ident) => {
        impl $name {
            pub fn new(index: usize) -> Self {
                Self(index as u32)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(CityId);
arena_id!(ClusterId);
arena_id!(PersonId);
arena_id!(ClusterTypeId);

impl fmt::Display for CityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// 2D position in world units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Offset by `radius` along `bearing` (radians)
    pub fn polar_offset(&self, radius: f64, bearing: f64) -> Self {
        self.translate(radius * bearing.cos(), radius * bearing.sin())
    }
}

/// Disease state of a single person
///
/// Transitions only move forward:
/// Susceptible -> Gestating -> Infected -> Recovered | Dead, or Susceptible -> Immune.
/// Seeded infections go straight from Susceptible to Infected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseState {
    Susceptible,
    Gestating,
    Infected,
    Recovered,
    Dead,
    Immune,
}

impl DiseaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Recovered | Self::Dead | Self::Immune)
    }

    pub fn can_become(self, next: DiseaseState) -> bool {
        use DiseaseState::*;
        matches!(
            (self, next),
            (Susceptible, Gestating)
                | (Susceptible, Infected)
                | (Susceptible, Immune)
                | (Gestating, Infected)
                | (Infected, Recovered)
                | (Infected, Dead)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Susceptible => "susceptible",
            Self::Gestating => "gestating",
            Self::Infected => "infected",
            Self::Recovered => "recovered",
            Self::Dead => "dead",
            Self::Immune => "immune",
        }
    }
}

impl fmt::Display for DiseaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
        assert!((b.distance(&a) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_polar_offset() {
        let origin = Point::new(1.0, 1.0);
        let moved = origin.polar_offset(2.0, std::f64::consts::FRAC_PI_2);
        assert!((moved.x - 1.0).abs() < 1e-9);
        assert!((moved.y - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_states_only_move_forward() {
        use DiseaseState::*;
        assert!(Susceptible.can_become(Gestating));
        assert!(Gestating.can_become(Infected));
        assert!(Infected.can_become(Dead));
        assert!(!Infected.can_become(Susceptible));
        assert!(!Recovered.can_become(Infected));
        assert!(!Immune.can_become(Gestating));
        assert!(Immune.is_terminal());
        assert!(!Gestating.is_terminal());
    }

    #[test]
    fn test_city_id_display() {
        assert_eq!(CityId(7).to_string(), "C7");
        assert_eq!(ClusterId::new(3).index(), 3);
    }
}
