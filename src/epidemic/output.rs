//! Daily snapshots, run history and serialization

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, Day};

/// State counts for one city on one day
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitySnapshot {
    pub name: String,
    pub population: u32,
    pub susceptible: u32,
    pub gestating: u32,
    pub infected: u32,
    pub recovered: u32,
    pub immune: u32,
    pub dead: u32,
}

/// Immutable record of the world at the end of one simulated day
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub day: Day,
    pub susceptible: u32,
    pub gestating: u32,
    pub infected: u32,
    pub recovered: u32,
    pub immune: u32,
    pub vaccinated: u32,
    pub dead: u32,
    /// Everyone ever infectious
    pub total: u32,
    /// Infected today over infected yesterday
    pub growth: f64,
    pub days_to_double: f64,
    pub population: u32,
    pub max_infected: u32,
    pub peak_day: Day,
    pub untouched_cities: u32,
    pub susceptible_cities: u32,
    pub untouched_clusters: u32,
    pub susceptible_clusters: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cities: Option<BTreeMap<CityId, CitySnapshot>>,
}

/// A numeric column of the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotField {
    Day,
    Susceptible,
    Gestating,
    Infected,
    Recovered,
    Immune,
    Vaccinated,
    Dead,
    Total,
    Growth,
    DaysToDouble,
    Population,
    UntouchedCities,
    SusceptibleCities,
    UntouchedClusters,
    SusceptibleClusters,
}

impl SnapshotField {
    pub const ALL: [SnapshotField; 16] = [
        Self::Day,
        Self::Susceptible,
        Self::Gestating,
        Self::Infected,
        Self::Recovered,
        Self::Immune,
        Self::Vaccinated,
        Self::Dead,
        Self::Total,
        Self::Growth,
        Self::DaysToDouble,
        Self::Population,
        Self::UntouchedCities,
        Self::SusceptibleCities,
        Self::UntouchedClusters,
        Self::SusceptibleClusters,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Susceptible => "susceptible",
            Self::Gestating => "gestating",
            Self::Infected => "infected",
            Self::Recovered => "recovered",
            Self::Immune => "immune",
            Self::Vaccinated => "vaccinated",
            Self::Dead => "dead",
            Self::Total => "total",
            Self::Growth => "growth",
            Self::DaysToDouble => "days_to_double",
            Self::Population => "population",
            Self::UntouchedCities => "untouched_cities",
            Self::SusceptibleCities => "susceptible_cities",
            Self::UntouchedClusters => "untouched_clusters",
            Self::SusceptibleClusters => "susceptible_clusters",
        }
    }

    pub fn value(self, snapshot: &DailySnapshot) -> f64 {
        match self {
            Self::Day => snapshot.day as f64,
            Self::Susceptible => snapshot.susceptible as f64,
            Self::Gestating => snapshot.gestating as f64,
            Self::Infected => snapshot.infected as f64,
            Self::Recovered => snapshot.recovered as f64,
            Self::Immune => snapshot.immune as f64,
            Self::Vaccinated => snapshot.vaccinated as f64,
            Self::Dead => snapshot.dead as f64,
            Self::Total => snapshot.total as f64,
            Self::Growth => snapshot.growth,
            Self::DaysToDouble => snapshot.days_to_double,
            Self::Population => snapshot.population as f64,
            Self::UntouchedCities => snapshot.untouched_cities as f64,
            Self::SusceptibleCities => snapshot.susceptible_cities as f64,
            Self::UntouchedClusters => snapshot.untouched_clusters as f64,
            Self::SusceptibleClusters => snapshot.susceptible_clusters as f64,
        }
    }
}

impl fmt::Display for SnapshotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SnapshotField {
    type Err = EpiError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = if s == "total_infected" { "total" } else { s };
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.name() == wanted)
            .ok_or_else(|| EpiError::Config(format!("unknown snapshot field '{}'", s)))
    }
}

/// Snapshots in day order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    pub snapshots: Vec<DailySnapshot>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: DailySnapshot) -> Result<()> {
        if let Some(last) = self.snapshots.last() {
            if snapshot.day <= last.day {
                return Err(EpiError::InvariantViolation(format!(
                    "snapshot for day {} after day {}",
                    snapshot.day, last.day
                )));
            }
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&DailySnapshot> {
        self.snapshots.last()
    }

    pub fn get(&self, day: Day) -> Option<&DailySnapshot> {
        self.snapshots
            .binary_search_by_key(&day, |s| s.day)
            .ok()
            .map(|index| &self.snapshots[index])
    }

    pub fn days(&self) -> Vec<Day> {
        self.snapshots.iter().map(|s| s.day).collect()
    }

    pub fn data(&self, field: SnapshotField) -> Vec<f64> {
        self.snapshots.iter().map(|s| field.value(s)).collect()
    }

    pub fn data_point(&self, field: SnapshotField, day: Day) -> Option<f64> {
        self.get(day).map(|s| field.value(s))
    }

    /// Days worth plotting: from the first day more than √population have
    /// been infected, to the first day after the peak when fewer than a fifth
    /// of the total are still infected
    pub fn interesting_window(&self, population: u32) -> Option<(Day, Day)> {
        let first = self.snapshots.first()?;
        let last = self.snapshots.last()?;
        let threshold = (population as f64).sqrt();

        let start = self
            .snapshots
            .iter()
            .find(|s| s.total as f64 > threshold)
            .map_or(first.day, |s| s.day);

        let peak = self
            .snapshots
            .iter()
            .fold(first, |best, s| if s.infected > best.infected { s } else { best })
            .day;

        let end = self
            .snapshots
            .iter()
            .find(|s| s.day > peak && (s.infected as f64) < s.total as f64 / 5.0)
            .map_or(last.day, |s| s.day);

        Some((start, end.max(start)))
    }

    /// Comma-separated history with a header row
    pub fn to_csv(&self) -> String {
        let mut out = SnapshotField::ALL
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join(",");
        out.push('\n');
        for snapshot in &self.snapshots {
            let row: Vec<String> = SnapshotField::ALL
                .iter()
                .map(|f| match f {
                    SnapshotField::Growth | SnapshotField::DaysToDouble => {
                        format!("{:.4}", f.value(snapshot))
                    }
                    _ => format!("{}", f.value(snapshot)),
                })
                .collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }
}

/// Headline figures for a finished (or stopped) run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub days_simulated: u32,
    pub population: u32,
    pub cities: u32,
    pub clusters: u32,
    pub max_infected: u32,
    pub peak_day: Day,
    pub total_infected: u32,
    pub dead: u32,
    pub vaccinated: u32,
    pub max_growth: f64,
    pub days_to_double: f64,
    pub setup_time_ms: u64,
    pub simulation_time_ms: u64,
}

/// Complete simulation output
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub history: HistoryLog,
    pub statistics: SimulationStats,
}

impl SimulationOutput {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn summary(&self) -> String {
        let stats = &self.statistics;
        format!(
            "Simulated {} days for {} people in {} cities ({}ms setup, {}ms run)\n\
             Peak of {} infected on day {}; {} infected in total, {} dead\n\
             Days to double: {:.2}",
            stats.days_simulated,
            stats.population,
            stats.cities,
            stats.setup_time_ms,
            stats.simulation_time_ms,
            stats.max_infected,
            stats.peak_day,
            stats.total_infected,
            stats.dead,
            stats.days_to_double,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(day: Day, infected: u32, total: u32) -> DailySnapshot {
        DailySnapshot {
            day,
            susceptible: 100 - total,
            gestating: 0,
            infected,
            recovered: total - infected,
            immune: 0,
            vaccinated: 0,
            dead: 0,
            total,
            growth: 1.0,
            days_to_double: 0.0,
            population: 100,
            max_infected: infected,
            peak_day: day,
            untouched_cities: 0,
            susceptible_cities: 1,
            untouched_clusters: 0,
            susceptible_clusters: 1,
            cities: None,
        }
    }

    fn curve() -> HistoryLog {
        let mut log = HistoryLog::new();
        let points = [(1, 1, 1), (2, 5, 6), (3, 20, 26), (4, 30, 50), (5, 20, 60), (6, 8, 62), (7, 2, 63)];
        for (day, infected, total) in points {
            log.push(snapshot(day, infected, total)).unwrap();
        }
        log
    }

    #[test]
    fn test_field_lookup() {
        let log = curve();
        assert_eq!(log.days(), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(log.data(SnapshotField::Infected)[3], 30.0);
        assert_eq!(log.data_point(SnapshotField::Total, 5), Some(60.0));
        assert_eq!(log.data_point(SnapshotField::Total, 50), None);
        assert_eq!("total_infected".parse::<SnapshotField>().unwrap(), SnapshotField::Total);
        assert!("nonsense".parse::<SnapshotField>().is_err());
    }

    #[test]
    fn test_interesting_window() {
        // sqrt(100) = 10, first exceeded on day 3; peak day 4;
        // day 6 has 8 < 62 / 5
        assert_eq!(curve().interesting_window(100), Some((3, 6)));
        assert_eq!(HistoryLog::new().interesting_window(100), None);
    }

    #[test]
    fn test_days_must_increase() {
        let mut log = curve();
        assert!(log.push(snapshot(7, 1, 63)).is_err());
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let csv = curve().to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 8);
        assert!(lines[0].starts_with("day,susceptible,gestating,infected"));
        assert!(lines[4].starts_with("4,50,0,30"));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = serde_json::to_value(snapshot(2, 5, 6)).unwrap();
        assert_eq!(json["day"], 2);
        assert_eq!(json["total"], 6);
        assert!(json.get("cities").is_none());
    }
}
