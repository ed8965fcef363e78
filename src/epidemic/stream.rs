//! Running a world on a blocking thread while observers read its days
//!
//! The world never leaves the worker thread. Snapshots are cloned into an
//! unbounded channel as each day completes; the receiving side keeps every
//! snapshot it has seen so days can be requested in any order.

use std::cell::Cell;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::core::error::Result;
use crate::core::types::Day;
use crate::epidemic::output::{DailySnapshot, SimulationOutput};
use crate::epidemic::world::World;

/// Result of a non-blocking request for one day
#[derive(Debug, Clone, PartialEq)]
pub enum DayStatus {
    Ready(DailySnapshot),
    /// Not simulated yet
    Pending,
    /// The run ended before this day
    Finished,
}

/// Receiving end of a spawned run
pub struct SnapshotStream {
    rx: UnboundedReceiver<DailySnapshot>,
    received: Vec<DailySnapshot>,
    finished: bool,
}

impl SnapshotStream {
    fn new(rx: UnboundedReceiver<DailySnapshot>) -> Self {
        Self {
            rx,
            received: Vec::new(),
            finished: false,
        }
    }

    fn lookup(&self, day: Day) -> Option<&DailySnapshot> {
        self.received
            .binary_search_by_key(&day, |s| s.day)
            .ok()
            .map(|index| &self.received[index])
    }

    fn accept(&mut self, snapshot: Option<DailySnapshot>) -> Option<DailySnapshot> {
        match &snapshot {
            Some(s) => self.received.push(s.clone()),
            None => self.finished = true,
        }
        snapshot
    }

    /// Next snapshot in day order, or None once the run has ended
    pub async fn next(&mut self) -> Option<DailySnapshot> {
        if self.finished {
            return None;
        }
        let snapshot = self.rx.recv().await;
        self.accept(snapshot)
    }

    /// Wait for `day` to be simulated
    pub async fn day(&mut self, day: Day) -> Option<DailySnapshot> {
        loop {
            if let Some(snapshot) = self.lookup(day) {
                return Some(snapshot.clone());
            }
            self.next().await?;
        }
    }

    /// Check for `day` without waiting
    pub fn poll_day(&mut self, day: Day) -> DayStatus {
        while !self.finished {
            match self.rx.try_recv() {
                Ok(snapshot) => self.received.push(snapshot),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.finished = true,
            }
        }
        match self.lookup(day) {
            Some(snapshot) => DayStatus::Ready(snapshot.clone()),
            None if self.finished => DayStatus::Finished,
            None => DayStatus::Pending,
        }
    }

    /// Blocking form of [`SnapshotStream::day`] for callers outside a runtime
    pub fn day_blocking(&mut self, day: Day) -> Option<DailySnapshot> {
        loop {
            if let Some(snapshot) = self.lookup(day) {
                return Some(snapshot.clone());
            }
            if self.finished {
                return None;
            }
            let snapshot = self.rx.blocking_recv();
            self.accept(snapshot)?;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the run and return its full history
    pub async fn collect(mut self) -> Vec<DailySnapshot> {
        while self.next().await.is_some() {}
        self.received
    }
}

/// Run `world` to completion on the blocking pool.
///
/// Dropping the stream stops the run after the current day.
pub fn spawn_run(mut world: World) -> (SnapshotStream, JoinHandle<Result<SimulationOutput>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::task::spawn_blocking(move || {
        let closed = Cell::new(false);
        world.run_with(
            |snapshot| {
                if tx.send(snapshot.clone()).is_err() {
                    closed.set(true);
                }
            },
            |_| closed.get(),
        )?;
        if closed.get() {
            tracing::debug!(day = world.day(), "snapshot stream dropped, run stopped");
        }
        Ok(world.into_output())
    });
    (SnapshotStream::new(rx), handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimulationConfig;

    fn small_world(seed: u64) -> World {
        let settings = SimulationConfig {
            seed,
            population: 2000,
            ..Default::default()
        };
        World::build(settings.snapshot().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_stream_matches_history() {
        let (mut stream, handle) = spawn_run(small_world(3));

        let first = stream.day(1).await.unwrap();
        assert_eq!(first.day, 1);

        let days = stream.collect().await;
        let output = handle.await.unwrap().unwrap();
        assert_eq!(days, output.history.snapshots);
    }

    #[tokio::test]
    async fn test_days_past_the_end_are_finished() {
        let (mut stream, handle) = spawn_run(small_world(5));
        assert!(stream.day(100_000).await.is_none());
        assert!(stream.is_finished());
        assert_eq!(stream.poll_day(100_000), DayStatus::Finished);
        assert!(matches!(stream.poll_day(1), DayStatus::Ready(_)));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_run() {
        let mut settings = SimulationConfig {
            population: 2000,
            ..Default::default()
        };
        settings.run.max_days = 500;
        settings.run.warmup_days = 500;
        settings.auto_immunity = 0.0;
        let world = World::build(settings.snapshot().unwrap()).unwrap();

        let (stream, handle) = spawn_run(world);
        drop(stream);
        let output = handle.await.unwrap().unwrap();
        assert!(output.statistics.days_simulated <= 500);
    }
}
