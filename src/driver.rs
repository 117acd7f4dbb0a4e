//! Day-by-day pipeline: load, align, fold, checkpoint.
//!
//! Each day walks the same states:
//!
//! ```text
//! FETCHING -> FETCHED -> ALIGNING -> ALIGNED -> AGGREGATING -> [COMMITTED]
//!     \________________________\___________________________-> [SKIPPED]
//! ```
//!
//! A day is folded into a scratch copy of the aggregate; the copy becomes
//! the live state only once the checkpoint holding it is on disk. A skipped
//! day leaves both state and cursor untouched and is not retried in the same
//! run.
//!
//! A run can be asked to stop through [`StreamDriver::stop_handle`]. The
//! flag is checked between days, so the day in flight still commits or
//! skips normally before the run returns.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{NaiveDate, TimeDelta};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregateState, FoldSummary};
use crate::align::align;
use crate::checkpoint::{CheckpointStore, Cursor, day_cursor, pending};
use crate::error::{LoadError, MapError};
use crate::grid::BinGrid;
use crate::source::{DayEnumerator, DaySeries, SourceLoader};

/// One day handed out by a [`DaySource`], with the outcome of loading it.
#[derive(Debug)]
pub struct DayBatch {
    pub day: NaiveDate,
    pub load: Result<DaySeries, LoadError>,
}

/// Explicit producer of day batches, oldest first.
///
/// Loading happens inside [`next_batch`](Self::next_batch); nothing is
/// read ahead.
pub struct DaySource<L> {
    days: VecDeque<NaiveDate>,
    loader: L,
}

impl<L: SourceLoader> DaySource<L> {
    /// Queues the days strictly after `cursor`.
    pub fn new(mut days: Vec<NaiveDate>, cursor: Option<Cursor>, loader: L) -> Self {
        days.sort_unstable();
        days.dedup();
        Self {
            days: pending(&days, cursor).into(),
            loader,
        }
    }

    pub fn from_enumerator(
        enumerator: &impl DayEnumerator,
        cursor: Option<Cursor>,
        loader: L,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(enumerator.days()?, cursor, loader))
    }

    /// The next day and its loaded series, or `None` at end of stream.
    pub fn next_batch(&mut self) -> Option<DayBatch> {
        let day = self.days.pop_front()?;
        debug!(%day, "Fetching day");
        let load = self.loader.load(day);
        Some(DayBatch { day, load })
    }

    pub fn remaining(&self) -> usize {
        self.days.len()
    }
}

/// Terminal state of one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DayOutcome {
    Committed { day: NaiveDate, summary: FoldSummary },
    Skipped { day: NaiveDate, reason: String },
}

/// Totals for one [`StreamDriver::run`].
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub committed: usize,
    pub skipped: Vec<(NaiveDate, String)>,
    pub samples: usize,
    pub unbinned: usize,
    pub rejected: usize,
    /// The run ended on a stop request, not at end of stream.
    pub interrupted: bool,
}

impl RunReport {
    fn record(&mut self, outcome: &DayOutcome) {
        match outcome {
            DayOutcome::Committed { summary, .. } => {
                self.committed += 1;
                self.samples += summary.binned;
                self.unbinned += summary.unbinned;
                self.rejected += summary.rejected;
            }
            DayOutcome::Skipped { day, reason } => self.skipped.push((*day, reason.clone())),
        }
    }
}

/// Owns the aggregate and drives days through it.
pub struct StreamDriver {
    grid: BinGrid,
    tolerance: TimeDelta,
    store: CheckpointStore,
    state: AggregateState,
    cursor: Option<Cursor>,
    stop: Arc<AtomicBool>,
}

impl StreamDriver {
    /// Starts from the checkpoint in `store`, or from a zeroed aggregate if
    /// there is none. A checkpoint for another grid is a fatal error.
    pub fn resume(grid: BinGrid, tolerance: TimeDelta, store: CheckpointStore) -> Result<Self, MapError> {
        let (cursor, state) = match store.load(&grid)? {
            Some((cursor, state)) => (Some(cursor), state),
            None => {
                info!(dir = %store.dir().display(), "No checkpoint, starting fresh");
                (None, AggregateState::for_grid(&grid))
            }
        };
        Ok(Self {
            grid,
            tolerance,
            store,
            state,
            cursor,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that ends [`run`](Self::run) before the next day once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn grid(&self) -> &BinGrid {
        &self.grid
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Pulls batches until the source is exhausted or a stop is requested.
    ///
    /// Stops at the first fatal error; every day committed before it stays
    /// committed.
    pub fn run<L: SourceLoader>(&mut self, source: &mut DaySource<L>) -> Result<RunReport, MapError> {
        let mut report = RunReport::default();
        info!(days = source.remaining(), "Starting aggregation");

        loop {
            if self.stop.load(Ordering::SeqCst) {
                warn!(remaining = source.remaining(), "Stop requested, ending run");
                report.interrupted = true;
                break;
            }
            let Some(batch) = source.next_batch() else { break };
            let outcome = self.process_day(batch)?;
            report.record(&outcome);
        }

        info!(
            committed = report.committed,
            skipped = report.skipped.len(),
            samples = report.samples,
            unbinned = report.unbinned,
            rejected = report.rejected,
            interrupted = report.interrupted,
            "Aggregation finished"
        );
        Ok(report)
    }

    /// Runs one day through align, fold and checkpoint.
    #[tracing::instrument(skip(self, batch), fields(day = %batch.day))]
    pub fn process_day(&mut self, batch: DayBatch) -> Result<DayOutcome, MapError> {
        let day = batch.day;

        if let Some(cursor) = self.cursor {
            if day_cursor(day) <= cursor {
                return Ok(skip(day, format!("already committed (cursor {cursor})")));
            }
        }

        let series = match batch.load {
            Ok(series) => series,
            Err(e) if e.is_skippable() => return Ok(skip(day, e.to_string())),
            Err(e) => return Err(e.into()),
        };
        if series.primary.is_empty() {
            return Ok(skip(day, "no primary data".to_string()));
        }

        let samples = match align(&series.primary, &series.secondary, self.tolerance) {
            Ok(samples) => samples,
            Err(e) => return Ok(skip(day, e.to_string())),
        };

        let mut scratch = self.state.clone();
        let summary = scratch.fold(&self.grid, &samples);

        let cursor = day_cursor(day);
        self.store.save(cursor, &self.grid, &scratch)?;
        self.state = scratch;
        self.cursor = Some(cursor);

        info!(
            binned = summary.binned,
            unbinned = summary.unbinned,
            rejected = summary.rejected,
            bins = summary.bins_touched,
            "Day committed"
        );
        Ok(DayOutcome::Committed { day, summary })
    }
}

fn skip(day: NaiveDate, reason: String) -> DayOutcome {
    warn!(%day, reason = %reason, "Skipping day");
    DayOutcome::Skipped { day, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{PrimaryRecord, SecondaryRecord};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, day).unwrap()
    }

    fn one_sample(day: u32, x: f64, y: f64, value: f64) -> DaySeries {
        let t = Utc.with_ymd_and_hms(2000, 1, day, 12, 0, 0).unwrap();
        DaySeries {
            primary: vec![PrimaryRecord { time: t, value }],
            secondary: vec![SecondaryRecord { time: t, x, y }],
        }
    }

    struct MapLoader(HashMap<NaiveDate, DaySeries>);

    impl SourceLoader for MapLoader {
        fn load(&self, day: NaiveDate) -> Result<DaySeries, LoadError> {
            match self.0.get(&day) {
                Some(s) => Ok(s.clone()),
                None if day == d(9) => Err(LoadError::Io {
                    day,
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                }),
                None => Err(LoadError::NoData { day, series: "primary" }),
            }
        }
    }

    fn driver(dir: &std::path::Path) -> StreamDriver {
        let grid = BinGrid::new(vec![0.0, 10.0], vec![0.0, 24.0]).unwrap();
        StreamDriver::resume(grid, TimeDelta::seconds(3), CheckpointStore::new(dir)).unwrap()
    }

    #[test]
    fn test_day_source_filters_and_sorts() {
        let loader = MapLoader(HashMap::new());
        let mut src = DaySource::new(vec![d(3), d(1), d(2), d(3)], Some(day_cursor(d(1))), loader);
        assert_eq!(src.remaining(), 2);
        assert_eq!(src.next_batch().unwrap().day, d(2));
        assert_eq!(src.next_batch().unwrap().day, d(3));
        assert!(src.next_batch().is_none());
    }

    #[test]
    fn test_skips_missing_days_and_commits_others() {
        let tmp = TempDir::new().unwrap();
        let mut drv = driver(tmp.path());
        let loader = MapLoader(HashMap::from([(d(1), one_sample(1, 5.0, 5.0, 2.0))]));
        let mut src = DaySource::new(vec![d(1), d(2)], None, loader);

        let report = drv.run(&mut src).unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, d(2));
        assert_eq!(drv.cursor(), Some(day_cursor(d(1))));
    }

    #[test]
    fn test_unsorted_day_is_skipped_without_mutation() {
        let tmp = TempDir::new().unwrap();
        let mut drv = driver(tmp.path());
        let t0 = Utc.with_ymd_and_hms(2000, 1, 1, 10, 0, 5).unwrap();
        let t1 = Utc.with_ymd_and_hms(2000, 1, 1, 10, 0, 1).unwrap();
        let series = DaySeries {
            primary: vec![
                PrimaryRecord { time: t0, value: 1.0 },
                PrimaryRecord { time: t1, value: 1.0 },
            ],
            secondary: vec![SecondaryRecord { time: t1, x: 5.0, y: 5.0 }],
        };

        let outcome = drv
            .process_day(DayBatch { day: d(1), load: Ok(series) })
            .unwrap();
        assert!(matches!(outcome, DayOutcome::Skipped { .. }));
        assert_eq!(drv.state().total_samples(), 0.0);
        assert_eq!(drv.cursor(), None);
        assert!(CheckpointStore::new(tmp.path())
            .load(drv.grid())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_io_error_is_fatal_and_keeps_committed_days() {
        let tmp = TempDir::new().unwrap();
        let mut drv = driver(tmp.path());
        let loader = MapLoader(HashMap::from([(d(1), one_sample(1, 5.0, 5.0, 2.0))]));
        let mut src = DaySource::new(vec![d(1), d(9)], None, loader);

        let err = drv.run(&mut src).unwrap_err();
        assert!(matches!(err, MapError::Load(LoadError::Io { .. })));

        let (cursor, state) = CheckpointStore::new(tmp.path())
            .load(drv.grid())
            .unwrap()
            .unwrap();
        assert_eq!(cursor, day_cursor(d(1)));
        assert_eq!(state.count_at(0, 0), 1.0);
    }

    #[test]
    fn test_replayed_day_is_not_double_counted() {
        let tmp = TempDir::new().unwrap();
        let mut drv = driver(tmp.path());
        let batch = || DayBatch {
            day: d(1),
            load: Ok(one_sample(1, 5.0, 5.0, 2.0)),
        };
        drv.process_day(batch()).unwrap();
        let outcome = drv.process_day(batch()).unwrap();
        assert!(matches!(outcome, DayOutcome::Skipped { .. }));
        assert_eq!(drv.state().count_at(0, 0), 1.0);
    }

    /// Raises the stop flag while the given day is being loaded.
    struct StopOnDay {
        inner: MapLoader,
        day: NaiveDate,
        stop: Arc<AtomicBool>,
    }

    impl SourceLoader for StopOnDay {
        fn load(&self, day: NaiveDate) -> Result<DaySeries, LoadError> {
            if day == self.day {
                self.stop.store(true, Ordering::SeqCst);
            }
            self.inner.load(day)
        }
    }

    #[test]
    fn test_stop_request_finishes_current_day_then_returns() {
        let tmp = TempDir::new().unwrap();
        let mut drv = driver(tmp.path());
        let loader = StopOnDay {
            inner: MapLoader(HashMap::from([
                (d(1), one_sample(1, 5.0, 5.0, 2.0)),
                (d(2), one_sample(2, 5.0, 5.0, 4.0)),
                (d(3), one_sample(3, 5.0, 5.0, 6.0)),
            ])),
            day: d(2),
            stop: drv.stop_handle(),
        };
        let mut src = DaySource::new(vec![d(1), d(2), d(3)], None, loader);

        let report = drv.run(&mut src).unwrap();
        assert!(report.interrupted);
        assert_eq!(report.committed, 2);
        assert_eq!(src.remaining(), 1);
        assert_eq!(drv.cursor(), Some(day_cursor(d(2))));
        assert_eq!(drv.state().mean_at(0, 0), 3.0);

        let (cursor, _) = CheckpointStore::new(tmp.path()).load(drv.grid()).unwrap().unwrap();
        assert_eq!(cursor, day_cursor(d(2)));
    }

    #[test]
    fn test_failed_save_leaves_state_untouched() {
        let tmp = TempDir::new().unwrap();
        // a regular file where the checkpoint directory should be
        let blocked = tmp.path().join("ckpt");
        std::fs::write(&blocked, "").unwrap();
        let mut drv = driver(&blocked);

        let result = drv.process_day(DayBatch {
            day: d(1),
            load: Ok(one_sample(1, 5.0, 5.0, 2.0)),
        });
        assert!(matches!(result, Err(MapError::Checkpoint(_))));
        assert_eq!(drv.state().total_samples(), 0.0);
        assert_eq!(drv.cursor(), None);
    }
}
