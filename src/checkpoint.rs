//! On-disk checkpoint of the aggregation: cursor timestamp plus the mean and
//! count arrays it belongs to.
//!
//! Layout inside the checkpoint directory:
//!
//! ```text
//! cursor.txt                      RFC 3339 timestamp of the last committed day
//! mean-20000105T000000.csv        nx rows x ny columns, no header
//! count-20000105T000000.csv
//! grid-20000105T000000.csv        x edges on the first row, y edges on the second
//! ```
//!
//! The arrays are keyed by the cursor they belong to and are written before
//! `cursor.txt` is swapped in with a rename, so the cursor only ever names a
//! complete pair of arrays. A crash part way through a save leaves the
//! previous checkpoint untouched.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use tracing::{debug, info, warn};

use crate::aggregate::AggregateState;
use crate::error::CheckpointError;
use crate::grid::BinGrid;

const CURSOR_FILE: &str = "cursor.txt";

/// Timestamp of the most recently committed day.
pub type Cursor = DateTime<Utc>;

/// Midnight UTC of `day`, the cursor value recorded when the day commits.
pub fn day_cursor(day: NaiveDate) -> Cursor {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Days strictly after `cursor`, in their original order.
pub fn pending(days: &[NaiveDate], cursor: Option<Cursor>) -> Vec<NaiveDate> {
    match cursor {
        None => days.to_vec(),
        Some(c) => days.iter().copied().filter(|d| day_cursor(*d) > c).collect(),
    }
}

/// Directory-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists `state` together with `cursor` and the edges of the `grid`
    /// it was binned on.
    pub fn save(&self, cursor: Cursor, grid: &BinGrid, state: &AggregateState) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        let stamp = stamp(cursor);
        let (nx, ny) = state.shape();

        write_array(&self.array_path("mean", &stamp), state.mean(), nx, ny)?;
        write_array(&self.array_path("count", &stamp), state.count(), nx, ny)?;
        write_edges(&self.array_path("grid", &stamp), grid)?;
        write_atomic(&self.dir.join(CURSOR_FILE), cursor.to_rfc3339().as_bytes())?;

        debug!(cursor = %cursor, dir = %self.dir.display(), "Checkpoint saved");
        self.remove_stale(&stamp);
        Ok(())
    }

    /// Reads the last checkpoint, or `None` if nothing was ever committed.
    ///
    /// The arrays must have the shape of `grid` and the recorded edges must
    /// equal its edges; resuming onto a different grid is refused rather
    /// than reshaped.
    pub fn load(&self, grid: &BinGrid) -> Result<Option<(Cursor, AggregateState)>, CheckpointError> {
        let cursor_path = self.dir.join(CURSOR_FILE);
        if !cursor_path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&cursor_path)?;
        let cursor = DateTime::parse_from_rfc3339(raw.trim())
            .map_err(|e| CheckpointError::Malformed {
                file: cursor_path.display().to_string(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        let stamp = stamp(cursor);
        let (nx, ny) = grid.shape();
        let mean = read_array(&self.array_path("mean", &stamp), nx, ny)?;
        let count_path = self.array_path("count", &stamp);
        let count = read_array(&count_path, nx, ny)?;
        check_edges(&self.array_path("grid", &stamp), grid)?;

        let state = AggregateState::from_parts(nx, ny, mean, count).map_err(|source| {
            CheckpointError::State {
                file: count_path.display().to_string(),
                source,
            }
        })?;

        info!(
            cursor = %cursor,
            samples = state.total_samples(),
            "Resuming from checkpoint"
        );
        Ok(Some((cursor, state)))
    }

    fn array_path(&self, name: &str, stamp: &str) -> PathBuf {
        self.dir.join(format!("{name}-{stamp}.csv"))
    }

    /// Deletes files that belong to an older cursor or an unfinished save.
    fn remove_stale(&self, keep: &str) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let is_array = ["mean-", "count-", "grid-"].iter().any(|p| name.starts_with(p));
            if is_array && !name.contains(keep) {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(file = name, error = %e, "Failed to remove stale checkpoint array");
                }
            }
        }
    }
}

fn stamp(cursor: Cursor) -> String {
    cursor.format("%Y%m%dT%H%M%S").to_string()
}

fn write_array(path: &Path, values: &[f64], nx: usize, ny: usize) -> Result<(), CheckpointError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    for i in 0..nx {
        writer.write_record(values[i * ny..(i + 1) * ny].iter().map(|v| v.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| CheckpointError::Io(e.into_error()))?;
    write_atomic(path, &bytes)
}

/// Writes to a `.tmp` sibling, syncs, then renames over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn write_edges(path: &Path, grid: &BinGrid) -> Result<(), CheckpointError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(grid.x_bounds().iter().map(|v| v.to_string()))?;
    writer.write_record(grid.y_bounds().iter().map(|v| v.to_string()))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| CheckpointError::Io(e.into_error()))?;
    write_atomic(path, &bytes)
}

/// Compares the recorded edges with `grid`, exactly.
fn check_edges(path: &Path, grid: &BinGrid) -> Result<(), CheckpointError> {
    let malformed = |reason: String| CheckpointError::Malformed {
        file: path.display().to_string(),
        reason,
    };
    let file = File::open(path).map_err(|e| malformed(format!("grid edges missing for recorded cursor: {e}")))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut rows = Vec::with_capacity(2);
    for record in rdr.records() {
        let record = record?;
        let edges = record
            .iter()
            .map(|field| {
                field
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| malformed(format!("'{field}' is not a number")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(edges);
    }
    let [found_x, found_y]: [Vec<f64>; 2] = rows
        .try_into()
        .map_err(|rows: Vec<_>| malformed(format!("expected 2 rows of edges, got {}", rows.len())))?;

    for (axis, expected, found) in [("x", grid.x_bounds(), found_x), ("y", grid.y_bounds(), found_y)] {
        if found != expected {
            return Err(CheckpointError::GridMismatch {
                axis,
                expected: expected.to_vec(),
                found,
            });
        }
    }
    Ok(())
}

fn read_array(path: &Path, nx: usize, ny: usize) -> Result<Vec<f64>, CheckpointError> {
    let file = File::open(path).map_err(|e| CheckpointError::Malformed {
        file: path.display().to_string(),
        reason: format!("array missing for recorded cursor: {e}"),
    })?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut values = Vec::with_capacity(nx * ny);
    let mut rows = 0;
    let mut cols: Option<usize> = None;

    for record in rdr.records() {
        let record = record?;
        match cols {
            None => cols = Some(record.len()),
            Some(c) if c != record.len() => {
                return Err(CheckpointError::Malformed {
                    file: path.display().to_string(),
                    reason: format!("row {rows} has {} columns, expected {c}", record.len()),
                });
            }
            Some(_) => {}
        }
        for field in record.iter() {
            let v: f64 = field.trim().parse().map_err(|_| CheckpointError::Malformed {
                file: path.display().to_string(),
                reason: format!("row {rows}: '{field}' is not a number"),
            })?;
            values.push(v);
        }
        rows += 1;
    }

    let cols = cols.unwrap_or(0);
    if rows != nx || cols != ny {
        return Err(CheckpointError::Incompatible {
            expected_rows: nx,
            expected_cols: ny,
            found_rows: rows,
            found_cols: cols,
        });
    }
    Ok(values)
}
