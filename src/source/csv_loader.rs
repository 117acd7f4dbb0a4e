//! Loads daily series from plain CSV files in a local data directory.
//!
//! A day `D` is served by exactly one primary file named
//! `<primary_prefix>*<YYYYDDD>*` and one secondary file named
//! `<secondary_prefix>*<YYYYDDD>*`. Both carry a header row; the column names
//! are configurable.
//!
//! The data directory is walked once, on the first load, and the files found
//! are indexed by the days stamped in their names. Files added after that are
//! not seen by the same loader.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::days::{find_files, stamped_days};
use super::{DaySeries, SourceLoader};
use crate::align::{PrimaryRecord, SecondaryRecord};
use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvLoaderConfig {
    pub data_dir: PathBuf,
    pub primary_prefix: String,
    pub secondary_prefix: String,
    pub time_column: String,
    pub value_column: String,
    pub x_column: String,
    pub y_column: String,
    /// Column holding the instrument mode, checked when present.
    pub mode_column: String,
    /// The only instrument mode the map accepts.
    pub supported_mode: String,
}

impl Default for CsvLoaderConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            primary_prefix: "hhrr".to_string(),
            secondary_prefix: "PSSet".to_string(),
            time_column: "time".to_string(),
            value_column: "counts".to_string(),
            x_column: "L_Shell".to_string(),
            y_column: "MLT".to_string(),
            mode_column: "state".to_string(),
            supported_mode: "4".to_string(),
        }
    }
}

/// Files of one prefix, keyed by stamped day.
type DayFiles = HashMap<NaiveDate, Vec<PathBuf>>;

#[derive(Debug, Default)]
struct FileIndex {
    primary: DayFiles,
    secondary: DayFiles,
}

pub struct CsvLoader {
    config: CsvLoaderConfig,
    index: OnceCell<FileIndex>,
}

impl CsvLoader {
    pub fn new(config: CsvLoaderConfig) -> Self {
        Self {
            config,
            index: OnceCell::new(),
        }
    }

    /// Walks the data directory on first use. A failed walk is not cached.
    fn index(&self, day: NaiveDate) -> Result<&FileIndex, LoadError> {
        if let Some(index) = self.index.get() {
            return Ok(index);
        }
        let by_day = |prefix: &str| -> Result<DayFiles, LoadError> {
            let mut files = DayFiles::new();
            for path in find_files(&self.config.data_dir, prefix).map_err(|source| LoadError::Io { day, source })? {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                for stamped in stamped_days(name) {
                    files.entry(stamped).or_default().push(path.clone());
                }
            }
            Ok(files)
        };
        let index = FileIndex {
            primary: by_day(&self.config.primary_prefix)?,
            secondary: by_day(&self.config.secondary_prefix)?,
        };
        debug!(
            dir = %self.config.data_dir.display(),
            primary_days = index.primary.len(),
            secondary_days = index.secondary.len(),
            "Indexed data directory"
        );
        Ok(self.index.get_or_init(|| index))
    }

    fn load_primary(&self, day: NaiveDate, path: &Path) -> Result<Vec<PrimaryRecord>, LoadError> {
        let (headers, rows) = read_rows(day, path)?;
        let time = column(day, &headers, &self.config.time_column, path)?;
        let value = column(day, &headers, &self.config.value_column, path)?;
        let mode = headers.iter().position(|h| h == self.config.mode_column);

        let mut records = Vec::with_capacity(rows.len());
        for (line, row) in rows.iter().enumerate() {
            if let Some(m) = mode {
                let found = row.get(m).unwrap_or("").trim();
                if found != self.config.supported_mode {
                    return Err(LoadError::UnsupportedMode {
                        day,
                        mode: found.to_string(),
                    });
                }
            }
            let count = parse_f64(day, row, value, line)?;
            if !count.is_finite() || count < 0.0 {
                return Err(LoadError::DataQuality {
                    day,
                    reason: format!("row {line}: count {count} is not a finite non-negative number"),
                });
            }
            records.push(PrimaryRecord {
                time: parse_time(day, row, time, line)?,
                value: count,
            });
        }
        Ok(records)
    }

    fn load_secondary(&self, day: NaiveDate, path: &Path) -> Result<Vec<SecondaryRecord>, LoadError> {
        let (headers, rows) = read_rows(day, path)?;
        let time = column(day, &headers, &self.config.time_column, path)?;
        let x = column(day, &headers, &self.config.x_column, path)?;
        let y = column(day, &headers, &self.config.y_column, path)?;

        rows.iter()
            .enumerate()
            .map(|(line, row)| {
                Ok(SecondaryRecord {
                    time: parse_time(day, row, time, line)?,
                    x: parse_f64(day, row, x, line)?,
                    y: parse_f64(day, row, y, line)?,
                })
            })
            .collect()
    }
}

impl SourceLoader for CsvLoader {
    fn load(&self, day: NaiveDate) -> Result<DaySeries, LoadError> {
        let index = self.index(day)?;
        let primary_path = find_one(day, &index.primary, "primary")?;
        let primary = self.load_primary(day, &primary_path)?;
        if primary.is_empty() {
            return Err(LoadError::NoData { day, series: "primary" });
        }

        let secondary_path = find_one(day, &index.secondary, "secondary")?;
        let secondary = self.load_secondary(day, &secondary_path)?;

        debug!(
            %day,
            primary = primary.len(),
            secondary = secondary.len(),
            "Loaded day"
        );
        Ok(DaySeries { primary, secondary })
    }
}

fn find_one(day: NaiveDate, files: &DayFiles, series: &'static str) -> Result<PathBuf, LoadError> {
    let matches = files.get(&day).map(Vec::as_slice).unwrap_or_default();
    match matches {
        [] => Err(LoadError::NoData { day, series }),
        [only] => Ok(only.clone()),
        many => Err(LoadError::DataQuality {
            day,
            reason: format!("{} matched {series} files found", many.len()),
        }),
    }
}

fn read_rows(day: NaiveDate, path: &Path) -> Result<(StringRecord, Vec<StringRecord>), LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io { day, source })?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers().map_err(|e| csv_error(day, path, e))?.clone();
    let rows = rdr
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| csv_error(day, path, e))?;
    Ok((headers, rows))
}

fn csv_error(day: NaiveDate, path: &Path, e: csv::Error) -> LoadError {
    if e.is_io_error() {
        match e.into_kind() {
            csv::ErrorKind::Io(source) => LoadError::Io { day, source },
            other => LoadError::Other(anyhow::anyhow!("{:?}", other)),
        }
    } else {
        LoadError::DataQuality {
            day,
            reason: format!("{}: {}", path.display(), e),
        }
    }
}

fn column(day: NaiveDate, headers: &StringRecord, name: &str, path: &Path) -> Result<usize, LoadError> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| LoadError::DataQuality {
            day,
            reason: format!("{} has no '{}' column", path.display(), name),
        })
}

fn parse_f64(day: NaiveDate, row: &StringRecord, col: usize, line: usize) -> Result<f64, LoadError> {
    let raw = row.get(col).unwrap_or("").trim();
    raw.parse().map_err(|_| LoadError::DataQuality {
        day,
        reason: format!("row {line}: '{raw}' is not a number"),
    })
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DD HH:MM:SS[.f]` taken as UTC.
fn parse_time(day: NaiveDate, row: &StringRecord, col: usize, line: usize) -> Result<DateTime<Utc>, LoadError> {
    let raw = row.get(col).unwrap_or("").trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.and_utc())
        .ok_or_else(|| LoadError::DataQuality {
            day,
            reason: format!("row {line}: '{raw}' is not a timestamp"),
        })
}
