use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::GridError;
use crate::grid::{BinGrid, arange};
use crate::source::{CsvLoader, CsvLoaderConfig, FallbackEnumerator, LocalInventory, RemoteListing};

const DEFAULT_REMOTE_URL: &str = "https://izw1.caltech.edu/sampex/DataCenter/DATA/HILThires/State4/";

/// Bin edges for one axis, either listed or generated like `numpy.arange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Range { start: f64, stop: f64, step: f64 },
    Edges(Vec<f64>),
}

impl AxisSpec {
    pub fn edges(&self, axis: &'static str) -> Result<Vec<f64>, GridError> {
        match self {
            AxisSpec::Range { start, stop, step } => arange(axis, *start, *stop, *step),
            AxisSpec::Edges(edges) => Ok(edges.clone()),
        }
    }
}

/// Everything a run needs, passed explicitly to each collaborator.
///
/// Stored as JSON; missing keys take the defaults below:
/// ```json
/// {
///   "source": { "data_dir": "/data/sampex", "primary_prefix": "hhrr" },
///   "x_bins": { "start": 2, "stop": 11, "step": 1 },
///   "y_bins": [0, 6, 12, 18, 24],
///   "tolerance_secs": 3
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub source: CsvLoaderConfig,
    /// Directory index listed when the data directory has no primary files.
    pub remote_url: Option<String>,
    pub checkpoint_dir: PathBuf,
    pub mean_map: PathBuf,
    pub count_map: PathBuf,
    pub tolerance_secs: u32,
    pub x_bins: AxisSpec,
    pub y_bins: AxisSpec,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            source: CsvLoaderConfig::default(),
            remote_url: Some(DEFAULT_REMOTE_URL.to_string()),
            checkpoint_dir: PathBuf::from("checkpoint"),
            mean_map: PathBuf::from("sampex_hilt_l_mlt_map.csv"),
            count_map: PathBuf::from("sampex_hilt_l_mlt_counts.csv"),
            tolerance_secs: 3,
            x_bins: AxisSpec::Range {
                start: 2.0,
                stop: 11.0,
                step: 1.0,
            },
            y_bins: AxisSpec::Range {
                start: 0.0,
                stop: 24.1,
                step: 1.0,
            },
        }
    }
}

impl MapConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn grid(&self) -> Result<BinGrid, GridError> {
        BinGrid::new(self.x_bins.edges("x")?, self.y_bins.edges("y")?)
    }

    pub fn tolerance(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.tolerance_secs))
    }

    pub fn enumerator(&self) -> FallbackEnumerator {
        FallbackEnumerator {
            local: LocalInventory {
                data_dir: self.source.data_dir.clone(),
                prefix: self.source.primary_prefix.clone(),
            },
            remote: self.remote_url.as_ref().map(|url| RemoteListing {
                url: url.clone(),
                prefix: self.source.primary_prefix.clone(),
            }),
        }
    }

    pub fn loader(&self) -> CsvLoader {
        CsvLoader::new(self.source.clone())
    }
}
