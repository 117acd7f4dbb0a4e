//! Map export and run summaries.
//!
//! Maps are written as CSV: the header row holds the lower edge of each
//! y bin, the first column the lower edge of each x bin.

use std::fs;
use std::path::Path;

use anyhow::Result;
use csv::WriterBuilder;
use tracing::{debug, info};

use crate::aggregate::MapView;
use crate::driver::RunReport;

/// Logs the run report as pretty-printed JSON.
pub fn print_json(report: &RunReport) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Writes `view` to `path`, replacing any previous export.
pub fn export_map(path: &Path, view: &MapView<'_>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let nx = view.x_bounds.len() - 1;
    let ny = view.y_bounds.len() - 1;
    debug!(path = %path.display(), nx, ny, "Exporting map");

    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;

    let header = std::iter::once(String::new())
        .chain(view.y_bounds[..ny].iter().map(|y| y.to_string()));
    writer.write_record(header)?;

    for i in 0..nx {
        let row = std::iter::once(view.x_bounds[i].to_string())
            .chain((0..ny).map(|j| view.get(i, j).to_string()));
        writer.write_record(row)?;
    }

    writer.flush()?;
    info!(path = %path.display(), "Map exported");
    Ok(())
}
