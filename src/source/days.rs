//! Turning file names into calendar days.
//!
//! Daily files carry a `YYYYDDD` stamp (year + day of year), e.g.
//! `hhrr1997220.txt` is 1997-08-08.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, info, warn};

use super::DayEnumerator;
use crate::fetch::fetch_text;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Decodes the first run of digits in `name` as a `YYYYDDD` date.
pub fn decode_day(name: &str) -> Option<NaiveDate> {
    let digits = DIGITS.find(name)?.as_str();
    if digits.len() < 7 {
        return None;
    }
    let year: i32 = digits[..4].parse().ok()?;
    let doy: u32 = digits[4..7].parse().ok()?;
    NaiveDate::from_yo_opt(year, doy)
}

/// Every `YYYYDDD` date stamped in `name`, one per digit run of at least
/// seven digits. Unlike [`decode_day`] this looks past short runs such as
/// the `6` in `PSSet_6sec_1997220`.
pub(crate) fn stamped_days(name: &str) -> Vec<NaiveDate> {
    DIGITS
        .find_iter(name)
        .map(|m| m.as_str())
        .filter(|d| d.len() >= 7)
        .filter_map(|d| NaiveDate::from_yo_opt(d[..4].parse().ok()?, d[4..7].parse().ok()?))
        .collect()
}

/// Formats `day` back into its `YYYYDDD` stamp.
pub fn encode_day(day: NaiveDate) -> String {
    day.format("%Y%j").to_string()
}

fn sorted_days(names: impl Iterator<Item = String>) -> Vec<NaiveDate> {
    let mut days: Vec<NaiveDate> = names
        .filter_map(|n| {
            let day = decode_day(&n);
            if day.is_none() {
                debug!(name = %n, "No YYYYDDD stamp in file name");
            }
            day
        })
        .collect();
    days.sort_unstable();
    days.dedup();
    days
}

/// Recursively collects files under `dir` whose name starts with `prefix`.
pub(crate) fn find_files(dir: &Path, prefix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else if entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(prefix))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Days for which a primary file exists in the local data directory.
#[derive(Debug, Clone)]
pub struct LocalInventory {
    pub data_dir: PathBuf,
    pub prefix: String,
}

impl DayEnumerator for LocalInventory {
    fn days(&self) -> Result<Vec<NaiveDate>> {
        let files = find_files(&self.data_dir, &self.prefix)?;
        let names = files
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string));
        Ok(sorted_days(names))
    }
}

/// Days listed in an HTTP directory index.
#[derive(Debug, Clone)]
pub struct RemoteListing {
    pub url: String,
    pub prefix: String,
}

impl RemoteListing {
    /// File names in an HTML index page that start with the prefix.
    pub fn parse_index(&self, html: &str) -> Vec<String> {
        let pattern = format!(r#"href="(?:[^"]*/)?({}[^"/]*)""#, regex::escape(&self.prefix));
        let Ok(re) = Regex::new(&pattern) else {
            return Vec::new();
        };
        re.captures_iter(html).map(|c| c[1].to_string()).collect()
    }
}

impl DayEnumerator for RemoteListing {
    fn days(&self) -> Result<Vec<NaiveDate>> {
        let html = fetch_text(&self.url)?;
        let names = self.parse_index(&html);
        if names.is_empty() {
            return Err(anyhow!("0 {}* files found at {}", self.prefix, self.url));
        }
        info!(url = %self.url, files = names.len(), "Listed remote files");
        Ok(sorted_days(names.into_iter()))
    }
}

/// Local inventory first, remote listing when nothing is on disk.
pub struct FallbackEnumerator {
    pub local: LocalInventory,
    pub remote: Option<RemoteListing>,
}

impl DayEnumerator for FallbackEnumerator {
    fn days(&self) -> Result<Vec<NaiveDate>> {
        let local = self.local.days()?;
        if !local.is_empty() {
            info!(days = local.len(), dir = %self.local.data_dir.display(), "Using local inventory");
            return Ok(local);
        }
        match &self.remote {
            Some(remote) => {
                warn!(dir = %self.local.data_dir.display(), "No local files, falling back to remote listing");
                remote.days()
            }
            None => Ok(local),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_decode_day() {
        assert_eq!(decode_day("hhrr1997220.txt"), NaiveDate::from_ymd_opt(1997, 8, 8));
        assert_eq!(decode_day("hhrr2000001.txt.zip"), NaiveDate::from_ymd_opt(2000, 1, 1));
        assert_eq!(decode_day("hhrr2000366"), NaiveDate::from_ymd_opt(2000, 12, 31));
        assert_eq!(decode_day("hhrr1999366"), None);
        assert_eq!(decode_day("hhrr97.txt"), None);
        assert_eq!(decode_day("readme"), None);
    }

    #[test]
    fn test_stamped_days_skips_short_runs() {
        let day = NaiveDate::from_ymd_opt(1997, 8, 8).unwrap();
        assert_eq!(decode_day("PSSet_6sec_1997220.csv"), None);
        assert_eq!(stamped_days("PSSet_6sec_1997220.csv"), vec![day]);
        assert_eq!(stamped_days("hhrr1997220_v2.csv"), vec![day]);
        assert!(stamped_days("notes_42.txt").is_empty());
    }

    #[test]
    fn test_encode_round_trips_with_decode() {
        let day = NaiveDate::from_ymd_opt(2004, 3, 9).unwrap();
        assert_eq!(encode_day(day), "2004069");
    }

    #[test]
    fn test_local_inventory_walks_subdirs() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("1998")).unwrap();
        fs::write(tmp.path().join("hhrr1997220.csv"), "").unwrap();
        fs::write(tmp.path().join("1998").join("hhrr1998001.csv"), "").unwrap();
        fs::write(tmp.path().join("1998").join("hhrr1998001.csv.bak"), "").unwrap();
        fs::write(tmp.path().join("PSSet_6sec_1997220.csv"), "").unwrap();

        let inv = LocalInventory {
            data_dir: tmp.path().to_path_buf(),
            prefix: "hhrr".into(),
        };
        assert_eq!(
            inv.days().unwrap(),
            vec![
                NaiveDate::from_ymd_opt(1997, 8, 8).unwrap(),
                NaiveDate::from_ymd_opt(1998, 1, 1).unwrap(),
            ]
        );
    }

    #[test]
    fn test_missing_dir_is_empty_inventory() {
        let inv = LocalInventory {
            data_dir: PathBuf::from("/nonexistent/precip_maps"),
            prefix: "hhrr".into(),
        };
        assert!(inv.days().unwrap().is_empty());
    }

    #[test]
    fn test_parse_index() {
        let listing = RemoteListing {
            url: "https://example.invalid/State4/".into(),
            prefix: "hhrr".into(),
        };
        let html = r#"<a href="?C=N;O=D">Name</a>
            <a href="hhrr1997220.txt.zip">hhrr1997220.txt.zip</a>
            <a href="/DATA/hhrr1997221.txt.zip">x</a>
            <a href="other1997222.txt">y</a>"#;
        assert_eq!(
            listing.parse_index(html),
            vec!["hhrr1997220.txt.zip", "hhrr1997221.txt.zip"]
        );
    }
}
