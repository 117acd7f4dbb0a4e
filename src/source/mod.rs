//! Collaborators that find days and load their data.
//!
//! [`DayEnumerator`] lists candidate days, [`SourceLoader`] loads the count
//! and position series for one day. The shipped implementations read a local
//! data directory and fall back to an HTTP directory listing.

pub mod csv_loader;
pub mod days;

pub use csv_loader::{CsvLoader, CsvLoaderConfig};
pub use days::{FallbackEnumerator, LocalInventory, RemoteListing, decode_day};

use anyhow::Result;
use chrono::NaiveDate;

use crate::align::{PrimaryRecord, SecondaryRecord};
use crate::error::LoadError;

/// Both series for one day, as loaded, not yet aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaySeries {
    pub primary: Vec<PrimaryRecord>,
    pub secondary: Vec<SecondaryRecord>,
}

/// Loads the primary and secondary series for a day.
pub trait SourceLoader {
    /// Returns a skippable [`LoadError`] kind when the day has no usable data
    /// and `Io`/`Other` for everything else.
    fn load(&self, day: NaiveDate) -> Result<DaySeries, LoadError>;
}

/// Lists the days that can be processed, in chronological order.
pub trait DayEnumerator {
    fn days(&self) -> Result<Vec<NaiveDate>>;
}

impl<T: SourceLoader + ?Sized> SourceLoader for Box<T> {
    fn load(&self, day: NaiveDate) -> Result<DaySeries, LoadError> {
        (**self).load(day)
    }
}

impl<T: DayEnumerator + ?Sized> DayEnumerator for Box<T> {
    fn days(&self) -> Result<Vec<NaiveDate>> {
        (**self).days()
    }
}
