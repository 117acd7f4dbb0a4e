//! Streaming L/MLT precipitation maps.
//!
//! Daily particle-count series are aligned with position fixes, binned on a
//! two-axis grid and folded into a running per-bin mean. The aggregate is
//! checkpointed after every committed day so long runs can resume without
//! reprocessing or double counting.

pub mod aggregate;
pub mod align;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod grid;
pub mod output;
pub mod source;
