//! Nearest-timestamp merge of the count series with the position series.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AlignError;

/// One measurement of the precipitating quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrimaryRecord {
    pub time: DateTime<Utc>,
    pub value: f64,
}

/// One position fix: radial (`x`) and local-time (`y`) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecondaryRecord {
    pub time: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
}

/// A primary record joined with its nearest position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// Pairs each primary record with the secondary record nearest in time.
///
/// Records whose nearest match is more than `tolerance` away are dropped.
/// On an exact tie the earlier secondary record wins. Both inputs must be
/// strictly increasing in time.
pub fn align(
    primary: &[PrimaryRecord],
    secondary: &[SecondaryRecord],
    tolerance: TimeDelta,
) -> Result<Vec<Sample>, AlignError> {
    check_sorted("primary", primary.iter().map(|r| r.time))?;
    check_sorted("secondary", secondary.iter().map(|r| r.time))?;

    let mut merged = Vec::with_capacity(primary.len());
    // index of the first secondary record at or after the current primary time
    let mut next = 0;

    for p in primary {
        while next < secondary.len() && secondary[next].time < p.time {
            next += 1;
        }

        let before = next.checked_sub(1).map(|k| &secondary[k]);
        let after = secondary.get(next);

        let nearest = match (before, after) {
            (Some(b), Some(a)) => {
                if p.time - b.time <= a.time - p.time {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => break,
        };

        if (p.time - nearest.time).abs() <= tolerance {
            merged.push(Sample {
                time: p.time,
                x: nearest.x,
                y: nearest.y,
                value: p.value,
            });
        }
    }

    if merged.is_empty() {
        return Err(AlignError::NoMatch);
    }
    Ok(merged)
}

fn check_sorted(
    series: &'static str,
    times: impl Iterator<Item = DateTime<Utc>>,
) -> Result<(), AlignError> {
    let mut prev: Option<DateTime<Utc>> = None;
    for (index, t) in times.enumerate() {
        if let Some(p) = prev {
            if t <= p {
                return Err(AlignError::Unsorted { series, index });
            }
        }
        prev = Some(t);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, h, m, s).unwrap()
    }

    fn p(t: DateTime<Utc>, value: f64) -> PrimaryRecord {
        PrimaryRecord { time: t, value }
    }

    fn s(t: DateTime<Utc>, x: f64, y: f64) -> SecondaryRecord {
        SecondaryRecord { time: t, x, y }
    }

    #[test]
    fn test_drops_primary_without_match() {
        let primary = [p(at(10, 0, 0), 1.0), p(at(10, 0, 10), 2.0)];
        let secondary = [s(at(10, 0, 1), 4.0, 6.0)];

        let merged = align(&primary, &secondary, TimeDelta::seconds(3)).unwrap();
        assert_eq!(
            merged,
            vec![Sample {
                time: at(10, 0, 0),
                x: 4.0,
                y: 6.0,
                value: 1.0
            }]
        );
    }

    #[test]
    fn test_unsorted_primary_fails() {
        let primary = [p(at(10, 0, 5), 1.0), p(at(10, 0, 1), 2.0)];
        let secondary = [s(at(10, 0, 1), 4.0, 6.0)];
        assert_eq!(
            align(&primary, &secondary, TimeDelta::seconds(3)),
            Err(AlignError::Unsorted {
                series: "primary",
                index: 1
            })
        );
    }

    #[test]
    fn test_duplicate_secondary_time_fails() {
        let primary = [p(at(10, 0, 0), 1.0)];
        let secondary = [s(at(10, 0, 1), 4.0, 6.0), s(at(10, 0, 1), 5.0, 6.0)];
        assert!(matches!(
            align(&primary, &secondary, TimeDelta::seconds(3)),
            Err(AlignError::Unsorted {
                series: "secondary",
                ..
            })
        ));
    }

    #[test]
    fn test_picks_nearest_on_either_side() {
        let primary = [p(at(10, 0, 2), 1.0), p(at(10, 0, 8), 2.0)];
        let secondary = [s(at(10, 0, 0), 1.0, 0.0), s(at(10, 0, 9), 2.0, 0.0)];
        let merged = align(&primary, &secondary, TimeDelta::seconds(3)).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].x, 1.0);
        assert_eq!(merged[1].x, 2.0);
    }

    #[test]
    fn test_tie_prefers_earlier_and_tolerance_is_inclusive() {
        let primary = [p(at(10, 0, 3), 1.0)];
        let secondary = [s(at(10, 0, 0), 1.0, 0.0), s(at(10, 0, 6), 2.0, 0.0)];
        let merged = align(&primary, &secondary, TimeDelta::seconds(3)).unwrap();
        assert_eq!(merged[0].x, 1.0);
    }

    #[test]
    fn test_no_match_at_all() {
        let primary = [p(at(10, 0, 0), 1.0)];
        let secondary = [s(at(11, 0, 0), 1.0, 0.0)];
        assert_eq!(
            align(&primary, &secondary, TimeDelta::seconds(3)),
            Err(AlignError::NoMatch)
        );
        assert_eq!(align(&primary, &[], TimeDelta::seconds(3)), Err(AlignError::NoMatch));
    }

    #[test]
    fn test_many_primaries_share_one_fix() {
        let primary: Vec<_> = (0..5).map(|k| p(at(10, 0, k), k as f64)).collect();
        let secondary = [s(at(10, 0, 2), 3.0, 1.0)];
        let merged = align(&primary, &secondary, TimeDelta::seconds(3)).unwrap();
        assert_eq!(merged.len(), 5);
        assert!(merged.iter().all(|m| m.x == 3.0));
    }
}
