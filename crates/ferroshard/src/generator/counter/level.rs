use core::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::Error;

/// Time-hierarchy level of a counter shard.
///
/// `Total` holds every delta regardless of time. The calendar levels bucket
/// deltas by the UTC hour, day, month or year in which they were written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Level {
    Total,
    Year,
    Month,
    Day,
    Hour,
}

impl Level {
    /// Every level, coarsest first.
    pub const ALL: [Self; 5] = [Self::Total, Self::Year, Self::Month, Self::Day, Self::Hour];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
        }
    }

    /// Start of the bucket containing `t`. `Total` has a single bucket
    /// starting at the Unix epoch.
    pub fn bucket_start(self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (y, m, d, h) = (t.year(), t.month(), t.day(), t.hour());
        let start = match self {
            Self::Total => return Some(DateTime::UNIX_EPOCH),
            Self::Year => Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0),
            Self::Month => Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0),
            Self::Day => Utc.with_ymd_and_hms(y, m, d, 0, 0, 0),
            Self::Hour => Utc.with_ymd_and_hms(y, m, d, h, 0, 0),
        };
        start.single()
    }

    /// Stable key naming the bucket containing `t`, e.g. `M202610` or
    /// `H2026101614`.
    pub fn bucket_key(self, t: DateTime<Utc>) -> String {
        let (y, m, d, h) = (t.year(), t.month(), t.day(), t.hour());
        match self {
            Self::Total => "T".to_owned(),
            Self::Year => format!("Y{y:04}"),
            Self::Month => format!("M{y:04}{m:02}"),
            Self::Day => format!("D{y:04}{m:02}{d:02}"),
            Self::Hour => format!("H{y:04}{m:02}{d:02}{h:02}"),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid(format!("unknown level `{s}`")))
    }
}
