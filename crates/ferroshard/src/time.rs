use chrono::{DateTime, Utc};

/// A trait for time sources that return the current UTC wall-clock time.
///
/// Counters bucket increments by hour, day, month and year, so the source
/// must be wall-clock aligned rather than monotonic. Plug in a fixed source in
/// tests.
///
/// # Example
///
/// ```
/// use chrono::{DateTime, TimeZone, Utc};
/// use ferroshard::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn now(&self) -> DateTime<Utc> {
///         Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
///     }
/// }
///
/// assert_eq!(FixedTime.now().timestamp(), 1_735_689_600);
/// ```
pub trait TimeSource {
    /// Returns the current time in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Default, Clone, Copy, Debug)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a single instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl TimeSource for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
