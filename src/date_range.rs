//! Index ↔ wall-clock interval mapping.
//!
//! A `DateRange` correlates absolute time intervals with a nominal,
//! contiguous index range. Each interval reserves `interval_ms × 1000`
//! indexes (`MAX_INDEX_PER_MS` per millisecond); the reservation is a
//! scaling factor for index→time estimates and bucket naming, not a limit
//! on actual append rates. Time queries still go through timestamp scans
//! for correctness; these mappings bound and label them.

/// Reserved index capacity per millisecond of interval.
pub const MAX_INDEX_PER_MS: u64 = 1000;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Interval granularity for bucket naming and chunk alignment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DateRange {
    Secondly,
    Minutely,
    Hourly,
    #[default]
    Daily,
}

impl DateRange {
    pub fn interval_ms(self) -> i64 {
        match self {
            DateRange::Secondly => SECOND_MS,
            DateRange::Minutely => MINUTE_MS,
            DateRange::Hourly => HOUR_MS,
            DateRange::Daily => DAY_MS,
        }
    }

    /// Reserved (not actual) index capacity per interval.
    pub fn indexes_per_interval(self) -> u64 {
        self.interval_ms() as u64 * MAX_INDEX_PER_MS
    }

    /// Nominal index range reserved for the interval containing `time_ms`.
    ///
    /// These are bucketing indices, not positions to read from.
    pub fn index_bounds(self, time_ms: i64) -> (u64, u64) {
        let interval = self.interval_ms();
        let per_interval = self.indexes_per_interval();
        let from = (time_ms / interval) as u64 * per_interval;
        let to = ((time_ms + interval) / interval) as u64 * per_interval - 1;
        (from, to)
    }

    /// Start of the interval a nominal index falls in, in epoch
    /// milliseconds.
    pub fn start_time(self, index: u64) -> i64 {
        (index / self.indexes_per_interval()) as i64 * self.interval_ms()
    }

    /// Format the start of a nominal index's interval, GMT, at the
    /// interval's own granularity.
    pub fn format_start(self, index: u64) -> String {
        let start_ms = self.start_time(index);
        let secs = start_ms / 1_000;
        let days = secs / 86_400;
        let second_of_day = secs % 86_400;
        let hour = second_of_day / 3_600;
        let minute = (second_of_day % 3_600) / 60;
        let second = second_of_day % 60;
        let (year, month, day) = days_since_epoch_to_ymd(days);

        match self {
            DateRange::Daily => format!("{year:04}-{month:02}-{day:02}"),
            DateRange::Hourly => format!("{year:04}-{month:02}-{day:02}-{hour:02}-GMT"),
            DateRange::Minutely => {
                format!("{year:04}-{month:02}-{day:02}-{hour:02}-{minute:02}-GMT")
            }
            DateRange::Secondly => {
                format!("{year:04}-{month:02}-{day:02}-{hour:02}-{minute:02}-{second:02}-GMT")
            }
        }
    }
}

/// Convert days since Unix epoch to (year, month, day).
///
/// Uses a simplified algorithm suitable for years 1970-2100.
fn days_since_epoch_to_ymd(mut days: i64) -> (i32, u8, u8) {
    let mut year = 1970;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let days_in_months = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1;
    for &days_in_month in &days_in_months {
        if days < days_in_month as i64 {
            break;
        }
        days -= days_in_month as i64;
        month += 1;
    }

    let day = (days + 1) as u8; // +1 because days are 0-indexed

    (year, month, day)
}

/// Check if a year is a leap year.
fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
