//! Local calendar and time source
//!
//! Every row in the store is keyed by a calendar day in the device's
//! local timezone. [`LocalCalendar`] owns that mapping and [`Clock`]
//! abstracts "now" so day-window logic can be driven from tests.
//!
//! Offsets are resolved per instant, so a day that contains a DST
//! transition is 23 or 25 hours long and days on either side of it keep
//! their own midnight.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Days, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime,
    NaiveTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Format of a serialized day key
const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Largest day window a caller may ask for (ten years)
pub const MAX_WINDOW_DAYS: u32 = 3660;

/// Step used to walk past a local midnight skipped by a transition
const GAP_STEP_MINUTES: i64 = 15;

/// Canonical calendar-day identifier (`YYYY-MM-DD`, device-local)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey(NaiveDate);

impl DayKey {
    /// Wrap a calendar date
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Build from year/month/day
    pub fn from_ymd(year: i32, month: u32, day: u32) -> CoreResult<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidDayKey(format!("{year:04}-{month:02}-{day:02}")))
    }

    /// The underlying date
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The previous calendar day
    pub fn pred(&self) -> Self {
        self.offset_days(-1)
    }

    /// The next calendar day
    pub fn succ(&self) -> Self {
        self.offset_days(1)
    }

    /// Shift by a signed number of days, `None` outside the supported range
    pub fn checked_offset_days(&self, days: i64) -> Option<Self> {
        let magnitude = Days::new(days.unsigned_abs());
        let shifted = if days < 0 {
            self.0.checked_sub_days(magnitude)
        } else {
            self.0.checked_add_days(magnitude)
        };
        shifted.map(Self)
    }

    /// Shift by a signed number of days, saturating at the supported range
    pub fn offset_days(&self, days: i64) -> Self {
        self.checked_offset_days(days).unwrap_or(if days < 0 {
            Self(NaiveDate::MIN)
        } else {
            Self(NaiveDate::MAX)
        })
    }

    /// Whole days from `self` to `other` (negative when `other` is earlier)
    pub fn days_until(&self, other: &DayKey) -> i64 {
        (other.0 - self.0).num_days()
    }

    /// Key string used as the storage primary key
    pub fn as_key(&self) -> String {
        self.0.format(DAY_KEY_FORMAT).to_string()
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl FromStr for DayKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, DAY_KEY_FORMAT)
            .map(Self)
            .map_err(|_| CoreError::InvalidDayKey(s.to_string()))
    }
}

/// Where a calendar takes its offsets from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    /// The device timezone, looked up on every conversion
    System,
    /// An IANA timezone
    Named(Tz),
    /// One offset for every date
    Fixed(FixedOffset),
}

/// Maps instants onto device-local calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCalendar {
    zone: Zone,
}

impl LocalCalendar {
    /// Calendar following the device timezone, DST included
    pub fn system() -> Self {
        Self { zone: Zone::System }
    }

    /// Calendar for an IANA timezone name such as `Europe/Berlin`
    pub fn named(name: &str) -> CoreResult<Self> {
        let tz: Tz = name
            .parse()
            .map_err(|_| CoreError::InvalidTimezone(name.to_string()))?;
        Ok(Self {
            zone: Zone::Named(tz),
        })
    }

    /// Calendar with an explicit offset in minutes east of UTC
    pub fn with_offset_minutes(minutes: i32) -> CoreResult<Self> {
        let offset =
            FixedOffset::east_opt(minutes * 60).ok_or(CoreError::InvalidOffset(minutes))?;
        Ok(Self {
            zone: Zone::Fixed(offset),
        })
    }

    /// UTC calendar
    pub fn utc() -> Self {
        Self {
            zone: Zone::Fixed(Utc.fix()),
        }
    }

    /// Offset east of UTC in effect at `instant`
    pub fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        match self.zone {
            Zone::System => instant.with_timezone(&Local).offset().fix(),
            Zone::Named(tz) => instant.with_timezone(&tz).offset().fix(),
            Zone::Fixed(offset) => offset,
        }
    }

    /// The local day containing `instant`
    pub fn day_key(&self, instant: DateTime<Utc>) -> DayKey {
        DayKey(instant.with_timezone(&self.offset_at(instant)).date_naive())
    }

    /// Local midnight at the start of `day`
    ///
    /// When a transition skips midnight the day starts at the first local
    /// time that exists; when midnight repeats, at its first occurrence.
    pub fn day_start(&self, day: DayKey) -> DateTime<Utc> {
        let midnight = day.0.and_time(NaiveTime::MIN);
        match self.zone {
            Zone::System => first_instant(&Local, midnight),
            Zone::Named(tz) => first_instant(&tz, midnight),
            Zone::Fixed(offset) => first_instant(&offset, midnight),
        }
    }

    /// Local midnight at the end of `day` (exclusive)
    pub fn day_end(&self, day: DayKey) -> DateTime<Utc> {
        self.day_start(day.succ())
    }

    /// Length of `day` in minutes
    pub fn day_minutes(&self, day: DayKey) -> i64 {
        (self.day_end(day) - self.day_start(day)).num_minutes()
    }

    /// The `count` consecutive days ending at `last` (inclusive), oldest first
    pub fn window_ending(&self, last: DayKey, count: u32) -> CoreResult<Vec<DayKey>> {
        if count > MAX_WINDOW_DAYS {
            return Err(CoreError::WindowTooLarge {
                requested: count,
                max: MAX_WINDOW_DAYS,
            });
        }
        (0..i64::from(count))
            .rev()
            .map(|back| {
                last.checked_offset_days(-back)
                    .ok_or_else(|| CoreError::InvalidDayKey(format!("{last} - {back} days")))
            })
            .collect()
    }
}

/// Earliest instant at or after the local time `naive` in `zone`
fn first_instant<Z: TimeZone>(zone: &Z, naive: NaiveDateTime) -> DateTime<Utc> {
    let mut local = naive;
    // A skipped stretch never exceeds one day
    for _ in 0..=(24 * 60 / GAP_STEP_MINUTES) {
        match zone.from_local_datetime(&local) {
            LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => {
                return at.with_timezone(&Utc);
            }
            LocalResult::None => local += Duration::minutes(GAP_STEP_MINUTES),
        }
    }
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

impl Default for LocalCalendar {
    fn default() -> Self {
        Self::system()
    }
}

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Real clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at a fixed instant
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Move forward by whole minutes
    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
