//! Exchange Calendar
//!
//! Trading hours per exchange, consumed by source selection (tradable
//! days), fill-forward (which empty slots need a bar) and the filter stage
//! (which points fall inside exchange hours).
//!
//! All sessions are defined in exchange-local time using `chrono_tz`.
//! Sessions whose close is not after their open run past midnight into the
//! next local day; a session from `00:00` to `00:00` covers the whole day.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use qrawler_feed::domain::calendar::ExchangeHours;
//!
//! let hours = ExchangeHours::us_equity();
//! // 15:00 UTC on a Tuesday is 10:00 in New York
//! let t = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
//! assert!(hours.is_open(t, false));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{
    DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta,
    TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// =============================================================================
// Time Zone Offsets
// =============================================================================

/// Converts between UTC and a data time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeZoneOffsetProvider {
    timezone: Tz,
}

impl TimeZoneOffsetProvider {
    /// Create a provider for `timezone`.
    #[must_use]
    pub const fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// The data time zone.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Anchor a zone-naive local time to an instant.
    ///
    /// Ambiguous times (clocks turned back) resolve to the earlier instant.
    /// Times inside a spring-forward gap use the offset in force before the
    /// gap, which lands them the gap's length later on the wall clock.
    #[must_use]
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self.timezone.from_local_datetime(&local) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
            LocalResult::None => {
                let before = self
                    .timezone
                    .offset_from_utc_datetime(&(local - TimeDelta::days(1)))
                    .fix();
                (local - TimeDelta::seconds(i64::from(before.local_minus_utc()))).and_utc()
            }
        }
    }

    /// Local wall-clock time of an instant.
    #[must_use]
    pub fn to_local(&self, utc: DateTime<Utc>) -> NaiveDateTime {
        utc.with_timezone(&self.timezone).naive_local()
    }

    /// Offset from UTC in seconds at `utc`.
    #[must_use]
    pub fn offset_seconds(&self, utc: DateTime<Utc>) -> i32 {
        self.timezone
            .offset_from_utc_datetime(&utc.naive_utc())
            .fix()
            .local_minus_utc()
    }
}

/// Serde adapter storing a `Tz` as its IANA name.
pub mod tz_serde {
    use std::str::FromStr;

    use chrono_tz::Tz;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as the IANA name.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    /// Parse an IANA name.
    ///
    /// # Errors
    ///
    /// Fails for unknown zone names.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Tz::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Session category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Regular trading hours.
    Regular,
    /// Pre-market extended hours.
    PreMarket,
    /// After-hours extended session.
    AfterHours,
}

impl SessionKind {
    const fn is_extended(self) -> bool {
        matches!(self, Self::PreMarket | Self::AfterHours)
    }
}

/// One recurring trading window in exchange-local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingSession {
    /// Category.
    pub kind: SessionKind,
    /// Local open time.
    pub open: NaiveTime,
    /// Local close time; at or before `open` means the next day.
    pub close: NaiveTime,
    /// Weekdays on which the session opens.
    pub days: Vec<Weekday>,
}

impl TradingSession {
    /// Create a session.
    #[must_use]
    pub const fn new(
        kind: SessionKind,
        open: NaiveTime,
        close: NaiveTime,
        days: Vec<Weekday>,
    ) -> Self {
        Self {
            kind,
            open,
            close,
            days,
        }
    }

    /// Monday through Friday.
    #[must_use]
    pub fn weekdays() -> Vec<Weekday> {
        vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ]
    }

    /// Local open/close of the session opening on `date`.
    fn local_window(&self, date: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
        if !self.days.contains(&date.weekday()) {
            return None;
        }
        let open = date.and_time(self.open);
        let close_date = if self.close <= self.open {
            date.succ_opt()?
        } else {
            date
        };
        Some((open, close_date.and_time(self.close)))
    }
}

/// Holiday calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCalendar {
    holidays: HashMap<NaiveDate, String>,
}

impl MarketCalendar {
    /// Add a full-day closure.
    pub fn add_holiday(&mut self, date: NaiveDate, description: impl Into<String>) {
        self.holidays.insert(date, description.into());
    }

    /// Whether `date` is a holiday.
    #[must_use]
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains_key(&date)
    }
}

// =============================================================================
// Exchange Hours
// =============================================================================

/// Trading hours of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeHours {
    /// Exchange time zone.
    #[serde(with = "tz_serde")]
    pub timezone: Tz,
    /// Regular and extended sessions.
    #[serde(default)]
    pub sessions: Vec<TradingSession>,
    /// Holidays.
    #[serde(default)]
    pub calendar: MarketCalendar,
}

impl ExchangeHours {
    /// Hours with no sessions in `timezone`.
    #[must_use]
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            sessions: Vec::new(),
            calendar: MarketCalendar::default(),
        }
    }

    /// Round-the-clock trading, every day.
    #[must_use]
    pub fn always_open() -> Self {
        let midnight = NaiveTime::MIN;
        let all_days = vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        Self::new(chrono_tz::UTC).with_session(TradingSession::new(
            SessionKind::Regular,
            midnight,
            midnight,
            all_days,
        ))
    }

    /// US equity hours: 09:30-16:00 regular, 04:00-09:30 pre-market and
    /// 16:00-20:00 after-hours, New York time, weekdays.
    #[must_use]
    pub fn us_equity() -> Self {
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self::new(chrono_tz::America::New_York)
            .with_session(TradingSession::new(
                SessionKind::PreMarket,
                hm(4, 0),
                hm(9, 30),
                TradingSession::weekdays(),
            ))
            .with_session(TradingSession::new(
                SessionKind::Regular,
                hm(9, 30),
                hm(16, 0),
                TradingSession::weekdays(),
            ))
            .with_session(TradingSession::new(
                SessionKind::AfterHours,
                hm(16, 0),
                hm(20, 0),
                TradingSession::weekdays(),
            ))
    }

    /// Add a session.
    #[must_use]
    pub fn with_session(mut self, session: TradingSession) -> Self {
        self.sessions.push(session);
        self
    }

    /// Add a holiday.
    #[must_use]
    pub fn with_holiday(mut self, date: NaiveDate, description: impl Into<String>) -> Self {
        self.calendar.add_holiday(date, description);
        self
    }

    fn offsets(&self) -> TimeZoneOffsetProvider {
        TimeZoneOffsetProvider::new(self.timezone)
    }

    /// UTC windows of sessions opening on local `date`.
    fn windows_on(
        &self,
        date: NaiveDate,
        extended: bool,
    ) -> impl Iterator<Item = (DateTime<Utc>, DateTime<Utc>)> + '_ {
        let offsets = self.offsets();
        let holiday = self.calendar.is_holiday(date);
        self.sessions
            .iter()
            .filter(move |s| !holiday && (extended || !s.kind.is_extended()))
            .filter_map(move |s| s.local_window(date))
            .map(move |(open, close)| (offsets.to_utc(open), offsets.to_utc(close)))
    }

    /// Whether the exchange is trading at `utc`.
    #[must_use]
    pub fn is_open(&self, utc: DateTime<Utc>, extended: bool) -> bool {
        let local_date = self.offsets().to_local(utc).date();
        // sessions opening the previous day may run past midnight
        [local_date.pred_opt(), Some(local_date)]
            .into_iter()
            .flatten()
            .any(|date| {
                self.windows_on(date, extended)
                    .any(|(open, close)| open <= utc && utc < close)
            })
    }

    /// Whether any session overlaps `[start, end)`.
    #[must_use]
    pub fn is_open_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        extended: bool,
    ) -> bool {
        if start >= end {
            return self.is_open(start, extended);
        }
        let offsets = self.offsets();
        let first = offsets.to_local(start).date().pred_opt();
        let last = offsets.to_local(end).date();
        let Some(mut date) = first else {
            return false;
        };
        while date <= last {
            if self
                .windows_on(date, extended)
                .any(|(open, close)| open < end && start < close)
            {
                return true;
            }
            let Some(next) = date.succ_opt() else {
                break;
            };
            date = next;
        }
        false
    }

    /// Whether local `date` holds at least one session.
    #[must_use]
    pub fn is_tradable_date(&self, date: NaiveDate, extended: bool) -> bool {
        self.windows_on(date, extended).next().is_some()
    }

    /// Whether `[start, end]` touches at least one tradable local date.
    ///
    /// An `end` at local midnight after `start` does not reach into the day
    /// it opens.
    #[must_use]
    pub fn has_tradable_day(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        extended: bool,
    ) -> bool {
        let offsets = self.offsets();
        let mut date = offsets.to_local(start).date();
        let end_local = offsets.to_local(end);
        let mut last = end_local.date();
        if end > start && end_local.time() == NaiveTime::MIN {
            last = last.pred_opt().unwrap_or(last);
        }
        while date <= last {
            if self.is_tradable_date(date, extended) {
                return true;
            }
            let Some(next) = date.succ_opt() else {
                break;
            };
            date = next;
        }
        false
    }
}

impl Default for ExchangeHours {
    fn default() -> Self {
        Self::always_open()
    }
}

// =============================================================================
// Market Hours Database
// =============================================================================

/// Named hour presets usable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoursPreset {
    /// [`ExchangeHours::us_equity`].
    UsEquity,
    /// [`ExchangeHours::always_open`].
    AlwaysOpen,
}

impl HoursPreset {
    /// Materialize the preset.
    #[must_use]
    pub fn hours(self) -> ExchangeHours {
        match self {
            Self::UsEquity => ExchangeHours::us_equity(),
            Self::AlwaysOpen => ExchangeHours::always_open(),
        }
    }
}

/// Exchange qualifier to trading hours lookup.
#[derive(Debug, Clone, Default)]
pub struct MarketHoursDatabase {
    entries: HashMap<String, Arc<ExchangeHours>>,
    fallback: Arc<ExchangeHours>,
}

impl MarketHoursDatabase {
    /// Empty database falling back to round-the-clock hours.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hours for an exchange.
    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>, hours: ExchangeHours) -> Self {
        self.entries.insert(exchange.into(), Arc::new(hours));
        self
    }

    /// Hours for `exchange`, or the fallback when unknown.
    #[must_use]
    pub fn hours(&self, exchange: &str) -> Arc<ExchangeHours> {
        self.entries
            .get(exchange)
            .map_or_else(|| Arc::clone(&self.fallback), Arc::clone)
    }
}
