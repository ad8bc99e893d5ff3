use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::{LocalSlot, Ms, SessionTime, Span};

/// Converts between canonical UTC instants and tenant-local wall-clock time.
///
/// Every weekday and local-date decision in the engine goes through here, so
/// a session's day-of-week is always derived from its instant in the tenant zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeNormalizer {
    zone: Tz,
}

impl TimeNormalizer {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn utc() -> Self {
        Self { zone: Tz::UTC }
    }

    /// Parse an IANA zone name such as `America/New_York`.
    pub fn parse_zone(name: &str) -> Result<Tz, EngineError> {
        name.parse::<Tz>()
            .map_err(|_| EngineError::Validation(format!("unknown time zone: {name}")))
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// Parse an RFC 3339 timestamp. A zone designator (`Z` or an offset) is required.
    pub fn parse_instant(&self, s: &str) -> Result<Ms, EngineError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| EngineError::InvalidTimestamp(format!("{s}: {e}")))
    }

    pub fn format_instant(&self, ms: Ms) -> Result<String, EngineError> {
        Ok(utc_datetime(ms)?.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    fn local(&self, ms: Ms) -> Result<DateTime<Tz>, EngineError> {
        Ok(utc_datetime(ms)?.with_timezone(&self.zone))
    }

    pub fn local_date(&self, ms: Ms) -> Result<NaiveDate, EngineError> {
        Ok(self.local(ms)?.date_naive())
    }

    pub fn local_time(&self, ms: Ms) -> Result<NaiveTime, EngineError> {
        Ok(self.local(ms)?.time())
    }

    pub fn weekday(&self, ms: Ms) -> Result<Weekday, EngineError> {
        Ok(self.local(ms)?.weekday())
    }

    /// Local wall clock to instant. Times skipped by a DST jump are rejected;
    /// repeated times resolve to the earlier instant.
    pub fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> Result<Ms, EngineError> {
        self.zone
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.timestamp_millis())
            .ok_or_else(|| {
                EngineError::InvalidTimestamp(format!(
                    "{date} {time} does not exist in {}",
                    self.zone.name()
                ))
            })
    }

    pub fn span_for(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Result<Span, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!(
                "start {start} must be before end {end}"
            )));
        }
        let start_ms = self.to_utc(date, start)?;
        let end_ms = self.to_utc(date, end)?;
        if start_ms >= end_ms {
            return Err(EngineError::InvalidTimestamp(format!(
                "{date} {start}-{end} is empty in {}",
                self.zone.name()
            )));
        }
        Ok(Span::new(start_ms, end_ms))
    }

    /// The instants covering one local calendar day.
    pub fn day_span(&self, date: NaiveDate) -> Result<Span, EngineError> {
        let start = self.start_of_day(date)?;
        let next = date
            .succ_opt()
            .ok_or_else(|| EngineError::InvalidTimestamp(format!("no day after {date}")))?;
        let end = self.start_of_day(next)?;
        Ok(Span::new(start, end))
    }

    // A few zones skip local midnight on DST day; the day then starts at the first valid hour.
    fn start_of_day(&self, date: NaiveDate) -> Result<Ms, EngineError> {
        (0..3)
            .filter_map(|h| NaiveTime::from_hms_opt(h, 0, 0))
            .find_map(|t| self.to_utc(date, t).ok())
            .ok_or_else(|| EngineError::InvalidTimestamp(format!("{date} has no start in {}", self.zone.name())))
    }

    /// Build the value object for a session. Start and end must share a local date.
    pub fn session_time(&self, span: Span) -> Result<SessionTime, EngineError> {
        if span.start >= span.end {
            return Err(EngineError::Validation("session start must be before end".into()));
        }
        let start = self.local(span.start)?;
        let end = self.local(span.end)?;
        if start.date_naive() != end.date_naive() {
            return Err(EngineError::Validation(format!(
                "session crosses local midnight ({} to {})",
                start.date_naive(),
                end.date_naive()
            )));
        }
        Ok(SessionTime::derived(
            span,
            LocalSlot {
                date: start.date_naive(),
                weekday: start.weekday(),
                start: start.time(),
                end: end.time(),
            },
        ))
    }
}

fn utc_datetime(ms: Ms) -> Result<DateTime<Utc>, EngineError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| EngineError::InvalidTimestamp(format!("{ms} is out of range")))
}

/// Minutes since local midnight.
pub fn minutes_of_day(t: NaiveTime) -> u32 {
    t.num_seconds_from_midnight() / 60
}

/// Inverse of [`minutes_of_day`]. `None` past the end of the day.
pub fn time_from_minutes(minutes: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
}
