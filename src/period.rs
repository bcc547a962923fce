use crate::calc::CalcError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use std::fmt;

pub const ORDINALS_PER_YEAR: u8 = 4;

/// A grading period ("bimester"): a year plus an ordinal in `1..=4`.
///
/// Ordering is chronological: year first, then ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct Period {
    year: i32,
    ordinal: u8,
}

impl Period {
    pub fn new(year: i32, ordinal: u8) -> Option<Self> {
        if (1..=ORDINALS_PER_YEAR).contains(&ordinal) && (1..=9999).contains(&year) {
            Some(Self { year, ordinal })
        } else {
            None
        }
    }

    pub fn first_of(year: i32) -> Self {
        Self {
            year: year.clamp(1, 9999),
            ordinal: 1,
        }
    }

    /// Parses `"{year}-{ordinal}"`, e.g. `"2025-3"`.
    pub fn parse(raw: &str) -> Result<Self, CalcError> {
        let t = raw.trim();
        let bad = || {
            CalcError::new("bad_params", "period must be YYYY-N with N in 1..4")
                .with_details(json!({ "period": raw }))
        };
        let Some((y, o)) = t.split_once('-') else {
            return Err(bad());
        };
        let year = y.parse::<i32>().map_err(|_| bad())?;
        let ordinal = o.parse::<u8>().map_err(|_| bad())?;
        Self::new(year, ordinal).ok_or_else(bad)
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn ordinal(self) -> u8 {
        self.ordinal
    }

    /// The following period, wrapping into the next year; `None` past year 9999.
    pub fn next(self) -> Option<Self> {
        if self.ordinal >= ORDINALS_PER_YEAR {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.ordinal + 1)
        }
    }

    pub fn previous(self) -> Option<Self> {
        if self.ordinal <= 1 {
            Self::new(self.year - 1, ORDINALS_PER_YEAR)
        } else {
            Self::new(self.year, self.ordinal - 1)
        }
    }

    pub fn all_of(year: i32) -> impl Iterator<Item = Period> {
        (1..=ORDINALS_PER_YEAR).filter_map(move |o| Period::new(year, o))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.ordinal)
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}

/// Accepts RFC 3339 plus the plain `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DD` forms SQLite emits.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let t = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPeriod {
    pub period: Period,
    pub closed_at: DateTime<Utc>,
    pub closed_by: Option<String>,
}

/// Half-open `[start, end)` interval in which activity counts toward a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Parses `raw` and tests membership; unparseable timestamps never match.
    pub fn contains_raw(&self, raw: &str) -> bool {
        match parse_timestamp(raw) {
            Some(ts) => self.contains(ts),
            None => {
                tracing::warn!(timestamp = raw, "skipping record with unparseable timestamp");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatus {
    Open,
    Closed,
    Future,
}

/// Current period plus the closing history of one classroom.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodState {
    pub current: Period,
    pub closed: Vec<ClosedPeriod>,
}

impl PeriodState {
    /// Closed records in the order they were closed.
    pub fn closed_chronological(&self) -> Vec<&ClosedPeriod> {
        let mut sorted: Vec<&ClosedPeriod> = self.closed.iter().collect();
        sorted.sort_by(|a, b| a.closed_at.cmp(&b.closed_at));
        sorted
    }

    /// Latest closing record for `period`, if any.
    pub fn closed_entry(&self, period: Period) -> Option<&ClosedPeriod> {
        self.closed_chronological()
            .into_iter()
            .rev()
            .find(|c| c.period == period)
    }

    pub fn is_closed(&self, period: Period) -> bool {
        self.closed.iter().any(|c| c.period == period)
    }

    pub fn status(&self, period: Period) -> PeriodStatus {
        if self.is_closed(period) {
            PeriodStatus::Closed
        } else if period > self.current {
            PeriodStatus::Future
        } else {
            PeriodStatus::Open
        }
    }

    pub fn ensure_not_future(&self, period: Period) -> Result<(), CalcError> {
        if period > self.current {
            return Err(CalcError::new(
                "future_period",
                format!(
                    "period {} is after the current period {}",
                    period, self.current
                ),
            )
            .with_details(json!({
                "period": period,
                "currentPeriod": self.current,
            })));
        }
        Ok(())
    }

    pub fn set_current(&mut self, period: Period) -> Result<(), CalcError> {
        if self.is_closed(period) {
            return Err(CalcError::new(
                "period_closed",
                format!("period {} is closed; reopen it first", period),
            )
            .with_details(json!({ "period": period })));
        }
        self.current = period;
        Ok(())
    }

    pub fn close(
        &mut self,
        period: Period,
        closed_at: DateTime<Utc>,
        closed_by: Option<String>,
    ) -> Result<(), CalcError> {
        if self.is_closed(period) {
            return Err(CalcError::new(
                "period_already_closed",
                format!("period {} is already closed", period),
            )
            .with_details(json!({ "period": period })));
        }
        let advance_to = if period == self.current {
            let next = period.next().ok_or_else(|| {
                CalcError::new("bad_params", format!("period {} has no successor", period))
                    .with_details(json!({ "period": period }))
            })?;
            Some(next)
        } else {
            None
        };
        self.closed.push(ClosedPeriod {
            period,
            closed_at,
            closed_by,
        });
        if let Some(next) = advance_to {
            self.current = next;
        }
        Ok(())
    }

    pub fn reopen(&mut self, period: Period) -> Result<(), CalcError> {
        if !self.is_closed(period) {
            return Err(CalcError::new(
                "period_not_closed",
                format!("period {} is not closed", period),
            )
            .with_details(json!({ "period": period })));
        }
        self.closed.retain(|c| c.period != period);
        Ok(())
    }

    /// Resolves the activity window of `period`.
    ///
    /// The window ends when the period was closed (or `now` while it is still open) and
    /// starts when the preceding period was closed (or at `created_at`). Consecutive
    /// closed periods therefore share their boundary.
    pub fn window(
        &self,
        period: Period,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PeriodWindow {
        let end = self
            .closed_entry(period)
            .map(|c| c.closed_at)
            .unwrap_or(now);
        let start = period
            .previous()
            .and_then(|prev| self.closed_entry(prev))
            .map(|c| c.closed_at)
            .unwrap_or(created_at);
        // A preceding period closed after this one (reopen + re-close) yields an empty window.
        PeriodWindow {
            start: start.min(end),
            end,
        }
    }
}
