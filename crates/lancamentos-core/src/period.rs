use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use thiserror::Error;

use crate::warehouse::TimeRow;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid period '{value}': {reason}")]
pub struct PeriodError {
    pub value: String,
    pub reason: String,
}

impl PeriodError {
    fn new(value: &str, reason: impl Into<String>) -> Self {
        Self {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// A calendar month written as `MM/YYYY` (or `M/YYYY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(&self) -> Period {
        if self.month == 12 {
            Period {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Period {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// ISO week number of the first day of the month.
    pub fn iso_week(&self) -> u32 {
        self.first_day().iso_week().week()
    }

    pub fn start(&self) -> NaiveDateTime {
        self.first_day().and_time(NaiveTime::MIN)
    }

    /// Last representable instant of the month at microsecond precision.
    pub fn end(&self) -> NaiveDateTime {
        self.next().start() - Duration::microseconds(1)
    }

    pub fn time_row(&self) -> TimeRow {
        TimeRow {
            year: self.year,
            month: self.month,
            week: self.iso_week(),
            period_start: self.start(),
            period_end: self.end(),
        }
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (month, year) = trimmed
            .split_once('/')
            .ok_or_else(|| PeriodError::new(value, "expected month/year"))?;

        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(month) || month.len() > 2 {
            return Err(PeriodError::new(value, "month must be one or two digits"));
        }
        if !all_digits(year) || year.len() != 4 {
            return Err(PeriodError::new(value, "year must be four digits"));
        }

        let month: u32 = month
            .parse()
            .map_err(|_| PeriodError::new(value, "month is not a number"))?;
        let year: i32 = year
            .parse()
            .map_err(|_| PeriodError::new(value, "year is not a number"))?;

        Period::new(year, month)
            .ok_or_else(|| PeriodError::new(value, format!("month {month} is out of range")))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:04}", self.month, self.year)
    }
}
