//! Billing calendars.
//!
//! Two independent calendars: storage is charged per ISO week (Monday start),
//! invoiced per fixed 16th-to-15th billing period.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ValueObject};

/// Day of month a billing period starts on.
pub const PERIOD_START_DAY: u32 = 16;
/// Day of month a billing period ends on (inclusive).
pub const PERIOD_END_DAY: u32 = 15;

/// A 16th-to-15th billing period, both ends inclusive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ValueObject for BillingPeriod {}

impl BillingPeriod {
    /// The period `date` falls in.
    pub fn containing(date: NaiveDate) -> DomainResult<Self> {
        let this_month_16 = date
            .with_day(PERIOD_START_DAY)
            .ok_or_else(|| out_of_range(date))?;
        let start = if date.day() >= PERIOD_START_DAY {
            this_month_16
        } else {
            this_month_16
                .checked_sub_months(Months::new(1))
                .ok_or_else(|| out_of_range(date))?
        };
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|d| d.with_day(PERIOD_END_DAY))
            .ok_or_else(|| out_of_range(date))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every ISO week overlapping this period, in order.
    pub fn iso_weeks(&self) -> Vec<IsoWeek> {
        let mut weeks = Vec::new();
        let mut week = IsoWeek::containing(self.start);
        while week.monday <= self.end {
            weeks.push(week);
            match week.next() {
                Some(next) => week = next,
                None => break,
            }
        }
        weeks
    }
}

impl core::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// A Monday-to-Sunday ISO week, identified by its Monday.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IsoWeek {
    pub monday: NaiveDate,
}

impl ValueObject for IsoWeek {}

impl IsoWeek {
    pub fn containing(date: NaiveDate) -> Self {
        let offset = u64::from(date.weekday().num_days_from_monday());
        Self {
            monday: date - Days::new(offset),
        }
    }

    /// Sunday closing the week; used as the billing week-ending date.
    pub fn week_ending(&self) -> NaiveDate {
        self.monday + Days::new(6)
    }

    /// Start of Tuesday: the snapshot cutoff for "end of Monday" counts.
    pub fn monday_cutoff(&self) -> Option<DateTime<Utc>> {
        self.monday
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    pub fn next(&self) -> Option<Self> {
        self.monday
            .checked_add_days(Days::new(7))
            .map(|monday| Self { monday })
    }

    /// ISO `YYYY-Www` label.
    pub fn label(&self) -> String {
        let iso = self.monday.iso_week();
        format!("{}-W{:02}", iso.year(), iso.week())
    }
}

fn out_of_range(date: NaiveDate) -> DomainError {
    DomainError::validation(format!("date {date} is outside the supported calendar"))
}
