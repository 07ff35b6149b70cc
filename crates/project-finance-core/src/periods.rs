use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::Rate;

/// Time-bucket granularity for cash-flow series.
///
/// `Fiscal` behaves like `Yearly` but starts its buckets at an arbitrary
/// month (e.g. 7 for a July–June fiscal year).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    Monthly,
    Quarterly,
    Yearly,
    Fiscal { start_month: u32 },
}

impl Granularity {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            Granularity::Monthly => 12,
            Granularity::Quarterly => 4,
            Granularity::Yearly | Granularity::Fiscal { .. } => 1,
        }
    }

    /// True if flows at `self` can be summed into buckets of `target`
    /// without splitting a source bucket (i.e. target is the same size or
    /// coarser).
    pub fn aggregates_to(&self, target: Granularity) -> bool {
        target.periods_per_year() <= self.periods_per_year()
    }
}

/// Stable period key: the first day of the bucket. Identical keys across
/// assets and components mean "the same period" for alignment and hybrid
/// combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodKey(pub NaiveDate);

impl PeriodKey {
    /// Map an arbitrary date into its bucket start under `granularity`.
    pub fn bucket(date: NaiveDate, granularity: Granularity) -> PeriodKey {
        let key = match granularity {
            Granularity::Monthly => first_of_month(date.year(), date.month()),
            Granularity::Quarterly => {
                let quarter_start = ((date.month() - 1) / 3) * 3 + 1;
                first_of_month(date.year(), quarter_start)
            }
            Granularity::Yearly => first_of_month(date.year(), 1),
            Granularity::Fiscal { start_month } => {
                let start_month = start_month.clamp(1, 12);
                if date.month() >= start_month {
                    first_of_month(date.year(), start_month)
                } else {
                    first_of_month(date.year() - 1, start_month)
                }
            }
        };
        PeriodKey(key)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Re-bucket this key into a coarser granularity.
    pub fn coarsen(&self, target: Granularity) -> PeriodKey {
        PeriodKey::bucket(self.0, target)
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // month is always in 1..=12 here
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// Periodic interest rate for an annual rate at the given granularity
/// (simple division, matching standard debt-schedule convention).
pub fn periodic_rate(annual_rate: Rate, granularity: Granularity) -> Rate {
    annual_rate / Decimal::from(granularity.periods_per_year())
}

/// Year fraction between two dates on a 365.25-day basis, as used for
/// discounting irregularly spaced cash flows.
pub fn year_fraction(from: NaiveDate, to: NaiveDate) -> Decimal {
    let days = (to - from).num_days();
    Decimal::from(days) / dec!(365.25)
}
