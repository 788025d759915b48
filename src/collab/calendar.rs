use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};
use sqlx::MySqlPool;

/// Answers whether leave taken on a date consumes a day.
pub trait WorkingDayOracle: Send + Sync {
    fn is_working_day(&self, date: NaiveDate) -> bool;
}

/// Saturday/Sunday weekends plus an explicit holiday list.
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub async fn load(pool: &MySqlPool) -> Result<Self, sqlx::Error> {
        let dates = sqlx::query_scalar::<_, NaiveDate>("SELECT date FROM holidays ORDER BY date")
            .fetch_all(pool)
            .await?;

        tracing::info!(count = dates.len(), "Holiday calendar loaded");
        Ok(Self::new(dates))
    }

    pub fn len(&self) -> usize {
        self.holidays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holidays.is_empty()
    }
}

impl WorkingDayOracle for HolidayCalendar {
    fn is_working_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn weekends_and_holidays_are_not_working_days() {
        let calendar = HolidayCalendar::new([date(2026, 3, 4)]);

        assert!(calendar.is_working_day(date(2026, 3, 2)));
        assert!(!calendar.is_working_day(date(2026, 3, 4)));
        assert!(!calendar.is_working_day(date(2026, 3, 7)));
        assert!(!calendar.is_working_day(date(2026, 3, 8)));
        assert_eq!(calendar.len(), 1);
    }
}
