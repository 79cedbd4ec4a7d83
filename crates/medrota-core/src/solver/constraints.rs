//! Incremental hard-constraint checks used during search.
//!
//! The engine keeps one [`PersonLedger`] per person and asks it whether a
//! prospective placement would violate double-booking, the 1-in-7 rule, or
//! the rolling 80-hour average before committing a branch.

use crate::domain::HalfDay;
use crate::solver::types::{
    HOURS_PER_HALF_DAY, MAX_CONSECUTIVE_DUTY_DAYS, MAX_WEEKLY_HOURS, ROLLING_WINDOW_WEEKS,
};
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashSet};

/// Mutable duty record for one person during search.
#[derive(Debug, Default, Clone)]
pub struct PersonLedger {
    /// Occupied half-days; double-booking check.
    occupied: HashSet<(NaiveDate, HalfDay)>,
    /// Half-day assignment count per date.
    halves_by_date: BTreeMap<NaiveDate, u32>,
}

impl PersonLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_free(&self, date: NaiveDate, half_day: HalfDay) -> bool {
        !self.occupied.contains(&(date, half_day))
    }

    /// Total assigned hours in the ledger.
    pub fn total_hours(&self) -> f64 {
        self.halves_by_date.values().map(|&c| c as f64).sum::<f64>() * HOURS_PER_HALF_DAY
    }

    pub fn assign(&mut self, date: NaiveDate, half_day: HalfDay) {
        self.occupied.insert((date, half_day));
        *self.halves_by_date.entry(date).or_insert(0) += 1;
    }

    pub fn unassign(&mut self, date: NaiveDate, half_day: HalfDay) {
        self.occupied.remove(&(date, half_day));
        if let Some(count) = self.halves_by_date.get_mut(&date) {
            *count -= 1;
            if *count == 0 {
                self.halves_by_date.remove(&date);
            }
        }
    }

    /// Would adding a half-day on `date` break the 1-in-7 rule?
    ///
    /// Computes the consecutive duty run that would contain `date`; a run
    /// longer than six days means no day off inside a 7-day stretch.
    pub fn would_violate_one_in_seven(&self, date: NaiveDate) -> bool {
        if self.halves_by_date.contains_key(&date) {
            // Already a duty day; run length is unchanged.
            return false;
        }
        let mut run = 1i64;
        let mut cursor = date - Duration::days(1);
        while self.halves_by_date.contains_key(&cursor) {
            run += 1;
            cursor -= Duration::days(1);
        }
        let mut cursor = date + Duration::days(1);
        while self.halves_by_date.contains_key(&cursor) {
            run += 1;
            cursor += Duration::days(1);
        }
        run > MAX_CONSECUTIVE_DUTY_DAYS
    }

    /// Would adding a half-day on `date` push any rolling 28-day window
    /// over the 80-hour weekly average?
    pub fn would_violate_eighty_hour(&self, date: NaiveDate) -> bool {
        let window_days = ROLLING_WINDOW_WEEKS * 7;
        let max_window_hours = MAX_WEEKLY_HOURS * ROLLING_WINDOW_WEEKS as f64;

        // Only windows containing `date` can change.
        let earliest_start = date - Duration::days(window_days - 1);
        let mut starts: Vec<NaiveDate> = self
            .halves_by_date
            .range(earliest_start..=date)
            .map(|(&d, _)| d)
            .collect();
        starts.push(date);

        for start in starts {
            let end = start + Duration::days(window_days - 1);
            let mut halves: u32 = self
                .halves_by_date
                .range(start..=end)
                .map(|(_, &c)| c)
                .sum();
            if start <= date && date <= end {
                halves += 1;
            }
            if halves as f64 * HOURS_PER_HALF_DAY > max_window_hours {
                return true;
            }
        }
        false
    }

    /// Combined placement check used by the engine.
    pub fn can_take(&self, date: NaiveDate, half_day: HalfDay) -> bool {
        self.is_free(date, half_day)
            && !self.would_violate_one_in_seven(date)
            && !self.would_violate_eighty_hour(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_double_booking_detected() {
        let mut ledger = PersonLedger::new();
        ledger.assign(day(3), HalfDay::Am);
        assert!(!ledger.is_free(day(3), HalfDay::Am));
        assert!(ledger.is_free(day(3), HalfDay::Pm));
    }

    #[test]
    fn test_unassign_restores_freedom() {
        let mut ledger = PersonLedger::new();
        ledger.assign(day(3), HalfDay::Am);
        ledger.unassign(day(3), HalfDay::Am);
        assert!(ledger.is_free(day(3), HalfDay::Am));
        assert_eq!(ledger.total_hours(), 0.0);
    }

    #[test]
    fn test_seventh_consecutive_day_violates_one_in_seven() {
        let mut ledger = PersonLedger::new();
        for d in 1..=6 {
            ledger.assign(day(d), HalfDay::Am);
        }
        assert!(!ledger.would_violate_one_in_seven(day(8)));
        assert!(ledger.would_violate_one_in_seven(day(7)));
    }

    #[test]
    fn test_run_joined_from_both_sides_counts() {
        let mut ledger = PersonLedger::new();
        for d in 1..=3 {
            ledger.assign(day(d), HalfDay::Am);
        }
        for d in 5..=7 {
            ledger.assign(day(d), HalfDay::Am);
        }
        // Day 4 bridges two 3-day runs into 7 consecutive days.
        assert!(ledger.would_violate_one_in_seven(day(4)));
    }

    #[test]
    fn test_existing_duty_day_never_extends_run() {
        let mut ledger = PersonLedger::new();
        for d in 1..=6 {
            ledger.assign(day(d), HalfDay::Am);
        }
        // A second half-day on an existing duty day is fine for 1-in-7.
        assert!(!ledger.would_violate_one_in_seven(day(3)));
    }

    #[test]
    fn test_eighty_hour_window_check() {
        let mut ledger = PersonLedger::new();
        // 52 half-days inside one 28-day window: 312 hours. One more is
        // 318, still under the 320-hour (80 x 4) ceiling; the next breaks
        // it.
        let start = day(1);
        let mut remaining = 52;
        'outer: for offset in 0..28 {
            for half in [HalfDay::Am, HalfDay::Pm] {
                if remaining == 0 {
                    break 'outer;
                }
                ledger.assign(start + Duration::days(offset), half);
                remaining -= 1;
            }
        }
        assert_eq!(ledger.total_hours(), 312.0);
        assert!(!ledger.would_violate_eighty_hour(day(28)));
        ledger.assign(day(28), HalfDay::Am);
        assert!(ledger.would_violate_eighty_hour(day(28)));
    }
}
