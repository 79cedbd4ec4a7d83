//! Admission strategies and adaptive load shedding.

use serde::{Deserialize, Serialize};

/// Request priority, assigned by endpoint class. Order matters: later
/// variants outrank earlier ones in the wait queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Background,
    Low,
    Normal,
    High,
    Critical,
}

/// Endpoint class to priority mapping.
pub fn priority_for_endpoint(endpoint: &str) -> Priority {
    let class = endpoint.split('.').next().unwrap_or(endpoint);
    match class {
        "health" | "auth" => Priority::Critical,
        "schedule" | "conflicts" => Priority::High,
        "docs" => Priority::Low,
        "reports" | "export" | "analytics" => Priority::Background,
        _ => Priority::Normal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Allow under the limit, otherwise reject.
    Simple,
    /// Allow under the limit, queue up to capacity, otherwise reject.
    Queued,
    /// Queued, but bypass-reject low priorities while critical or high
    /// requests are waiting.
    Priority,
    /// Queued with watermark-driven shedding of low priorities under load.
    Adaptive,
}

/// Which priorities are currently being shed by the adaptive strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shedding {
    #[default]
    None,
    /// Background and Low rejected.
    LowAndBackground,
    /// Normal, Low, and Background rejected.
    NormalAndBelow,
}

impl Shedding {
    pub fn sheds(&self, priority: Priority) -> bool {
        match self {
            Shedding::None => false,
            Shedding::LowAndBackground => priority <= Priority::Low,
            Shedding::NormalAndBelow => priority <= Priority::Normal,
        }
    }
}

/// Consecutive-sample load tracker with hysteresis.
///
/// Shedding engages only after `samples_required` consecutive samples above
/// a watermark, and disengages only once utilization falls under the
/// (lower) recovery watermark, so the strategy cannot oscillate at the
/// boundary.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    pub shed_watermark: f64,
    pub pressure_watermark: f64,
    pub recover_watermark: f64,
    pub samples_required: u32,
    high_streak: u32,
    pressure_streak: u32,
    shedding: Shedding,
}

impl LoadTracker {
    pub fn new(
        shed_watermark: f64,
        pressure_watermark: f64,
        recover_watermark: f64,
        samples_required: u32,
    ) -> Self {
        Self {
            shed_watermark,
            pressure_watermark,
            recover_watermark,
            samples_required,
            high_streak: 0,
            pressure_streak: 0,
            shedding: Shedding::None,
        }
    }

    pub fn shedding(&self) -> Shedding {
        self.shedding
    }

    /// Record one utilization sample and return the resulting shed level.
    pub fn record(&mut self, utilization: f64) -> Shedding {
        if utilization < self.recover_watermark {
            self.high_streak = 0;
            self.pressure_streak = 0;
            self.shedding = Shedding::None;
            return self.shedding;
        }

        if utilization >= self.shed_watermark {
            self.high_streak += 1;
        } else {
            self.high_streak = 0;
        }
        if utilization >= self.pressure_watermark {
            self.pressure_streak += 1;
        } else {
            self.pressure_streak = 0;
        }

        if self.pressure_streak >= self.samples_required {
            self.shedding = Shedding::NormalAndBelow;
        } else if self.high_streak >= self.samples_required {
            self.shedding = self.shedding.max_level(Shedding::LowAndBackground);
        }
        // Between the recovery and shed watermarks the current level holds.
        self.shedding
    }
}

impl Shedding {
    fn max_level(self, other: Shedding) -> Shedding {
        use Shedding::*;
        match (self, other) {
            (NormalAndBelow, _) | (_, NormalAndBelow) => NormalAndBelow,
            (LowAndBackground, _) | (_, LowAndBackground) => LowAndBackground,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::Low > Priority::Background);
    }

    #[test]
    fn test_endpoint_classes() {
        assert_eq!(priority_for_endpoint("auth.login"), Priority::Critical);
        assert_eq!(priority_for_endpoint("schedule.generate"), Priority::High);
        assert_eq!(priority_for_endpoint("reports.monthly"), Priority::Background);
        assert_eq!(priority_for_endpoint("people.list"), Priority::Normal);
    }

    #[test]
    fn test_shedding_needs_consecutive_samples() {
        let mut tracker = LoadTracker::new(0.8, 0.9, 0.6, 3);
        assert_eq!(tracker.record(1.0), Shedding::None);
        assert_eq!(tracker.record(1.0), Shedding::None);
        assert_eq!(tracker.record(1.0), Shedding::NormalAndBelow);
    }

    #[test]
    fn test_pressure_streak_resets_on_dip() {
        let mut tracker = LoadTracker::new(0.8, 0.9, 0.6, 3);
        tracker.record(0.95);
        tracker.record(0.95);
        // 0.85 breaks the pressure streak but extends the high streak to
        // three: background and low shed, normal survives.
        assert_eq!(tracker.record(0.85), Shedding::LowAndBackground);
        // Two more pressure samples are not yet three in a row.
        assert_eq!(tracker.record(0.95), Shedding::LowAndBackground);
        assert_eq!(tracker.record(0.95), Shedding::LowAndBackground);
        assert_eq!(tracker.record(0.95), Shedding::NormalAndBelow);
    }

    #[test]
    fn test_hysteresis_holds_between_watermarks() {
        let mut tracker = LoadTracker::new(0.8, 0.9, 0.6, 1);
        assert_eq!(tracker.record(0.95), Shedding::NormalAndBelow);
        // 0.7 is below both trigger watermarks but above recovery: hold.
        assert_eq!(tracker.record(0.7), Shedding::NormalAndBelow);
        // Under the recovery watermark: release.
        assert_eq!(tracker.record(0.5), Shedding::None);
    }

    #[test]
    fn test_shed_levels() {
        assert!(Shedding::LowAndBackground.sheds(Priority::Background));
        assert!(Shedding::LowAndBackground.sheds(Priority::Low));
        assert!(!Shedding::LowAndBackground.sheds(Priority::Normal));
        assert!(Shedding::NormalAndBelow.sheds(Priority::Normal));
        assert!(!Shedding::NormalAndBelow.sheds(Priority::High));
        assert!(!Shedding::NormalAndBelow.sheds(Priority::Critical));
    }
}
