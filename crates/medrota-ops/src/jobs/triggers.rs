//! Job trigger kinds: cron, interval, and one-shot date.
//!
//! Triggers serialize as `{kind, config}` so the repository can store them
//! alongside the job definition.

use crate::error::OpsError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

fn default_tz() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Five-field cron expression (minute hour dom month dow).
    Cron {
        cron: String,
        #[serde(default = "default_tz")]
        tz: String,
    },
    /// Fixed period, optionally anchored at a start instant.
    Interval {
        seconds: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_at: Option<DateTime<Utc>>,
    },
    /// One-shot at an instant.
    Date { run_at: DateTime<Utc> },
}

impl TriggerSpec {
    /// Validate the spec without computing anything.
    pub fn validate(&self) -> Result<(), OpsError> {
        match self {
            TriggerSpec::Cron { cron, tz } => {
                // The scheduler runs in UTC, as the job table stores UTC
                // instants.
                if !tz.eq_ignore_ascii_case("utc") {
                    return Err(OpsError::InvalidTrigger(format!(
                        "unsupported timezone: {}",
                        tz
                    )));
                }
                parse_cron(cron)?;
                Ok(())
            }
            TriggerSpec::Interval { seconds, .. } => {
                if *seconds == 0 {
                    return Err(OpsError::InvalidTrigger(
                        "interval must be at least one second".to_string(),
                    ));
                }
                Ok(())
            }
            TriggerSpec::Date { .. } => Ok(()),
        }
    }

    /// Next fire instant strictly after `after`; `None` when the trigger
    /// is exhausted.
    pub fn next_fire_after(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, OpsError> {
        match self {
            TriggerSpec::Cron { cron, .. } => {
                let schedule = parse_cron(cron)?;
                Ok(schedule.after(&after).next())
            }
            TriggerSpec::Interval { seconds, start_at } => {
                let period = ChronoDuration::seconds(*seconds as i64);
                match start_at {
                    Some(start) if *start > after => Ok(Some(*start)),
                    Some(start) => {
                        // Align to the anchor grid.
                        let elapsed = (after - *start).num_seconds();
                        let periods = elapsed / *seconds as i64 + 1;
                        Ok(Some(*start + ChronoDuration::seconds(periods * *seconds as i64)))
                    }
                    None => Ok(Some(after + period)),
                }
            }
            TriggerSpec::Date { run_at } => {
                if *run_at > after {
                    Ok(Some(*run_at))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Parse a five-field cron expression. The `cron` crate wants a seconds
/// field, so one is prepended.
fn parse_cron(expr: &str) -> Result<Schedule, OpsError> {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(OpsError::InvalidTrigger(format!(
            "expected 5 cron fields, got {}: {:?}",
            fields, expr
        )));
    }
    Schedule::from_str(&format!("0 {}", expr))
        .map_err(|e| OpsError::InvalidTrigger(format!("{}: {:?}", e, expr)))
}
