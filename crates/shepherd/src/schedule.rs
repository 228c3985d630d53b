// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Timer specifications and the next-fire-time oracle.

use std::{str::FromStr, time::Duration};

use chrono::{DateTime, FixedOffset, Utc};
use snafu::{ResultExt, ensure};

use crate::err::{self, Result};

/// Fixed-period timer specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSpec {
    period: Duration,
    eager: bool,
}

impl IntervalSpec {
    /// A lazy interval: the first fire happens one period after launch.
    pub fn new(period: Duration) -> Result<Self> {
        ensure!(
            !period.is_zero(),
            err::InvalidArgumentSnafu {
                message: "interval period must be positive",
            }
        );
        Ok(IntervalSpec {
            period,
            eager: false,
        })
    }

    /// Fire immediately on launch instead of waiting one period first.
    #[must_use]
    pub const fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub(crate) const fn period(self) -> Duration { self.period }

    pub(crate) const fn is_eager(self) -> bool { self.eager }
}

/// Computes the next instant a scheduled activity should fire.
///
/// The oracle is consulted again after every wake-up, so implementations
/// may shift their answers over time (daylight saving transitions, clock
/// corrections, reloaded schedules).
pub trait FireOracle: Send + Sync + std::fmt::Debug {
    /// The next fire instant strictly after `now`, or `None` when the
    /// schedule has no further occurrences.
    fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Cron-expression oracle over the standard 5-field format
/// (`minute hour day month weekday`), evaluated in UTC or at a fixed
/// offset from it.
#[derive(Debug, Clone)]
pub struct CronOracle {
    expr: String,
    cron: croner::Cron,
    offset: Option<FixedOffset>,
}

impl CronOracle {
    pub fn new(expr: &str) -> Result<Self> {
        let cron = croner::Cron::from_str(expr).context(err::InvalidCronSnafu { expr })?;
        Ok(CronOracle {
            expr: expr.to_string(),
            cron,
            offset: None,
        })
    }

    /// Evaluate the expression at a fixed offset from UTC instead of UTC
    /// itself.
    #[must_use]
    pub const fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn expression(&self) -> &str { &self.expr }
}

impl FireOracle for CronOracle {
    fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.offset {
            Some(offset) => self
                .cron
                .find_next_occurrence(&now.with_timezone(&offset), false)
                .ok()
                .map(|next| next.with_timezone(&Utc)),
            None => self.cron.find_next_occurrence(&now, false).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn zero_period_is_rejected() {
        let err = IntervalSpec::new(Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("period must be positive"));
    }

    #[test]
    fn eager_flag_round_trips() {
        let spec = IntervalSpec::new(Duration::from_secs(5)).unwrap();
        assert!(!spec.is_eager());
        assert!(spec.eager().is_eager());
        assert_eq!(spec.period(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_cron_is_rejected() {
        assert!(CronOracle::new("not a cron").is_err());
        assert!(CronOracle::new("61 * * * *").is_err());
    }

    #[test]
    fn every_minute_fires_within_a_minute() {
        let oracle = CronOracle::new("* * * * *").unwrap();
        let now = Utc::now();
        let next = oracle.next_fire_after(now).unwrap();
        assert!(next > now);
        assert!(next - now <= chrono::Duration::seconds(60));
    }

    #[test]
    fn daily_schedule_lands_on_midnight() {
        let oracle = CronOracle::new("0 0 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 13, 30, 0).unwrap();
        let next = oracle.next_fire_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap());
    }

    #[test]
    fn offset_shifts_the_schedule() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let oracle = CronOracle::new("0 0 * * *").unwrap().with_offset(offset);
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 13, 30, 0).unwrap();
        // Midnight at UTC+2 is 22:00 UTC.
        let next = oracle.next_fire_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 15, 22, 0, 0).unwrap());
    }
}
