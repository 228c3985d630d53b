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

//! Drive loops for the activity kinds.
//!
//! Each runner executes one activity body according to its schedule,
//! observes the service's stop signal cooperatively, and reports how the
//! activity ended. Crash policy itself lives with the supervisor; runners
//! only classify outcomes.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::{
    activity::{ActivityFn, ActivityFuture, ActivityKind, ActivityStatus},
    context::ServiceContext,
    metrics::{
        ACTIVITY_EXECUTION_DURATION_SECONDS, ACTIVITY_EXECUTION_ERRORS, ACTIVITY_EXECUTIONS,
        TIMER_MISSED_FIRES,
    },
    schedule::{FireOracle, IntervalSpec},
    sleep::Wakeup,
};

/// How an activity's drive loop ended.
pub(crate) enum Outcome {
    /// Ran to completion or observed the stop signal.
    Completed,
    /// A one-shot task finished and asked for the owning service to stop.
    StopService,
    /// The body returned an error or panicked.
    Crashed { message: String },
}

pub(crate) async fn drive(
    kind: ActivityKind,
    ctx: &ServiceContext,
    status: &Arc<Mutex<ActivityStatus>>,
    service: &str,
    activity: &str,
) -> Outcome {
    match kind {
        ActivityKind::Future(future) => {
            mark_fire(status);
            match run_future(future, service, activity).await {
                Ok(()) => Outcome::Completed,
                Err(message) => Outcome::Crashed { message },
            }
        }
        ActivityKind::Task {
            body,
            one_shot,
            stop_on_exit,
        } => drive_task(&body, one_shot, stop_on_exit, ctx, status, service, activity).await,
        ActivityKind::Interval { spec, body } => {
            drive_interval(spec, &body, ctx, status, service, activity).await
        }
        ActivityKind::Timer { oracle, body } => {
            drive_timer(&*oracle, &body, ctx, status, service, activity).await
        }
    }
}

async fn drive_task(
    body: &ActivityFn,
    one_shot: bool,
    stop_on_exit: bool,
    ctx: &ServiceContext,
    status: &Arc<Mutex<ActivityStatus>>,
    service: &str,
    activity: &str,
) -> Outcome {
    loop {
        if ctx.is_stopping() {
            return Outcome::Completed;
        }

        mark_fire(status);
        if let Err(message) = run_body(body, ctx, service, activity).await {
            return Outcome::Crashed { message };
        }

        if one_shot {
            return if stop_on_exit {
                Outcome::StopService
            } else {
                Outcome::Completed
            };
        }

        // Re-invoke after yielding so a body that returns immediately does
        // not starve the loop.
        tokio::task::yield_now().await;
    }
}

async fn drive_interval(
    spec: IntervalSpec,
    body: &ActivityFn,
    ctx: &ServiceContext,
    status: &Arc<Mutex<ActivityStatus>>,
    service: &str,
    activity: &str,
) -> Outcome {
    let period = spec.period();
    let mut next = tokio::time::Instant::now();
    if !spec.is_eager() {
        next += period;
    }

    loop {
        let now = tokio::time::Instant::now();
        if next > now {
            match ctx.sleep(next - now).await {
                Wakeup::Signalled(_) => return Outcome::Completed,
                Wakeup::TimerExpired => {}
            }
        } else if ctx.is_stopping() {
            return Outcome::Completed;
        }

        mark_fire(status);
        if let Err(message) = run_body(body, ctx, service, activity).await {
            return Outcome::Crashed { message };
        }

        next += period;
        let now = tokio::time::Instant::now();
        if next <= now {
            // Handler overran the period: fire once immediately, count the
            // skipped slots, never replay them.
            let missed = overrun_periods(now - next, period);
            if missed > 0 {
                status.lock().unwrap().missed += missed;
                TIMER_MISSED_FIRES
                    .with_label_values(&[service, activity])
                    .inc_by(missed);
            }
            warn!(service, activity, missed, "timer handler overran its period");
            next = now;
        }
    }
}

async fn drive_timer(
    oracle: &dyn FireOracle,
    body: &ActivityFn,
    ctx: &ServiceContext,
    status: &Arc<Mutex<ActivityStatus>>,
    service: &str,
    activity: &str,
) -> Outcome {
    loop {
        if ctx.is_stopping() {
            return Outcome::Completed;
        }

        let now = Utc::now();
        let Some(next) = oracle.next_fire_after(now) else {
            debug!(service, activity, "schedule exhausted; waiting for stop");
            ctx.stopping().await;
            return Outcome::Completed;
        };

        if next > now {
            let wait = (next - now).to_std().unwrap_or_default();
            match ctx.sleep(wait).await {
                Wakeup::Signalled(_) => return Outcome::Completed,
                Wakeup::TimerExpired => {}
            }
            // Clocks may have shifted under us (daylight saving, NTP
            // correction). Only fire once the oracle's instant has really
            // arrived.
            if Utc::now() < next {
                continue;
            }
        }

        mark_fire(status);
        if let Err(message) = run_body(body, ctx, service, activity).await {
            return Outcome::Crashed { message };
        }
    }
}

async fn run_body(
    body: &ActivityFn,
    ctx: &ServiceContext,
    service: &str,
    activity: &str,
) -> Result<(), String> {
    run_future(body(ctx.clone()), service, activity).await
}

async fn run_future(future: ActivityFuture, service: &str, activity: &str) -> Result<(), String> {
    let started = std::time::Instant::now();
    let outcome = AssertUnwindSafe(future).catch_unwind().await;
    ACTIVITY_EXECUTION_DURATION_SECONDS
        .with_label_values(&[service, activity])
        .observe(started.elapsed().as_secs_f64());

    match outcome {
        Ok(Ok(())) => {
            ACTIVITY_EXECUTIONS
                .with_label_values(&[service, activity])
                .inc();
            Ok(())
        }
        Ok(Err(error)) => {
            ACTIVITY_EXECUTION_ERRORS
                .with_label_values(&[service, activity])
                .inc();
            error!(service, activity, error = %error, "activity body failed");
            Err(error.to_string())
        }
        Err(payload) => {
            ACTIVITY_EXECUTION_ERRORS
                .with_label_values(&[service, activity])
                .inc();
            let message = panic_message(payload.as_ref());
            error!(service, activity, message, "activity body panicked");
            Err(message)
        }
    }
}

fn mark_fire(status: &Arc<Mutex<ActivityStatus>>) {
    let mut status = status.lock().unwrap();
    status.ran_at = Some(Utc::now());
    status.fires += 1;
}

fn overrun_periods(behind: Duration, period: Duration) -> u64 {
    u64::try_from(behind.as_nanos() / period.as_nanos().max(1)).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "activity panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrun_periods_counts_whole_slots() {
        let period = Duration::from_millis(100);
        assert_eq!(overrun_periods(Duration::from_millis(50), period), 0);
        assert_eq!(overrun_periods(Duration::from_millis(100), period), 1);
        assert_eq!(overrun_periods(Duration::from_millis(350), period), 3);
    }
}
