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

//! Background activity descriptors.
//!
//! An [`Activity`] describes one background unit owned by a service: a bare
//! future, a re-invoked task, an interval timer, or an oracle-scheduled
//! timer. Descriptors are declared from [`Service::declare_activities`]
//! (launched on every start) or added dynamically while the service is
//! starting or running.
//!
//! [`Service::declare_activities`]: crate::Service::declare_activities

use std::{fmt, future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use futures::{FutureExt, future::BoxFuture};

use crate::{
    context::ServiceContext,
    err::Result,
    schedule::{CronOracle, FireOracle, IntervalSpec},
};

pub(crate) type ActivityFuture = BoxFuture<'static, Result<()>>;
pub(crate) type ActivityFn = Arc<dyn Fn(ServiceContext) -> ActivityFuture + Send + Sync>;

/// Descriptor for one background activity owned by a service.
pub struct Activity {
    name: String,
    kind: ActivityKind,
}

pub(crate) enum ActivityKind {
    /// A single awaitable, run to completion once.
    Future(ActivityFuture),

    /// A body re-invoked (after yielding) for as long as the service runs,
    /// unless marked one-shot.
    Task {
        body: ActivityFn,
        one_shot: bool,
        stop_on_exit: bool,
    },

    /// A body fired on a fixed period.
    Interval { spec: IntervalSpec, body: ActivityFn },

    /// A body fired per an oracle's schedule. Always lazy.
    Timer {
        oracle: Arc<dyn FireOracle>,
        body: ActivityFn,
    },
}

impl Activity {
    /// A single awaitable, tracked until completion or cancellation at
    /// stop.
    pub fn future<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Activity {
            name: name.into(),
            kind: ActivityKind::Future(future.boxed()),
        }
    }

    /// A looping task: `body` is re-invoked whenever it returns normally
    /// and the service is still running. Bodies observe stop requests
    /// through the context, typically via [`ServiceContext::sleep`].
    pub fn task<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Activity {
            name: name.into(),
            kind: ActivityKind::Task {
                body: Arc::new(move |ctx| body(ctx).boxed()),
                one_shot: false,
                stop_on_exit: false,
            },
        }
    }

    /// A fixed-period timer. Lazy by default; see [`IntervalSpec::eager`].
    pub fn interval<F, Fut>(name: impl Into<String>, spec: IntervalSpec, body: F) -> Self
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Activity {
            name: name.into(),
            kind: ActivityKind::Interval {
                spec,
                body: Arc::new(move |ctx| body(ctx).boxed()),
            },
        }
    }

    /// A timer scheduled by a cron expression, evaluated in UTC.
    pub fn cron<F, Fut>(name: impl Into<String>, expr: &str, body: F) -> Result<Self>
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let oracle = CronOracle::new(expr)?;
        Ok(Self::timer(name, Arc::new(oracle), body))
    }

    /// A timer scheduled by an arbitrary next-fire-time oracle.
    pub fn timer<F, Fut>(
        name: impl Into<String>,
        oracle: Arc<dyn FireOracle>,
        body: F,
    ) -> Self
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Activity {
            name: name.into(),
            kind: ActivityKind::Timer {
                oracle,
                body: Arc::new(move |ctx| body(ctx).boxed()),
            },
        }
    }

    /// Run a task body exactly once instead of looping. No effect on other
    /// activity kinds.
    #[must_use]
    pub fn one_shot(mut self) -> Self {
        if let ActivityKind::Task { one_shot, .. } = &mut self.kind {
            *one_shot = true;
        }
        self
    }

    /// Stop the owning service when a one-shot task body returns normally.
    /// No effect on other activity kinds.
    #[must_use]
    pub fn stop_service_on_exit(mut self) -> Self {
        if let ActivityKind::Task { stop_on_exit, .. } = &mut self.kind {
            *stop_on_exit = true;
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    pub(crate) fn into_parts(self) -> (String, ActivityKind) { (self.name, self.kind) }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ActivityKind::Future(_) => "future",
            ActivityKind::Task { .. } => "task",
            ActivityKind::Interval { .. } => "interval",
            ActivityKind::Timer { .. } => "timer",
        };
        f.debug_struct("Activity")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Observability snapshot for a single activity.
#[derive(Debug, Clone, Default)]
pub struct ActivityStatus {
    /// Wall-clock instant of the most recent fire.
    pub ran_at: Option<DateTime<Utc>>,
    /// Completed fires in this lifecycle.
    pub fires: u64,
    /// Fire slots skipped because the handler overran its period. Counted,
    /// never replayed.
    pub missed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_only_affects_tasks() {
        let task = Activity::task("t", |_ctx| async { Ok(()) }).one_shot();
        assert!(matches!(
            task.kind,
            ActivityKind::Task { one_shot: true, .. }
        ));

        let fut = Activity::future("f", async { Ok(()) }).one_shot();
        assert!(matches!(fut.kind, ActivityKind::Future(_)));
    }

    #[test]
    fn cron_rejects_bad_expressions() {
        assert!(Activity::cron("c", "bogus", |_ctx| async { Ok(()) }).is_err());
    }

    #[test]
    fn debug_shows_kind() {
        let spec = IntervalSpec::new(std::time::Duration::from_secs(1)).unwrap();
        let act = Activity::interval("tick", spec, |_ctx| async { Ok(()) });
        assert_eq!(format!("{act:?}"), "Activity { name: \"tick\", kind: \"interval\" }");
    }
}
