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

use std::{sync::Arc, time::Duration};

use bon::Builder;
use shepherd_runtime::Runtime;

/// How a parent reacts when one of its children crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrashPolicy {
    /// Crash too, carrying the child's failure upward.
    #[default]
    Propagate,
    /// Log the child's failure and keep running.
    Isolate,
}

/// Per-service configuration.
#[derive(Debug, Clone, Builder)]
pub struct ServiceConfig {
    /// Runtime to spawn activities and shutdown sequences on. When unset,
    /// the ambient tokio runtime is acquired lazily at first use; the
    /// service never pins a loop at construction.
    #[builder(into)]
    runtime: Option<Arc<Runtime>>,

    /// Deadline for graceful shutdown: stopping children plus draining
    /// activities. Activities not finished within this window are
    /// cancelled. Default: 30 seconds.
    #[builder(default = Duration::from_secs(30), into)]
    shutdown_timeout: Duration,

    /// Hard grace after the drain deadline: cancelled activities get this
    /// long to wind down before being aborted outright. Default: 1 second.
    #[builder(default = Duration::from_secs(1), into)]
    cancel_grace: Duration,

    /// Reaction to crashing children.
    #[builder(default)]
    crash_policy: CrashPolicy,
}

impl ServiceConfig {
    pub(crate) fn runtime(&self) -> Option<Arc<Runtime>> { self.runtime.clone() }

    pub(crate) fn shutdown_timeout(&self) -> Duration { self.shutdown_timeout }

    pub(crate) fn cancel_grace(&self) -> Duration { self.cancel_grace }

    pub(crate) fn crash_policy(&self) -> CrashPolicy { self.crash_policy }
}

impl Default for ServiceConfig {
    fn default() -> Self { Self::builder().build() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.cancel_grace(), Duration::from_secs(1));
        assert_eq!(config.crash_policy(), CrashPolicy::Propagate);
        assert!(config.runtime().is_none());
    }

    #[test]
    fn builder_overrides() {
        let config = ServiceConfig::builder()
            .shutdown_timeout(Duration::from_millis(250))
            .crash_policy(CrashPolicy::Isolate)
            .build();
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(250));
        assert_eq!(config.crash_policy(), CrashPolicy::Isolate);
    }
}
