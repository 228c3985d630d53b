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

use crate::{
    flag::Flag,
    sleep::{self, Wakeup},
};

/// Execution context handed to lifecycle hooks and activity bodies.
///
/// Carries the owning service's cooperative stop signal. Long-running
/// bodies are expected to observe it between units of work, most simply by
/// sleeping through [`ServiceContext::sleep`], which wakes early when a
/// stop is requested.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    name: Arc<str>,
    should_stop: Flag,
}

impl ServiceContext {
    pub(crate) fn new(name: Arc<str>, should_stop: Flag) -> Self {
        ServiceContext { name, should_stop }
    }

    /// Name of the owning service.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// The level-triggered stop signal of the owning service.
    #[must_use]
    pub fn should_stop(&self) -> &Flag { &self.should_stop }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool { self.should_stop.is_raised() }

    /// Wait until a stop is requested.
    pub async fn stopping(&self) { self.should_stop.wait().await }

    /// Sleep bound to the stop signal: wakes early when a stop is
    /// requested, reporting which cause fired.
    pub async fn sleep(&self, duration: Duration) -> Wakeup {
        sleep::sleep_with(duration, &[&self.should_stop]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_wakes_on_stop() {
        let flag = Flag::new();
        let ctx = ServiceContext::new(Arc::from("test"), flag.clone());
        assert!(!ctx.is_stopping());

        flag.raise();
        assert!(ctx.is_stopping());
        let wakeup = ctx.sleep(Duration::from_secs(10)).await;
        assert_eq!(wakeup, Wakeup::Signalled(0));
    }
}
