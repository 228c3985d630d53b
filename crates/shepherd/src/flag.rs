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

use tokio_util::sync::CancellationToken;

/// A level-triggered, one-way latch.
///
/// Once raised it stays raised for the rest of the lifecycle; every current
/// and future waiter observes it. Restart installs fresh flags rather than
/// lowering old ones, so a waiter never misses an edge.
#[derive(Debug, Clone, Default)]
pub struct Flag {
    token: CancellationToken,
}

impl Flag {
    pub(crate) fn new() -> Self {
        Flag {
            token: CancellationToken::new(),
        }
    }

    /// Raise the flag, waking all waiters. Idempotent.
    pub(crate) fn raise(&self) { self.token.cancel(); }

    /// Whether the flag has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool { self.token.is_cancelled() }

    /// Wait until the flag is raised. Completes immediately if it already
    /// is.
    pub async fn wait(&self) { self.token.cancelled().await }
}

/// The flag set of one service lifecycle. Replaced wholesale on restart;
/// waiters holding the previous set keep observing the previous, raised
/// flags.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleFlags {
    pub(crate) started: Flag,
    pub(crate) stopped: Flag,
    pub(crate) shutdown: Flag,
    pub(crate) crashed: Flag,
    pub(crate) should_stop: Flag,
}

impl LifecycleFlags {
    pub(crate) fn new() -> Self {
        LifecycleFlags {
            started: Flag::new(),
            stopped: Flag::new(),
            shutdown: Flag::new(),
            crashed: Flag::new(),
            should_stop: Flag::new(),
        }
    }
}
