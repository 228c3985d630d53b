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

//! Cancellable sleep: wait for a duration or for any of a set of stop
//! signals, whichever comes first.

use std::time::Duration;

use futures::{FutureExt, future::select_all};

use crate::flag::Flag;

/// Why a cancellable sleep returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// The full duration elapsed on the monotonic clock.
    TimerExpired,
    /// The signal at this index was raised first.
    Signalled(usize),
}

impl Wakeup {
    /// Whether the sleep ran to its full duration.
    #[must_use]
    pub const fn timer_expired(self) -> bool { matches!(self, Self::TimerExpired) }
}

/// Sleep up to `duration` or until one of `signals` is raised.
///
/// Exactly one cause is reported. When several signals are already raised
/// by the time the sleep polls, the lowest index wins; a raised signal also
/// wins over a simultaneously expired timer. A zero duration yields to the
/// scheduler once and reports `TimerExpired` without checking the signals.
/// Never busy-waits.
pub async fn sleep_with(duration: Duration, signals: &[&Flag]) -> Wakeup {
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return Wakeup::TimerExpired;
    }

    if signals.is_empty() {
        tokio::time::sleep(duration).await;
        return Wakeup::TimerExpired;
    }

    // select_all polls in order, so simultaneous signals resolve to the
    // lowest index.
    let waiters = signals
        .iter()
        .map(|flag| flag.wait().boxed())
        .collect::<Vec<_>>();

    tokio::select! {
        biased;
        (_, index, _) = select_all(waiters) => Wakeup::Signalled(index),
        () = tokio::time::sleep(duration) => Wakeup::TimerExpired,
    }
}
