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

//! Per-service bag of running activities.
//!
//! Every spawned activity is tracked here until it completes, is
//! cancelled, or is reported crashed; nothing escapes the registry. Drain
//! waits for activities that have already observed the stop flag, then
//! escalates to cancellation and finally abort.

use std::{
    mem,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    activity::ActivityStatus,
    err::{self, Result},
    id::ActivityId,
    metrics::DRAIN_TIMEOUTS,
};

pub(crate) struct ActivityEntry {
    pub(crate) id: ActivityId,
    pub(crate) name: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) status: Arc<Mutex<ActivityStatus>>,
    pub(crate) handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct ActivityRegistry {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl ActivityRegistry {
    pub(crate) fn new() -> Self { Self::default() }

    pub(crate) fn insert(
        &self,
        name: String,
        cancel: CancellationToken,
        status: Arc<Mutex<ActivityStatus>>,
        handle: JoinHandle<()>,
    ) -> ActivityId {
        let id = ActivityId::new();
        self.entries.lock().unwrap().push(ActivityEntry {
            id,
            name,
            cancel,
            status,
            handle,
        });
        id
    }

    pub(crate) fn statuses(&self) -> Vec<(String, ActivityStatus)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|entry| (entry.name.clone(), entry.status.lock().unwrap().clone()))
            .collect()
    }

    /// Await completion of every tracked activity within `deadline`,
    /// escalating leftovers to `cancel_all` semantics with `grace`.
    /// Idempotent: entries are taken out on first call.
    pub(crate) async fn drain(
        &self,
        service: &str,
        deadline: Duration,
        grace: Duration,
    ) -> Result<()> {
        let entries = mem::take(&mut *self.entries.lock().unwrap());
        if entries.is_empty() {
            return Ok(());
        }
        debug!(service, count = entries.len(), "draining activities");

        let end = tokio::time::Instant::now() + deadline;
        let mut pending = Vec::new();
        let mut iter = entries.into_iter();
        while let Some(mut entry) = iter.next() {
            let remaining = end.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut entry.handle).await {
                Ok(joined) => log_join(service, &entry.name, joined),
                Err(_) => {
                    pending.push(entry);
                    pending.extend(iter);
                    break;
                }
            }
        }

        if pending.is_empty() {
            return Ok(());
        }

        DRAIN_TIMEOUTS.with_label_values(&[service]).inc();
        warn!(
            service,
            pending = pending.len(),
            "drain deadline reached; escalating to cancellation"
        );
        let leftover = escalate(service, pending, grace).await;
        if leftover.is_empty() {
            Ok(())
        } else {
            err::DrainTimeoutSnafu {
                service,
                activities: leftover,
            }
            .fail()
        }
    }

    /// Cancel every tracked activity, wait up to `grace`, then force-drop.
    /// Idempotent.
    pub(crate) async fn cancel_all(&self, service: &str, grace: Duration) -> Vec<String> {
        let entries = mem::take(&mut *self.entries.lock().unwrap());
        if entries.is_empty() {
            return Vec::new();
        }
        escalate(service, entries, grace).await
    }

    /// Drop all entries, aborting any leftover tasks. Used when a restart
    /// re-arms the lifecycle.
    pub(crate) fn reset(&self) {
        for entry in mem::take(&mut *self.entries.lock().unwrap()) {
            entry.handle.abort();
        }
    }
}

/// Hard-cancel `entries`, re-await briefly, abort whatever remains.
/// Returns the names of the activities that had to be aborted.
async fn escalate(service: &str, entries: Vec<ActivityEntry>, grace: Duration) -> Vec<String> {
    for entry in &entries {
        entry.cancel.cancel();
    }

    let end = tokio::time::Instant::now() + grace;
    let mut leftover = Vec::new();
    for mut entry in entries {
        let remaining = end.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, &mut entry.handle).await {
            Ok(joined) => log_join(service, &entry.name, joined),
            Err(_) => {
                entry.handle.abort();
                error!(
                    service,
                    activity = %entry.name,
                    id = %entry.id,
                    "activity unresponsive after cancellation; aborted"
                );
                leftover.push(entry.name);
            }
        }
    }
    leftover
}

fn log_join(service: &str, activity: &str, result: std::result::Result<(), JoinError>) {
    match result {
        Ok(()) => debug!(service, activity, "activity joined"),
        Err(error) if error.is_cancelled() => debug!(service, activity, "activity aborted"),
        Err(error) => error!(service, activity, error = %error, "activity task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_on_empty_registry_is_ok() {
        let registry = ActivityRegistry::new();
        registry
            .drain("svc", Duration::from_millis(10), Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn drain_waits_for_completion() {
        let registry = ActivityRegistry::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        registry.insert(
            "quick".to_string(),
            CancellationToken::new(),
            Arc::new(Mutex::new(ActivityStatus::default())),
            handle,
        );
        registry
            .drain("svc", Duration::from_secs(1), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(registry.statuses().is_empty());
    }

    #[tokio::test]
    async fn drain_reports_aborted_activities() {
        let registry = ActivityRegistry::new();
        let token = CancellationToken::new();
        // Ignores both the stop flag and its cancellation token.
        let handle = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        registry.insert(
            "stuck".to_string(),
            token,
            Arc::new(Mutex::new(ActivityStatus::default())),
            handle,
        );
        let err = registry
            .drain("svc", Duration::from_millis(20), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stuck"));
    }
}
