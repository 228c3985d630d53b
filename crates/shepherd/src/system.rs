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

//! Embedding surface for host programs.
//!
//! A host keeps control of its event loop: [`start_system`] starts a tree
//! and hands back a [`SystemHandle`] to join or stop it, while the loop
//! stays free for other work. Several trees can be embedded side by side;
//! nothing here is process-global.

use std::future::Future;

use shepherd_runtime::{LoopOptions, Runtime};
use snafu::ResultExt;
use tracing::info;

use crate::{err::Result, state::ServiceState, supervisor::ServiceHandle};

/// Handle over a started service tree.
pub struct SystemHandle {
    service: ServiceHandle,
}

/// Start `service` and return a handle the host can join or stop.
///
/// Completes once the tree is running; fails with the service left crashed
/// and wound down otherwise.
pub async fn start_system(service: ServiceHandle) -> Result<SystemHandle> {
    service.start().await?;
    info!(service = %service.name(), "system started");
    Ok(SystemHandle { service })
}

impl SystemHandle {
    /// Completes when the tree has fully stopped, whether through
    /// [`SystemHandle::stop`], a stop elsewhere, or a crash that has wound
    /// down.
    pub async fn join(&self) { self.service.wait_until_stopped().await }

    /// Request a stop and wait for the full shutdown sequence.
    pub async fn stop(&self) -> Result<()> { self.service.stop().await }

    /// Whether the root service is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool { self.service.state() == ServiceState::Running }

    /// The root service handle.
    #[must_use]
    pub fn service(&self) -> &ServiceHandle { &self.service }
}

/// A service tree driven on a dedicated event loop owned by the system.
///
/// For hosts without an ambient runtime. The loop is built through
/// [`LoopOptions`], its threads named after the tree, and it is dropped
/// with the system. The default loop is single-threaded and makes
/// progress only while the host blocks on one of the methods here;
/// [`DedicatedSystem::join`] is the normal resting state.
pub struct DedicatedSystem {
    runtime: Runtime,
    service: ServiceHandle,
}

/// Build a dedicated, named event loop for `service` and start the tree
/// on it, blocking until the tree is running.
///
/// Must be called from outside any async runtime; hosts that already
/// have a loop use [`start_system`] instead.
pub fn start_system_dedicated(service: ServiceHandle) -> Result<DedicatedSystem> {
    let runtime = LoopOptions::for_tree(service.name())
        .create()
        .whatever_context("building the tree's event loop")?;
    runtime.block_on(service.start())?;
    info!(service = %service.name(), "system started on a dedicated loop");
    Ok(DedicatedSystem { runtime, service })
}

impl DedicatedSystem {
    /// Block until the tree has fully stopped.
    pub fn join(&self) { self.runtime.block_on(self.service.wait_until_stopped()); }

    /// Request a stop and block until the full shutdown sequence
    /// finishes.
    pub fn stop(&self) -> Result<()> { self.runtime.block_on(self.service.stop()) }

    /// Whether the root service is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool { self.service.state() == ServiceState::Running }

    /// The root service handle.
    #[must_use]
    pub fn service(&self) -> &ServiceHandle { &self.service }
}

/// Run `scope` with `service` started, stopping the service on every exit
/// path.
///
/// On the normal path the stop is awaited in place. If the caller is
/// cancelled or `scope` panics, the stop is finished on a detached task so
/// the tree still winds down.
pub async fn run_scoped<F, T>(service: &ServiceHandle, scope: F) -> Result<T>
where
    F: Future<Output = T>,
{
    service.start().await?;
    let mut guard = StopGuard {
        service: Some(service.clone()),
    };
    let output = scope.await;
    if let Some(service) = guard.service.take() {
        service.stop().await?;
    }
    Ok(output)
}

struct StopGuard {
    service: Option<ServiceHandle>,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(service) = self.service.take()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            handle.spawn(async move {
                let _ = service.stop().await;
            });
        }
    }
}
