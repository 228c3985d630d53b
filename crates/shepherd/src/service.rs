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

use async_trait::async_trait;

use crate::{activity::Activity, context::ServiceContext, err::Result, supervisor::ServiceHandle};

/// A supervised unit with lifecycle hooks and background activities.
///
/// Implementations override only the hooks they need; every hook has a
/// do-nothing default. Hook errors during startup crash the service; hook
/// errors during shutdown are logged and shutdown continues.
///
/// State an activity body needs is captured into its closure, typically as
/// clones of `Arc`-held fields:
///
/// ```rust
/// use std::sync::{
///     Arc,
///     atomic::{AtomicU64, Ordering},
/// };
///
/// use shepherd::{Activity, Service, ServiceContext};
///
/// struct Heartbeat {
///     beats: Arc<AtomicU64>,
/// }
///
/// impl Service for Heartbeat {
///     fn declare_activities(&self) -> Vec<Activity> {
///         let beats = self.beats.clone();
///         vec![Activity::task("beat", move |ctx: ServiceContext| {
///             let beats = beats.clone();
///             async move {
///                 ctx.sleep(std::time::Duration::from_millis(100)).await;
///                 beats.fetch_add(1, Ordering::SeqCst);
///                 Ok(())
///             }
///         })]
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Human-readable name, used in logs and metrics. Defaults to the
    /// implementing type's name.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Children of this service, started in declaration order before this
    /// service finishes starting and stopped in reverse once it begins
    /// stopping. Called once per construction.
    fn declare_children(&self) -> Vec<ServiceHandle> { Vec::new() }

    /// Background activities launched on every start.
    fn declare_activities(&self) -> Vec<Activity> { Vec::new() }

    /// Runs on the first start of this construction, before `on_start`.
    /// An error aborts the start and crashes the service.
    async fn on_first_start(&self, _ctx: &ServiceContext) -> Result<()> { Ok(()) }

    /// Runs on every start, before children are started. An error aborts
    /// the start and crashes the service.
    async fn on_start(&self, _ctx: &ServiceContext) -> Result<()> { Ok(()) }

    /// Runs after children are up and activities are scheduled, right
    /// before the service is marked running. An error is treated as an
    /// activity crash.
    async fn on_started(&self, _ctx: &ServiceContext) -> Result<()> { Ok(()) }

    /// Runs at the start of stop, before children are stopped and before
    /// activities are cancelled. Errors are logged; shutdown continues.
    async fn on_stop(&self, _ctx: &ServiceContext) -> Result<()> { Ok(()) }

    /// Runs at the very end of stop, after every activity has returned.
    /// Errors are logged; the service still reaches shutdown.
    async fn on_shutdown(&self, _ctx: &ServiceContext) -> Result<()> { Ok(()) }

    /// Runs before a restart re-enters the start protocol. An error leaves
    /// the service in its terminal state.
    async fn on_restart(&self, _ctx: &ServiceContext) -> Result<()> { Ok(()) }
}
