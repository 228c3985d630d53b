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

//! Cooperative service supervision for long-lived async applications.
//!
//! Applications are built out of *services* arranged in a tree. Each
//! service has lifecycle hooks, a set of background *activities* (bare
//! futures, looping tasks, interval timers, cron timers), and a strict
//! start/stop protocol: parents start their children before finishing
//! their own startup and stop them in reverse once shutdown begins.
//! Crashes propagate upward; stops drain cooperatively and escalate to
//! cancellation only past a deadline.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use shepherd::{Activity, IntervalSpec, Service, ServiceContext, ServiceHandle};
//!
//! struct Poller;
//!
//! impl Service for Poller {
//!     fn declare_activities(&self) -> Vec<Activity> {
//!         let spec = IntervalSpec::new(Duration::from_secs(5)).expect("positive period");
//!         vec![Activity::interval("poll", spec.eager(), |ctx: ServiceContext| async move {
//!             tracing::info!(service = ctx.name(), "polling");
//!             Ok(())
//!         })]
//!     }
//! }
//!
//! struct App;
//!
//! impl Service for App {
//!     fn declare_children(&self) -> Vec<ServiceHandle> {
//!         vec![ServiceHandle::new(Poller)]
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> shepherd::Result<()> {
//!     let app = ServiceHandle::new(App);
//!     app.start().await?;
//!
//!     // ... the host keeps its event loop ...
//!
//!     app.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`Service`]: hook trait implemented by user services
//! - [`ServiceHandle`]: supervised instance with `start`/`stop`/`restart`,
//!   waiters, and the dependency surface
//! - [`Activity`]: background unit descriptors (future, task, interval,
//!   cron)
//! - [`FireOracle`] / [`CronOracle`]: pluggable next-fire-time computation
//! - [`sleep_with`] / [`Wakeup`]: cancellable sleep bound to stop signals
//! - [`start_system`] / [`start_system_dedicated`] / [`run_scoped`]:
//!   embedding surface for hosts, with or without an ambient runtime

mod activity;
mod config;
mod context;
mod err;
mod flag;
mod id;
mod metrics;
mod registry;
mod runner;
mod schedule;
mod service;
mod sleep;
mod state;
mod supervisor;
mod system;

pub use activity::{Activity, ActivityStatus};
pub use config::{CrashPolicy, ServiceConfig};
pub use context::ServiceContext;
pub use err::{Error, Result};
pub use flag::Flag;
pub use id::{ActivityId, ServiceId};
pub use schedule::{CronOracle, FireOracle, IntervalSpec};
pub use service::Service;
pub use sleep::{Wakeup, sleep_with};
pub use state::ServiceState;
pub use supervisor::{CrashReport, ServiceHandle};
pub use system::{DedicatedSystem, SystemHandle, run_scoped, start_system, start_system_dedicated};
