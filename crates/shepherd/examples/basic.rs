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

//! Example demonstrating a small supervised application
//!
//! This example shows:
//! - A service tree with declared children
//! - Interval and looping activities
//! - Attaching a runtime dependency to a running service
//! - Graceful shutdown in reverse start order

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use shepherd::{
    Activity, IntervalSpec, Service, ServiceContext, ServiceHandle, start_system,
};

// A worker that polls on a fixed interval.
struct Poller {
    polls: Arc<AtomicUsize>,
}

impl Service for Poller {
    fn declare_activities(&self) -> Vec<Activity> {
        let polls = self.polls.clone();
        let spec = IntervalSpec::new(Duration::from_millis(500)).expect("positive period");
        vec![Activity::interval(
            "poll",
            spec.eager(),
            move |ctx: ServiceContext| {
                let polls = polls.clone();
                async move {
                    let count = polls.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(service = ctx.name(), count, "polled");
                    Ok(())
                }
            },
        )]
    }
}

// A cache that logs its lifecycle hooks.
struct Cache;

#[async_trait]
impl Service for Cache {
    async fn on_start(&self, ctx: &ServiceContext) -> shepherd::Result<()> {
        tracing::info!(service = ctx.name(), "warming up");
        Ok(())
    }

    async fn on_shutdown(&self, ctx: &ServiceContext) -> shepherd::Result<()> {
        tracing::info!(service = ctx.name(), "flushed");
        Ok(())
    }
}

// The application root: starts the cache, then the poller.
struct App {
    polls: Arc<AtomicUsize>,
}

impl Service for App {
    fn name(&self) -> &str { "app" }

    fn declare_children(&self) -> Vec<ServiceHandle> {
        vec![
            ServiceHandle::new(Cache),
            ServiceHandle::new(Poller {
                polls: self.polls.clone(),
            }),
        ]
    }
}

// A late-joining component attached while the app is already running.
struct Sidecar;

#[async_trait]
impl Service for Sidecar {
    async fn on_started(&self, ctx: &ServiceContext) -> shepherd::Result<()> {
        tracing::info!(service = ctx.name(), "joined late");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> shepherd::Result<()> {
    let _guards = shepherd_telemetry::init_tracing_subscriber("shepherd-demo");
    shepherd_telemetry::set_panic_hook();

    let polls = Arc::new(AtomicUsize::new(0));
    let app = ServiceHandle::new(App {
        polls: polls.clone(),
    });

    let system = start_system(app.clone()).await?;

    // Attach a runtime dependency while running.
    app.add_runtime_dependency(ServiceHandle::new(Sidecar)).await?;

    // A dynamic background task on the root service.
    app.add_task("heartbeat", |ctx: ServiceContext| async move {
        ctx.sleep(Duration::from_millis(300)).await;
        tracing::debug!(service = ctx.name(), "heartbeat");
        Ok(())
    })?;

    tokio::time::sleep(Duration::from_secs(2)).await;

    tracing::info!(
        polls = polls.load(Ordering::SeqCst),
        "shutting down"
    );
    system.stop().await?;
    Ok(())
}
