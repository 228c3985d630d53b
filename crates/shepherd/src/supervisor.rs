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

//! The supervision engine: lifecycle driving, the service tree, and crash
//! propagation.
//!
//! A [`ServiceHandle`] is a cheap-to-clone reference to one supervised
//! service. The first caller of `start()` or `stop()` drives the protocol;
//! concurrent callers await the same outcome. The stop sequence runs on a
//! detached task, so it completes even if the caller that requested it is
//! cancelled.

use std::{
    fmt, mem,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use snafu::{ResultExt, ensure};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    activity::{Activity, ActivityKind, ActivityStatus},
    config::{CrashPolicy, ServiceConfig},
    context::ServiceContext,
    err::{self, Error, Result},
    flag::{Flag, LifecycleFlags},
    id::ServiceId,
    metrics::{SERVICE_CRASHED, SERVICE_RESTARTED, SERVICE_RUNNING, SERVICE_STARTED,
        SERVICE_STOPPED},
    registry::ActivityRegistry,
    runner,
    service::Service,
    sleep::Wakeup,
    state::ServiceState,
};

/// Why a service ended up crashed.
#[derive(Debug, Clone)]
pub struct CrashReport {
    /// What raised: an activity name, a hook name, or `child:<name>`.
    pub origin: String,
    /// Rendered error message.
    pub message: String,
    /// When the crash was recorded.
    pub at: DateTime<Utc>,
}

struct Lifecycle {
    state: ServiceState,
    flags: LifecycleFlags,
    ctx: ServiceContext,
    halt_spawned: bool,
}

impl Lifecycle {
    fn fresh(name: &str) -> Self {
        let flags = LifecycleFlags::new();
        let ctx = ServiceContext::new(Arc::from(name), flags.should_stop.clone());
        Lifecycle {
            state: ServiceState::Init,
            flags,
            ctx,
            halt_spawned: false,
        }
    }
}

#[derive(Default)]
struct Children {
    /// Declared dependencies, in start order.
    declared: Vec<ServiceHandle>,
    /// Dependencies attached while starting or running; stopped before the
    /// declared ones, in reverse insertion order.
    runtime: Vec<ServiceHandle>,
    declared_loaded: bool,
}

pub(crate) struct ServiceInner {
    service: Arc<dyn Service>,
    id: ServiceId,
    name: String,
    config: ServiceConfig,
    lifecycle: Mutex<Lifecycle>,
    children: Mutex<Children>,
    parent: Mutex<Option<Weak<ServiceInner>>>,
    crash: Mutex<Option<CrashReport>>,
    pending: Mutex<Vec<Activity>>,
    registry: ActivityRegistry,
    first_start_done: AtomicBool,
}

/// Cheap-to-clone handle to one supervised service.
#[derive(Clone)]
pub struct ServiceHandle {
    pub(crate) inner: Arc<ServiceInner>,
}

impl ServiceHandle {
    /// Supervise `service` with the default configuration.
    pub fn new(service: impl Service) -> Self {
        Self::with_config(service, ServiceConfig::default())
    }

    /// Supervise `service` with an explicit configuration.
    pub fn with_config(service: impl Service, config: ServiceConfig) -> Self {
        let service: Arc<dyn Service> = Arc::new(service);
        let name = service.name().to_string();
        ServiceHandle {
            inner: Arc::new(ServiceInner {
                service,
                id: ServiceId::new(),
                lifecycle: Mutex::new(Lifecycle::fresh(&name)),
                name,
                config,
                children: Mutex::new(Children::default()),
                parent: Mutex::new(None),
                crash: Mutex::new(None),
                pending: Mutex::new(Vec::new()),
                registry: ActivityRegistry::new(),
                first_start_done: AtomicBool::new(false),
            }),
        }
    }

    /// Human-readable name of the service.
    #[must_use]
    pub fn name(&self) -> &str { &self.inner.name }

    /// Stable id of this service construction.
    #[must_use]
    pub fn id(&self) -> ServiceId { self.inner.id }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState { self.inner.lifecycle.lock().unwrap().state }

    /// Whether the service is fully started.
    #[must_use]
    pub fn is_running(&self) -> bool { self.state() == ServiceState::Running }

    /// The crash report, set iff the service is crashed.
    #[must_use]
    pub fn exception(&self) -> Option<CrashReport> { self.inner.crash.lock().unwrap().clone() }

    /// Declared children followed by runtime dependencies, in start order.
    #[must_use]
    pub fn children(&self) -> Vec<ServiceHandle> {
        let children = self.inner.children.lock().unwrap();
        children
            .declared
            .iter()
            .chain(children.runtime.iter())
            .cloned()
            .collect()
    }

    /// Name and status of every tracked activity.
    #[must_use]
    pub fn activities(&self) -> Vec<(String, ActivityStatus)> { self.inner.registry.statuses() }

    /// The current lifecycle's execution context.
    #[must_use]
    pub fn context(&self) -> ServiceContext { self.inner.lifecycle.lock().unwrap().ctx.clone() }

    /// The current lifecycle's cooperative stop signal.
    #[must_use]
    pub fn should_stop(&self) -> Flag {
        self.inner
            .lifecycle
            .lock()
            .unwrap()
            .flags
            .should_stop
            .clone()
    }

    /// Sleep bound to this service's stop signal.
    pub async fn sleep(&self, duration: std::time::Duration) -> Wakeup {
        self.context().sleep(duration).await
    }

    fn flags(&self) -> LifecycleFlags { self.inner.lifecycle.lock().unwrap().flags.clone() }

    /// Wait until the service is started. Also completes if the lifecycle
    /// ends first (crash, or a stop that won the race), so waiters never
    /// hang; inspect [`ServiceHandle::state`] to distinguish.
    pub async fn wait_until_started(&self) {
        let flags = self.flags();
        tokio::select! {
            () = flags.started.wait() => {}
            () = flags.crashed.wait() => {}
            () = flags.stopped.wait() => {}
        }
    }

    /// Wait until the service has fully stopped (also raised after a crash
    /// has wound down).
    pub async fn wait_until_stopped(&self) {
        let flags = self.flags();
        flags.stopped.wait().await;
    }

    /// Wait until the service crashes. Never completes for a clean
    /// lifecycle; combine with other waits where that matters.
    pub async fn wait_until_crashed(&self) {
        let flags = self.flags();
        flags.crashed.wait().await;
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    /// Start the service: hooks, declared children in order, activities.
    ///
    /// Idempotent: the first caller drives the protocol, concurrent and
    /// later callers await the same terminal outcome. On failure the
    /// service is left crashed with its children stopped, and the error
    /// describes the cause. If the driving caller is cancelled, startup is
    /// aborted and the service crashes with a cancellation report.
    pub fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let first = {
                let mut lc = self.inner.lifecycle.lock().unwrap();
                if lc.state == ServiceState::Init {
                    lc.state = ServiceState::Starting;
                    true
                } else {
                    false
                }
            };
            if !first {
                return self.await_start_outcome().await;
            }

            info!(service = %self.inner.name, id = %self.inner.id, "service starting");
            SERVICE_STARTED.with_label_values(&[&self.inner.name]).inc();

            let mut guard = StartGuard {
                inner: Some(Arc::clone(&self.inner)),
            };
            let result = self.run_start_protocol().await;
            guard.inner = None;

            match result {
                Ok(()) => {
                    info!(service = %self.inner.name, "service running");
                    Ok(())
                }
                Err(error) => {
                    self.fail_start(&error).await;
                    Err(error)
                }
            }
        })
    }

    async fn run_start_protocol(&self) -> Result<()> {
        let ctx = self.context();

        if !self.inner.first_start_done.swap(true, Ordering::SeqCst) {
            self.inner.service.on_first_start(&ctx).await?;
            self.ensure_starting()?;
        }

        self.inner.service.on_start(&ctx).await?;
        self.ensure_starting()?;

        for child in self.load_declared_children() {
            debug!(service = %self.inner.name, child = %child.name(), "starting child");
            child.start().await.context(err::DependencyFailureSnafu {
                service: &self.inner.name,
                child: child.name(),
            })?;
            self.ensure_starting()?;
        }

        ServiceInner::launch_activities(&self.inner)?;

        self.inner.service.on_started(&ctx).await?;
        self.ensure_starting()?;

        {
            let mut lc = self.inner.lifecycle.lock().unwrap();
            ensure!(
                lc.state == ServiceState::Starting,
                err::CancelledSnafu {
                    service: &self.inner.name,
                    phase: "start",
                }
            );
            lc.state = ServiceState::Running;
            lc.flags.started.raise();
        }
        SERVICE_RUNNING.with_label_values(&[&self.inner.name]).set(1);
        Ok(())
    }

    /// Load the declared child list, calling `declare_children` exactly
    /// once per construction. Hook-declared children come before any added
    /// through [`ServiceHandle::add_dependency`].
    fn load_declared_children(&self) -> Vec<ServiceHandle> {
        let needs_load = !self.inner.children.lock().unwrap().declared_loaded;
        if needs_load {
            let hook_children = self.inner.service.declare_children();
            for child in &hook_children {
                child.set_parent(&self.inner);
            }
            let mut children = self.inner.children.lock().unwrap();
            if !children.declared_loaded {
                children.declared_loaded = true;
                let mut combined = hook_children;
                combined.append(&mut children.declared);
                children.declared = combined;
            }
        }
        self.inner.children.lock().unwrap().declared.clone()
    }

    fn set_parent(&self, parent: &Arc<ServiceInner>) {
        *self.inner.parent.lock().unwrap() = Some(Arc::downgrade(parent));
    }

    fn ensure_starting(&self) -> Result<()> {
        let state = self.state();
        match state {
            ServiceState::Starting => Ok(()),
            ServiceState::Crashed => Err(self.crash_error()),
            _ => err::CancelledSnafu {
                service: &self.inner.name,
                phase: "start",
            }
            .fail(),
        }
    }

    fn crash_error(&self) -> Error {
        match self.exception() {
            Some(report) => err::ActivityCrashSnafu {
                service: &self.inner.name,
                activity: report.origin,
                message: report.message,
            }
            .build(),
            None => err::CancelledSnafu {
                service: &self.inner.name,
                phase: "start",
            }
            .build(),
        }
    }

    /// Record a failed start, make sure a halt winds the tree down, and
    /// wait for it so already-started children are stopped before the
    /// caller sees the error.
    async fn fail_start(&self, error: &Error) {
        enum Outcome {
            ConcurrentStop,
            NeedHalt(bool),
        }

        let outcome = {
            let mut lc = self.inner.lifecycle.lock().unwrap();
            if lc.state == ServiceState::Stopping && matches!(error, Error::Cancelled { .. }) {
                // A concurrent stop won the race; its halt finishes the
                // lifecycle and there is nothing to crash.
                Outcome::ConcurrentStop
            } else {
                if lc.state != ServiceState::Crashed {
                    *self.inner.crash.lock().unwrap() = Some(CrashReport {
                        origin: "start".to_string(),
                        message: error.to_string(),
                        at: Utc::now(),
                    });
                    lc.state = ServiceState::Crashed;
                    lc.flags.crashed.raise();
                    SERVICE_CRASHED.with_label_values(&[&self.inner.name]).inc();
                }
                lc.flags.should_stop.raise();
                Outcome::NeedHalt(!mem::replace(&mut lc.halt_spawned, true))
            }
        };

        let need_halt = match outcome {
            Outcome::ConcurrentStop => {
                self.wait_until_stopped().await;
                return;
            }
            Outcome::NeedHalt(need_halt) => need_halt,
        };
        error!(service = %self.inner.name, error = %error, "service failed to start");

        if need_halt {
            match self.inner.spawn_handle() {
                Ok(handle) => {
                    let inner = Arc::clone(&self.inner);
                    handle.spawn(async move { halt(inner, true).await });
                }
                Err(error) => {
                    warn!(service = %self.inner.name, error = %error, "no runtime to wind down after failed start");
                    return;
                }
            }
        }
        self.wait_until_stopped().await;
    }

    async fn await_start_outcome(&self) -> Result<()> {
        self.wait_until_started().await;
        let flags = self.flags();
        if flags.started.is_raised() {
            Ok(())
        } else if self.state() == ServiceState::Crashed {
            Err(self.crash_error())
        } else {
            err::CancelledSnafu {
                service: &self.inner.name,
                phase: "start",
            }
            .fail()
        }
    }

    // ------------------------------------------------------------------
    // Stop
    // ------------------------------------------------------------------

    /// Stop the service: children in reverse start order, then drain
    /// activities, escalating past the shutdown deadline.
    ///
    /// Idempotent and shielded: the sequence runs on a detached task and
    /// completes even if this caller is cancelled. A service that never
    /// started just raises its `stopped` flag.
    pub fn stop(&self) -> BoxFuture<'_, Result<()>> {
        enum Plan {
            Done,
            Spawn,
            Await,
        }

        Box::pin(async move {
        let plan = {
            let mut lc = self.inner.lifecycle.lock().unwrap();
            match lc.state {
                ServiceState::Init => {
                    lc.flags.should_stop.raise();
                    lc.flags.stopped.raise();
                    lc.flags.shutdown.raise();
                    Plan::Done
                }
                ServiceState::Shutdown => Plan::Done,
                ServiceState::Starting | ServiceState::Running => {
                    let from = lc.state;
                    lc.state = ServiceState::Stopping;
                    lc.flags.should_stop.raise();
                    if mem::replace(&mut lc.halt_spawned, true) {
                        Plan::Await
                    } else {
                        info!(service = %self.inner.name, from = %from, "stop requested");
                        Plan::Spawn
                    }
                }
                ServiceState::Stopping => Plan::Await,
                ServiceState::Crashed => {
                    if lc.halt_spawned {
                        Plan::Await
                    } else {
                        // Crashed before any cleanup could be spawned;
                        // nothing is running, finish the flags here.
                        lc.flags.stopped.raise();
                        lc.flags.shutdown.raise();
                        Plan::Done
                    }
                }
            }
        };

        match plan {
            Plan::Done => Ok(()),
            Plan::Spawn => {
                let handle = self.inner.spawn_handle()?;
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move { halt(inner, false).await });
                self.wait_until_stopped().await;
                Ok(())
            }
            Plan::Await => {
                self.wait_until_stopped().await;
                Ok(())
            }
        }
        })
    }

    // ------------------------------------------------------------------
    // Restart
    // ------------------------------------------------------------------

    /// Restart a terminal service: fire `on_restart`, reset the lifecycle
    /// (fresh flags, cleared crash report and registry, declared children
    /// reset recursively, runtime dependencies detached), then run the
    /// start protocol again. `on_first_start` stays once-per-construction.
    pub async fn restart(&self) -> Result<()> {
        {
            let lc = self.inner.lifecycle.lock().unwrap();
            ensure!(
                lc.state.can_restart(),
                err::InvalidStateSnafu {
                    service: &self.inner.name,
                    operation: "restart",
                    state: lc.state,
                }
            );
        }
        self.reset().await?;
        SERVICE_RESTARTED.with_label_values(&[&self.inner.name]).inc();
        info!(service = %self.inner.name, "service restarting");
        self.start().await
    }

    fn reset(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            {
                let lc = self.inner.lifecycle.lock().unwrap();
                match lc.state {
                    ServiceState::Init => return Ok(()),
                    ServiceState::Shutdown | ServiceState::Crashed => {}
                    state => {
                        return err::InvalidStateSnafu {
                            service: &self.inner.name,
                            operation: "reset",
                            state,
                        }
                        .fail();
                    }
                }
            }

            let ctx = self.context();
            self.inner.service.on_restart(&ctx).await?;

            {
                let mut lc = self.inner.lifecycle.lock().unwrap();
                *lc = Lifecycle::fresh(&self.inner.name);
            }
            self.inner.crash.lock().unwrap().take();
            self.inner.registry.reset();

            let declared = {
                let mut children = self.inner.children.lock().unwrap();
                children.runtime.clear();
                children.declared.clone()
            };
            for child in declared {
                child.reset().await?;
            }
            debug!(service = %self.inner.name, "lifecycle reset");
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    /// Attach a child before start, equivalent to declaring it.
    pub fn add_dependency(&self, child: ServiceHandle) -> Result<()> {
        {
            let lc = self.inner.lifecycle.lock().unwrap();
            ensure!(
                lc.state == ServiceState::Init,
                err::InvalidStateSnafu {
                    service: &self.inner.name,
                    operation: "add_dependency",
                    state: lc.state,
                }
            );
        }
        child.set_parent(&self.inner);
        self.inner.children.lock().unwrap().declared.push(child);
        Ok(())
    }

    /// Attach and start a child while this service is starting or running.
    ///
    /// The child is started and waited for; it joins the reverse-stop list
    /// ahead of the declared children. Any other state is
    /// [`Error::InvalidState`].
    pub async fn add_runtime_dependency(&self, child: ServiceHandle) -> Result<()> {
        {
            let lc = self.inner.lifecycle.lock().unwrap();
            ensure!(
                lc.state.accepts_dependencies(),
                err::InvalidStateSnafu {
                    service: &self.inner.name,
                    operation: "add_runtime_dependency",
                    state: lc.state,
                }
            );
            child.set_parent(&self.inner);
            self.inner
                .children
                .lock()
                .unwrap()
                .runtime
                .push(child.clone());
        }

        debug!(service = %self.inner.name, child = %child.name(), "starting runtime dependency");
        let started = child.start().await.context(err::DependencyFailureSnafu {
            service: &self.inner.name,
            child: child.name(),
        });
        if started.is_err() {
            let mut children = self.inner.children.lock().unwrap();
            children
                .runtime
                .retain(|c| !Arc::ptr_eq(&c.inner, &child.inner));
        }
        started
    }

    // ------------------------------------------------------------------
    // Activities
    // ------------------------------------------------------------------

    /// Register an activity. Before start it is queued and launched by the
    /// start protocol; while starting or running it is launched
    /// immediately; any other state is [`Error::InvalidState`].
    pub fn add_activity(&self, activity: Activity) -> Result<()> {
        let lc = self.inner.lifecycle.lock().unwrap();
        match lc.state {
            ServiceState::Init => {
                self.inner.pending.lock().unwrap().push(activity);
                Ok(())
            }
            ServiceState::Starting | ServiceState::Running => {
                let handle = self.inner.spawn_handle()?;
                ServiceInner::spawn_activity(&self.inner, &handle, &lc.ctx, activity);
                Ok(())
            }
            state => err::InvalidStateSnafu {
                service: &self.inner.name,
                operation: "add_activity",
                state,
            }
            .fail(),
        }
    }

    /// Schedule a bare awaitable; tracked until completion or cancellation
    /// at stop.
    pub fn add_future<F>(&self, name: impl Into<String>, future: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.add_activity(Activity::future(name, future))
    }

    /// Schedule a looping task body; re-invoked until the service stops.
    pub fn add_task<F, Fut>(&self, name: impl Into<String>, body: F) -> Result<()>
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.add_activity(Activity::task(name, body))
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceInner {
    /// The handle activities and shutdown sequences are spawned on: the
    /// pinned runtime when one was configured, otherwise the ambient one,
    /// acquired lazily.
    fn spawn_handle(&self) -> Result<Handle> {
        if let Some(runtime) = self.config.runtime() {
            return Ok(runtime.handle().clone());
        }
        Handle::try_current().map_err(|_| {
            err::RuntimeUnavailableSnafu {
                service: &self.name,
            }
            .build()
        })
    }

    /// Launch declared plus pre-registered activities. Runs under the
    /// lifecycle lock so a racing stop either sees all of them in the
    /// registry or prevents the launch entirely.
    fn launch_activities(this: &Arc<Self>) -> Result<()> {
        let mut activities = this.service.declare_activities();
        activities.append(&mut this.pending.lock().unwrap());
        let handle = this.spawn_handle()?;

        let lc = this.lifecycle.lock().unwrap();
        ensure!(
            lc.state == ServiceState::Starting,
            err::CancelledSnafu {
                service: &this.name,
                phase: "start",
            }
        );
        for activity in activities {
            Self::spawn_activity(this, &handle, &lc.ctx, activity);
        }
        Ok(())
    }

    fn spawn_activity(
        this: &Arc<Self>,
        handle: &Handle,
        ctx: &ServiceContext,
        activity: Activity,
    ) {
        let (name, kind) = activity.into_parts();
        let cancel = CancellationToken::new();
        let status = Arc::new(Mutex::new(ActivityStatus::default()));
        let future = activity_future(
            Arc::downgrade(this),
            this.name.clone(),
            name.clone(),
            kind,
            ctx.clone(),
            cancel.clone(),
            Arc::clone(&status),
        );
        let join = handle.spawn(future);
        this.registry.insert(name, cancel, status, join);
    }

    /// Record a crash, ensure exactly one halt winds the service down, and
    /// notify the parent according to its crash policy.
    fn report_crash(this: &Arc<Self>, origin: &str, message: String) {
        let need_halt;
        {
            let mut lc = this.lifecycle.lock().unwrap();
            if lc.state.is_terminal() {
                drop(lc);
                warn!(service = %this.name, origin, message, "crash reported after lifecycle ended");
                return;
            }
            let from = lc.state;
            *this.crash.lock().unwrap() = Some(CrashReport {
                origin: origin.to_string(),
                message: message.clone(),
                at: Utc::now(),
            });
            lc.state = ServiceState::Crashed;
            lc.flags.crashed.raise();
            lc.flags.should_stop.raise();
            need_halt = !mem::replace(&mut lc.halt_spawned, true);
            error!(service = %this.name, from = %from, origin, message, "service crashed");
        }
        SERVICE_CRASHED.with_label_values(&[&this.name]).inc();
        SERVICE_RUNNING.with_label_values(&[&this.name]).set(0);

        if need_halt {
            match this.spawn_handle() {
                Ok(handle) => {
                    let inner = Arc::clone(this);
                    handle.spawn(async move { halt(inner, true).await });
                }
                Err(error) => {
                    warn!(service = %this.name, error = %error, "no runtime to wind down crashed service");
                }
            }
        }

        let parent = this.parent.lock().unwrap().as_ref().and_then(Weak::upgrade);
        if let Some(parent) = parent {
            Self::child_crashed(&parent, &this.name, &message);
        }
    }

    fn child_crashed(this: &Arc<Self>, child: &str, message: &str) {
        match this.config.crash_policy() {
            CrashPolicy::Isolate => {
                warn!(service = %this.name, child, message, "child crashed; isolating");
            }
            CrashPolicy::Propagate => {
                Self::report_crash(this, &format!("child:{child}"), message.to_string());
            }
        }
    }
}

/// The shutdown sequence. Runs exactly once per lifecycle, on a detached
/// task: raise `should_stop`, fire `on_stop`, stop children in reverse
/// start order, drain activities (escalating past the deadline), fire
/// `on_shutdown`, then raise the terminal flags. Crash-initiated halts
/// skip the stop hooks.
async fn halt(inner: Arc<ServiceInner>, crashed: bool) {
    let (flags, ctx) = {
        let lc = inner.lifecycle.lock().unwrap();
        (lc.flags.clone(), lc.ctx.clone())
    };
    flags.should_stop.raise();

    let deadline = tokio::time::Instant::now() + inner.config.shutdown_timeout();

    if !crashed
        && let Err(error) = inner.service.on_stop(&ctx).await
    {
        error!(service = %inner.name, error = %error, "on_stop hook failed");
    }

    let (runtime_deps, declared) = {
        let children = inner.children.lock().unwrap();
        (children.runtime.clone(), children.declared.clone())
    };
    for child in runtime_deps.iter().rev().chain(declared.iter().rev()) {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let grace = remaining.min(child.inner.config.shutdown_timeout());
        debug!(service = %inner.name, child = %child.name(), "stopping child");
        match tokio::time::timeout(grace, child.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(service = %inner.name, child = %child.name(), error = %error, "child stop reported error");
            }
            Err(_) => {
                warn!(service = %inner.name, child = %child.name(), "child stop exceeded its grace; continuing");
            }
        }
    }

    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    if crashed {
        // A crashed service does not get a leisurely drain; cancel
        // outright and give bodies the hard grace to unwind.
        let aborted = inner
            .registry
            .cancel_all(&inner.name, inner.config.cancel_grace())
            .await;
        if !aborted.is_empty() {
            error!(service = %inner.name, activities = ?aborted, "activities aborted during crash wind-down");
        }
    } else if let Err(error) = inner
        .registry
        .drain(&inner.name, remaining, inner.config.cancel_grace())
        .await
    {
        error!(service = %inner.name, error = %error, "activity drain escalated");
    }

    if !crashed
        && let Err(error) = inner.service.on_shutdown(&ctx).await
    {
        error!(service = %inner.name, error = %error, "on_shutdown hook failed");
    }

    {
        let mut lc = inner.lifecycle.lock().unwrap();
        if lc.state == ServiceState::Stopping {
            lc.state = ServiceState::Shutdown;
        }
        lc.flags.stopped.raise();
        lc.flags.shutdown.raise();
    }
    SERVICE_STOPPED.with_label_values(&[&inner.name]).inc();
    SERVICE_RUNNING.with_label_values(&[&inner.name]).set(0);
    info!(service = %inner.name, crashed, "service stopped");
}

/// One spawned activity: the drive loop raced against its hard-cancel
/// token. Cancellation during shutdown is normal termination; crashes are
/// reported to the owning service.
fn activity_future(
    weak: Weak<ServiceInner>,
    service: String,
    name: String,
    kind: ActivityKind,
    ctx: ServiceContext,
    cancel: CancellationToken,
    status: Arc<Mutex<ActivityStatus>>,
) -> impl std::future::Future<Output = ()> + Send + 'static {
    async move {
        debug!(service = %service, activity = %name, "activity started");
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(service = %service, activity = %name, "activity cancelled during shutdown");
            }
            outcome = runner::drive(kind, &ctx, &status, &service, &name) => match outcome {
                runner::Outcome::Completed => {
                    debug!(service = %service, activity = %name, "activity finished");
                }
                runner::Outcome::StopService => {
                    if let Some(inner) = weak.upgrade() {
                        info!(service = %service, activity = %name, "activity requested service stop");
                        let handle = ServiceHandle { inner };
                        if let Ok(runtime) = handle.inner.spawn_handle() {
                            runtime.spawn(async move {
                                let _ = handle.stop().await;
                            });
                        }
                    }
                }
                runner::Outcome::Crashed { message } => {
                    if let Some(inner) = weak.upgrade() {
                        ServiceInner::report_crash(&inner, &name, message);
                    }
                }
            },
        }
    }
}

/// Aborts startup when the driving caller is cancelled mid-protocol: the
/// service crashes with a cancellation report and a detached halt stops
/// whatever had already started.
struct StartGuard {
    inner: Option<Arc<ServiceInner>>,
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let need_halt = {
            let mut lc = inner.lifecycle.lock().unwrap();
            if lc.state != ServiceState::Starting {
                return;
            }
            *inner.crash.lock().unwrap() = Some(CrashReport {
                origin: "start".to_string(),
                message: "caller cancelled during start".to_string(),
                at: Utc::now(),
            });
            lc.state = ServiceState::Crashed;
            lc.flags.crashed.raise();
            lc.flags.should_stop.raise();
            !mem::replace(&mut lc.halt_spawned, true)
        };
        warn!(service = %inner.name, "start cancelled by caller; crashing service");
        SERVICE_CRASHED.with_label_values(&[&inner.name]).inc();
        if need_halt && let Ok(handle) = inner.spawn_handle() {
            handle.spawn(async move { halt(inner, true).await });
        }
    }
}
