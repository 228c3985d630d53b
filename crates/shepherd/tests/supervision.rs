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

//! Supervision-tree behavior: ordered children, crash propagation, runtime
//! dependencies, and the embedding surface.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use shepherd::{
    Activity, CrashPolicy, Service, ServiceConfig, ServiceContext, ServiceHandle, ServiceState,
    run_scoped, start_system, start_system_dedicated,
};

type Events = Arc<Mutex<Vec<String>>>;

/// A leaf that records its start/stop order under a fixed name.
struct Named {
    name: String,
    events: Events,
}

impl Named {
    fn handle(name: &str, events: &Events) -> ServiceHandle {
        ServiceHandle::new(Named {
            name: name.to_string(),
            events: events.clone(),
        })
    }
}

#[async_trait]
impl Service for Named {
    fn name(&self) -> &str { &self.name }

    async fn on_started(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push(format!("start:{}", self.name));
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push(format!("stop:{}", self.name));
        Ok(())
    }
}

struct Parent {
    name: String,
    events: Events,
    children: Mutex<Vec<ServiceHandle>>,
}

impl Parent {
    fn handle(name: &str, events: &Events, children: Vec<ServiceHandle>) -> ServiceHandle {
        ServiceHandle::new(Parent {
            name: name.to_string(),
            events: events.clone(),
            children: Mutex::new(children),
        })
    }

    fn handle_with_config(
        name: &str,
        events: &Events,
        children: Vec<ServiceHandle>,
        config: ServiceConfig,
    ) -> ServiceHandle {
        ServiceHandle::with_config(
            Parent {
                name: name.to_string(),
                events: events.clone(),
                children: Mutex::new(children),
            },
            config,
        )
    }
}

#[async_trait]
impl Service for Parent {
    fn name(&self) -> &str { &self.name }

    fn declare_children(&self) -> Vec<ServiceHandle> {
        self.children.lock().unwrap().drain(..).collect()
    }

    async fn on_started(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push(format!("start:{}", self.name));
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push(format!("stop:{}", self.name));
        Ok(())
    }
}

/// A child whose on_start always fails.
struct FailsToStart;

#[async_trait]
impl Service for FailsToStart {
    fn name(&self) -> &str { "b" }

    async fn on_start(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        snafu::whatever!("b exploded")
    }
}

/// A service whose background task crashes shortly after start, at most
/// once per construction.
struct CrashesLater {
    armed: Arc<AtomicBool>,
}

impl Service for CrashesLater {
    fn name(&self) -> &str { "crasher" }

    fn declare_activities(&self) -> Vec<Activity> {
        let armed = self.armed.clone();
        vec![Activity::task("bomb", move |ctx: ServiceContext| {
            let armed = armed.clone();
            async move {
                ctx.sleep(Duration::from_millis(30)).await;
                if armed.swap(false, Ordering::SeqCst) {
                    snafu::whatever!("boom");
                }
                ctx.stopping().await;
                Ok(())
            }
        })]
    }
}

#[tokio::test]
async fn children_start_in_order_and_stop_in_reverse() {
    let events: Events = Arc::default();
    let a = Named::handle("a", &events);
    let b = Named::handle("b", &events);
    let c = Named::handle("c", &events);
    let parent = Parent::handle("parent", &events, vec![a.clone(), b.clone(), c.clone()]);

    parent.start().await.unwrap();
    parent.wait_until_started().await;
    assert!(a.is_running() && b.is_running() && c.is_running());

    parent.stop().await.unwrap();
    assert_eq!(a.state(), ServiceState::Shutdown);
    assert_eq!(b.state(), ServiceState::Shutdown);
    assert_eq!(c.state(), ServiceState::Shutdown);

    let recorded = events.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec![
            "start:a",
            "start:b",
            "start:c",
            "start:parent",
            "stop:parent",
            "stop:c",
            "stop:b",
            "stop:a"
        ]
    );
}

#[tokio::test]
async fn child_crash_during_start_aborts_the_parent() {
    let events: Events = Arc::default();
    let a = Named::handle("a", &events);
    let b = ServiceHandle::new(FailsToStart);
    let c = Named::handle("c", &events);
    let parent = Parent::handle("parent", &events, vec![a.clone(), b.clone(), c.clone()]);

    let err = parent.start().await.unwrap_err();
    assert!(
        matches!(err, shepherd::Error::DependencyFailure { .. }),
        "got: {err}"
    );
    assert!(err.to_string().contains("b exploded"));

    assert_eq!(parent.state(), ServiceState::Crashed);
    assert!(parent.exception().is_some());
    assert_eq!(b.state(), ServiceState::Crashed);
    // A was started and must be wound down; C was never reached.
    assert_eq!(a.state(), ServiceState::Shutdown);
    assert_eq!(c.state(), ServiceState::Init);
}

#[tokio::test]
async fn child_crash_propagates_to_a_running_parent() {
    let events: Events = Arc::default();
    let child = ServiceHandle::new(CrashesLater {
        armed: Arc::new(AtomicBool::new(true)),
    });
    let parent = Parent::handle("parent", &events, vec![child.clone()]);

    parent.start().await.unwrap();
    assert!(parent.is_running());

    tokio::time::timeout(Duration::from_secs(1), parent.wait_until_crashed())
        .await
        .expect("crash should propagate");

    assert_eq!(child.state(), ServiceState::Crashed);
    assert_eq!(parent.state(), ServiceState::Crashed);
    let report = parent.exception().expect("parent carries the report");
    assert!(report.origin.contains("crasher"), "origin: {}", report.origin);

    // Both wind down on their own.
    tokio::time::timeout(Duration::from_secs(1), parent.wait_until_stopped())
        .await
        .expect("crashed parent should wind down");
}

#[tokio::test]
async fn isolating_parent_survives_child_crash() {
    let events: Events = Arc::default();
    let child = ServiceHandle::new(CrashesLater {
        armed: Arc::new(AtomicBool::new(true)),
    });
    let config = ServiceConfig::builder()
        .crash_policy(CrashPolicy::Isolate)
        .build();
    let parent = Parent::handle_with_config("parent", &events, vec![child.clone()], config);

    parent.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), child.wait_until_crashed())
        .await
        .expect("child should crash");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(parent.state(), ServiceState::Running, "parent isolated");

    parent.stop().await.unwrap();
    assert_eq!(parent.state(), ServiceState::Shutdown);
}

#[tokio::test]
async fn runtime_dependency_joins_the_tree() {
    let events: Events = Arc::default();
    let parent = Parent::handle("parent", &events, Vec::new());
    parent.start().await.unwrap();

    let late = Named::handle("late", &events);
    parent.add_runtime_dependency(late.clone()).await.unwrap();
    assert!(late.is_running());
    assert!(
        parent.children().iter().any(|c| c.id() == late.id()),
        "late child visible in the supervision list"
    );

    parent.stop().await.unwrap();
    assert_eq!(late.state(), ServiceState::Shutdown);
}

#[tokio::test]
async fn runtime_dependency_rejected_once_stopping() {
    let events: Events = Arc::default();
    let parent = Parent::handle("parent", &events, Vec::new());
    parent.start().await.unwrap();
    parent.stop().await.unwrap();

    let late = Named::handle("late", &events);
    let err = parent.add_runtime_dependency(late.clone()).await.unwrap_err();
    assert!(matches!(err, shepherd::Error::InvalidState { .. }));
    assert_eq!(late.state(), ServiceState::Init, "child untouched");
}

#[tokio::test]
async fn restart_after_crash_recovers_the_tree() {
    let events: Events = Arc::default();
    let child = ServiceHandle::new(CrashesLater {
        armed: Arc::new(AtomicBool::new(true)),
    });
    let parent = Parent::handle("parent", &events, vec![child.clone()]);

    parent.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), parent.wait_until_crashed())
        .await
        .expect("crash should propagate");
    tokio::time::timeout(Duration::from_secs(1), parent.wait_until_stopped())
        .await
        .expect("crashed tree should wind down");

    // The bomb is disarmed after its first detonation, so the restarted
    // tree stays up.
    parent.restart().await.unwrap();
    assert_eq!(parent.state(), ServiceState::Running);
    assert_eq!(child.state(), ServiceState::Running);
    assert!(parent.exception().is_none(), "crash report cleared");

    parent.stop().await.unwrap();
}

#[tokio::test]
async fn embedded_host_keeps_its_event_loop() {
    let events: Events = Arc::default();
    let parent = Parent::handle("parent", &events, Vec::new());

    let system = start_system(parent.clone()).await.unwrap();
    assert!(system.is_running());

    let stopper = parent.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stopper.stop().await.unwrap();
    });

    tokio::time::timeout(Duration::from_secs(1), system.join())
        .await
        .expect("join should complete once stopped");
    assert_eq!(parent.state(), ServiceState::Shutdown);

    // The host loop remains usable for further work.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[test]
fn dedicated_loop_drives_a_tree_without_an_ambient_runtime() {
    let events: Events = Arc::default();
    let leaf = Named::handle("leaf", &events);
    let parent = Parent::handle("dedicated", &events, vec![leaf.clone()]);

    let system = start_system_dedicated(parent.clone()).unwrap();
    assert!(system.is_running());
    assert!(leaf.is_running());

    system.stop().unwrap();
    assert_eq!(parent.state(), ServiceState::Shutdown);
    assert_eq!(leaf.state(), ServiceState::Shutdown);

    let recorded = events.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec!["start:leaf", "start:dedicated", "stop:dedicated", "stop:leaf"]
    );
}

#[tokio::test]
async fn run_scoped_stops_on_the_normal_path() {
    let events: Events = Arc::default();
    let parent = Parent::handle("parent", &events, Vec::new());

    let out = run_scoped(&parent, async { 42 }).await.unwrap();
    assert_eq!(out, 42);
    assert_eq!(parent.state(), ServiceState::Shutdown);
}

#[tokio::test]
async fn sleep_on_the_handle_wakes_at_stop() {
    let events: Events = Arc::default();
    let parent = Parent::handle("parent", &events, Vec::new());
    parent.start().await.unwrap();

    let sleeper = parent.clone();
    let slept = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(30)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    parent.stop().await.unwrap();

    let wakeup = tokio::time::timeout(Duration::from_secs(1), slept)
        .await
        .expect("sleep should wake at stop")
        .unwrap();
    assert!(!wakeup.timer_expired(), "woke via the stop signal");
}
