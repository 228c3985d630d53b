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

//! Single-service lifecycle behavior: hook ordering, idempotence, timers,
//! cooperative stop, restart, and drain escalation.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use shepherd::{
    Activity, IntervalSpec, Service, ServiceConfig, ServiceContext, ServiceHandle, ServiceState,
};

type Events = Arc<Mutex<Vec<&'static str>>>;

struct Recorder {
    events: Events,
}

#[async_trait]
impl Service for Recorder {
    async fn on_first_start(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push("on_first_start");
        Ok(())
    }

    async fn on_start(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push("on_start");
        Ok(())
    }

    async fn on_started(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push("on_started");
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push("on_stop");
        Ok(())
    }

    async fn on_shutdown(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push("on_shutdown");
        Ok(())
    }

    async fn on_restart(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
        self.events.lock().unwrap().push("on_restart");
        Ok(())
    }
}

#[tokio::test]
async fn simple_lifecycle_runs_hooks_in_order() {
    let events: Events = Arc::default();
    let handle = ServiceHandle::new(Recorder {
        events: events.clone(),
    });

    assert_eq!(handle.state(), ServiceState::Init);

    handle.start().await.unwrap();
    assert_eq!(handle.state(), ServiceState::Running);
    assert!(handle.is_running());

    handle.stop().await.unwrap();
    assert_eq!(handle.state(), ServiceState::Shutdown);

    let events = events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "on_first_start",
            "on_start",
            "on_started",
            "on_stop",
            "on_shutdown"
        ]
    );
}

#[tokio::test]
async fn started_raises_before_stopped() {
    let handle = ServiceHandle::new(Recorder {
        events: Arc::default(),
    });

    handle.start().await.unwrap();
    handle.wait_until_started().await;
    assert!(handle.is_running());

    handle.stop().await.unwrap();
    handle.wait_until_stopped().await;
    assert_eq!(handle.state(), ServiceState::Shutdown);
}

#[tokio::test]
async fn start_is_idempotent_across_concurrent_callers() {
    struct SlowStart {
        starts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Service for SlowStart {
        async fn on_start(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    let starts = Arc::new(AtomicU32::new(0));
    let handle = ServiceHandle::new(SlowStart {
        starts: starts.clone(),
    });

    let mut callers = Vec::new();
    for _ in 0..5 {
        let handle = handle.clone();
        callers.push(tokio::spawn(async move { handle.start().await }));
    }
    for caller in callers {
        caller.await.unwrap().unwrap();
    }

    assert_eq!(starts.load(Ordering::SeqCst), 1, "on_start must run once");
    assert_eq!(handle.state(), ServiceState::Running);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn stop_is_idempotent_across_concurrent_callers() {
    struct SlowStop {
        stops: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Service for SlowStop {
        async fn on_stop(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    let stops = Arc::new(AtomicU32::new(0));
    let handle = ServiceHandle::new(SlowStop {
        stops: stops.clone(),
    });
    handle.start().await.unwrap();

    let mut callers = Vec::new();
    for _ in 0..5 {
        let handle = handle.clone();
        callers.push(tokio::spawn(async move { handle.stop().await }));
    }
    for caller in callers {
        caller.await.unwrap().unwrap();
    }

    assert_eq!(stops.load(Ordering::SeqCst), 1, "on_stop must run once");
    assert_eq!(handle.state(), ServiceState::Shutdown);
}

#[tokio::test]
async fn stop_before_start_raises_stopped() {
    let handle = ServiceHandle::new(Recorder {
        events: Arc::default(),
    });

    handle.stop().await.unwrap();
    assert_eq!(handle.state(), ServiceState::Init);
    // Must not hang.
    tokio::time::timeout(Duration::from_millis(100), handle.wait_until_stopped())
        .await
        .expect("stopped flag should be raised");
}

#[tokio::test]
async fn background_loop_respects_stop() {
    struct Counter {
        count: Arc<AtomicU32>,
    }

    impl Service for Counter {
        fn declare_activities(&self) -> Vec<Activity> {
            let count = self.count.clone();
            vec![Activity::task("count", move |ctx: ServiceContext| {
                let count = count.clone();
                async move {
                    if ctx.sleep(Duration::from_millis(100)).await.timer_expired() {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                }
            })]
        }
    }

    let count = Arc::new(AtomicU32::new(0));
    let handle = ServiceHandle::new(Counter {
        count: count.clone(),
    });

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    let requested = Instant::now();
    handle.stop().await.unwrap();
    assert!(
        requested.elapsed() < Duration::from_millis(500),
        "stop should return promptly, took {:?}",
        requested.elapsed()
    );

    let final_count = count.load(Ordering::SeqCst);
    assert!(
        (2..=5).contains(&final_count),
        "expected 3-ish increments, got {final_count}"
    );
    assert_eq!(
        count.load(Ordering::SeqCst),
        final_count,
        "no increments after stop returned"
    );
}

#[tokio::test]
async fn eager_interval_fires_immediately_lazy_waits() {
    struct Timers {
        eager: Arc<AtomicU32>,
        lazy: Arc<AtomicU32>,
    }

    impl Service for Timers {
        fn declare_activities(&self) -> Vec<Activity> {
            let eager = self.eager.clone();
            let lazy = self.lazy.clone();
            let spec = IntervalSpec::new(Duration::from_millis(100)).unwrap();
            vec![
                Activity::interval("eager", spec.eager(), move |_ctx| {
                    let eager = eager.clone();
                    async move {
                        eager.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                Activity::interval("lazy", spec, move |_ctx| {
                    let lazy = lazy.clone();
                    async move {
                        lazy.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            ]
        }
    }

    let eager = Arc::new(AtomicU32::new(0));
    let lazy = Arc::new(AtomicU32::new(0));
    let handle = ServiceHandle::new(Timers {
        eager: eager.clone(),
        lazy: lazy.clone(),
    });

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(eager.load(Ordering::SeqCst), 1, "eager fires at t=0");
    assert_eq!(lazy.load(Ordering::SeqCst), 0, "lazy waits one period");

    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.stop().await.unwrap();

    let eager_fires = eager.load(Ordering::SeqCst);
    let lazy_fires = lazy.load(Ordering::SeqCst);
    assert!(
        eager_fires > lazy_fires,
        "eager ({eager_fires}) should stay one fire ahead of lazy ({lazy_fires})"
    );

    let statuses = handle.activities();
    assert!(statuses.is_empty(), "registry drained after stop");
}

#[tokio::test]
async fn timer_status_records_fires() {
    struct Tick;

    impl Service for Tick {
        fn declare_activities(&self) -> Vec<Activity> {
            let spec = IntervalSpec::new(Duration::from_millis(50)).unwrap();
            vec![Activity::interval("tick", spec.eager(), |_ctx| async {
                Ok(())
            })]
        }
    }

    let handle = ServiceHandle::new(Tick);
    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let statuses = handle.activities();
    let (name, status) = &statuses[0];
    assert_eq!(name, "tick");
    assert!(status.fires >= 1, "expected at least one fire");
    assert!(status.ran_at.is_some(), "ran_at set on fire");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn dynamic_task_added_while_running() {
    let handle = ServiceHandle::new(Recorder {
        events: Arc::default(),
    });
    handle.start().await.unwrap();

    let count = Arc::new(AtomicU32::new(0));
    let task_count = count.clone();
    handle
        .add_task("dynamic", move |ctx: ServiceContext| {
            let count = task_count.clone();
            async move {
                if ctx.sleep(Duration::from_millis(20)).await.timer_expired() {
                    count.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(count.load(Ordering::SeqCst) >= 1, "dynamic task should run");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn add_activity_rejected_after_shutdown() {
    let handle = ServiceHandle::new(Recorder {
        events: Arc::default(),
    });
    handle.start().await.unwrap();
    handle.stop().await.unwrap();

    let err = handle
        .add_activity(Activity::future("late", async { Ok(()) }))
        .unwrap_err();
    assert!(matches!(err, shepherd::Error::InvalidState { .. }));
}

#[tokio::test]
async fn restart_after_shutdown_reruns_start_hooks() {
    let events: Events = Arc::default();
    let handle = ServiceHandle::new(Recorder {
        events: events.clone(),
    });

    handle.start().await.unwrap();
    handle.stop().await.unwrap();
    handle.restart().await.unwrap();
    assert_eq!(handle.state(), ServiceState::Running);

    let recorded = events.lock().unwrap().clone();
    let count = |name| recorded.iter().filter(|e| **e == name).count();
    assert_eq!(count("on_first_start"), 1, "only on the first start");
    assert_eq!(count("on_restart"), 1);
    assert_eq!(count("on_start"), 2);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn restart_rejected_while_running() {
    let handle = ServiceHandle::new(Recorder {
        events: Arc::default(),
    });
    handle.start().await.unwrap();

    let err = handle.restart().await.unwrap_err();
    assert!(matches!(err, shepherd::Error::InvalidState { .. }));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn unresponsive_activity_is_escalated_at_the_deadline() {
    struct Stubborn;

    impl Service for Stubborn {
        fn declare_activities(&self) -> Vec<Activity> {
            // Ignores the stop flag entirely.
            vec![Activity::future("stuck", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })]
        }
    }

    let config = ServiceConfig::builder()
        .shutdown_timeout(Duration::from_millis(100))
        .cancel_grace(Duration::from_millis(50))
        .build();
    let handle = ServiceHandle::with_config(Stubborn, config);

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let requested = Instant::now();
    handle.stop().await.unwrap();
    assert!(
        requested.elapsed() < Duration::from_secs(2),
        "escalation should not wait for the stuck activity"
    );
    assert_eq!(handle.state(), ServiceState::Shutdown);
}

#[tokio::test]
async fn hook_failure_during_start_crashes_the_service() {
    struct BadStart;

    #[async_trait]
    impl Service for BadStart {
        async fn on_start(&self, _ctx: &ServiceContext) -> shepherd::Result<()> {
            snafu::whatever!("refusing to start")
        }
    }

    let handle = ServiceHandle::new(BadStart);
    let err = handle.start().await.unwrap_err();
    assert!(err.to_string().contains("refusing to start"));
    assert_eq!(handle.state(), ServiceState::Crashed);
    let report = handle.exception().expect("crash report retained");
    assert!(report.message.contains("refusing to start"));
}
