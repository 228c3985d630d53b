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

use lazy_static::lazy_static;
use prometheus::*;

pub const SERVICE_LABEL: &str = "service";
pub const ACTIVITY_LABEL: &str = "activity";

lazy_static! {
    pub static ref SERVICE_STARTED: IntCounterVec = register_int_counter_vec!(
        "service_started_total",
        "Total number of service starts",
        &[SERVICE_LABEL]
    )
    .unwrap();
    pub static ref SERVICE_STOPPED: IntCounterVec = register_int_counter_vec!(
        "service_stopped_total",
        "Total number of services stopped",
        &[SERVICE_LABEL]
    )
    .unwrap();
    pub static ref SERVICE_CRASHED: IntCounterVec = register_int_counter_vec!(
        "service_crashed_total",
        "Total number of service crashes",
        &[SERVICE_LABEL]
    )
    .unwrap();
    pub static ref SERVICE_RESTARTED: IntCounterVec = register_int_counter_vec!(
        "service_restarted_total",
        "Total number of service restarts",
        &[SERVICE_LABEL]
    )
    .unwrap();
    pub static ref SERVICE_RUNNING: IntGaugeVec = register_int_gauge_vec!(
        "service_running",
        "Whether the service is currently running (1) or not (0)",
        &[SERVICE_LABEL]
    )
    .unwrap();
    pub static ref ACTIVITY_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "activity_executions_total",
        "Total number of activity executions",
        &[SERVICE_LABEL, ACTIVITY_LABEL]
    )
    .unwrap();
    pub static ref ACTIVITY_EXECUTION_ERRORS: IntCounterVec = register_int_counter_vec!(
        "activity_execution_errors_total",
        "Total number of activity execution errors",
        &[SERVICE_LABEL, ACTIVITY_LABEL]
    )
    .unwrap();
    pub static ref ACTIVITY_EXECUTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "activity_execution_duration_seconds",
        "Activity execution duration in seconds",
        &[SERVICE_LABEL, ACTIVITY_LABEL]
    )
    .unwrap();
    pub static ref TIMER_MISSED_FIRES: IntCounterVec = register_int_counter_vec!(
        "timer_missed_fires_total",
        "Total number of timer fires skipped because the handler overran",
        &[SERVICE_LABEL, ACTIVITY_LABEL]
    )
    .unwrap();
    pub static ref DRAIN_TIMEOUTS: IntCounterVec = register_int_counter_vec!(
        "drain_timeouts_total",
        "Total number of shutdowns that escalated past the drain deadline",
        &[SERVICE_LABEL]
    )
    .unwrap();
}
