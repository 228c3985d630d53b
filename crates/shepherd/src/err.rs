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

use snafu::Snafu;

use crate::state::ServiceState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the supervision framework.
///
/// Hook and activity bodies may also raise free-form errors through the
/// `Whatever` variant, using `snafu::whatever!` or `.whatever_context(..)`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The operation is not allowed in the service's current state.
    #[snafu(display("{service}: {operation} not allowed while {state}"))]
    InvalidState {
        service: String,
        operation: &'static str,
        state: ServiceState,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// Malformed input, e.g. a non-positive timer period.
    #[snafu(display("{message}"))]
    InvalidArgument {
        message: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// A cron expression could not be parsed.
    ///
    /// Expects the standard 5-field format: minute hour day month weekday.
    #[snafu(display("failed to parse cron expression {expr:?}: {source}"))]
    InvalidCron {
        expr: String,
        source: croner::errors::CronError,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// A declared or runtime child failed to start; carries the child's
    /// underlying error.
    #[snafu(display("{service}: dependency {child} failed to start: {source}"))]
    DependencyFailure {
        service: String,
        child: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// A background activity raised or panicked.
    #[snafu(display("{service}: activity {activity} crashed: {message}"))]
    ActivityCrash {
        service: String,
        activity: String,
        message: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// The caller was cancelled while driving a lifecycle transition.
    #[snafu(display("{service}: cancelled during {phase}"))]
    Cancelled {
        service: String,
        phase: &'static str,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// Shutdown exceeded its deadline; the listed activities had to be
    /// force-cancelled.
    #[snafu(display("{service}: shutdown deadline exceeded; force-cancelled {activities:?}"))]
    DrainTimeout {
        service: String,
        activities: Vec<String>,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// No tokio runtime is available to drive the service.
    #[snafu(display("{service}: no tokio runtime available"))]
    RuntimeUnavailable {
        service: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// Free-form error raised by user hooks and activity bodies.
    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}
