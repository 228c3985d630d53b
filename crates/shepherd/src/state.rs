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

use derive_more::Display;

/// Lifecycle state of a service.
///
/// ```text
/// Init -> Starting -> Running -> Stopping -> Shutdown
///             |           |          |
///             v           v          v
///          Crashed     Crashed    Crashed
/// ```
///
/// `restart()` leads from Shutdown or Crashed back to Init. Transitions are
/// monotonic within a single lifecycle; only a restart resets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Default)]
pub enum ServiceState {
    /// Constructed but never started (or reset by a restart).
    #[default]
    Init,

    /// The start protocol is in progress: hooks, children, activities.
    Starting,

    /// Fully started; activities are live.
    Running,

    /// The stop protocol is in progress: children winding down, activities
    /// draining.
    Stopping,

    /// Stopped cleanly. Restartable.
    Shutdown,

    /// A hook or activity raised; the crash report is retained until
    /// restart.
    Crashed,
}

impl ServiceState {
    /// Whether the lifecycle has come to rest.
    #[must_use]
    pub const fn is_terminal(self) -> bool { matches!(self, Self::Shutdown | Self::Crashed) }

    /// Whether runtime dependencies may be attached in this state.
    #[must_use]
    pub const fn accepts_dependencies(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Whether `restart()` is legal from this state.
    #[must_use]
    pub const fn can_restart(self) -> bool { self.is_terminal() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_init() {
        assert_eq!(ServiceState::default(), ServiceState::Init);
    }

    #[test]
    fn terminal_states() {
        assert!(ServiceState::Shutdown.is_terminal());
        assert!(ServiceState::Crashed.is_terminal());
        assert!(!ServiceState::Init.is_terminal());
        assert!(!ServiceState::Running.is_terminal());
        assert!(!ServiceState::Stopping.is_terminal());
    }

    #[test]
    fn dependency_window() {
        assert!(ServiceState::Starting.accepts_dependencies());
        assert!(ServiceState::Running.accepts_dependencies());
        assert!(!ServiceState::Init.accepts_dependencies());
        assert!(!ServiceState::Stopping.accepts_dependencies());
        assert!(!ServiceState::Crashed.accepts_dependencies());
    }

    #[test]
    fn restart_window() {
        assert!(ServiceState::Shutdown.can_restart());
        assert!(ServiceState::Crashed.can_restart());
        assert!(!ServiceState::Running.can_restart());
    }

    #[test]
    fn displays_variant_name() {
        assert_eq!(ServiceState::Running.to_string(), "Running");
        assert_eq!(ServiceState::Shutdown.to_string(), "Shutdown");
    }
}
