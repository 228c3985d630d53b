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

//! Panic hook with structured logging.

use std::{panic, sync::LazyLock, thread};

use backtrace::Backtrace;
use prometheus::{IntCounter, register_int_counter};

/// Total panics routed through the hook.
pub static PANICS: LazyLock<IntCounter> =
    LazyLock::new(|| register_int_counter!("panics_total", "Total number of panics").unwrap());

/// Route panics through structured logging before the default handler.
///
/// Panics inside service activity bodies are already caught by their
/// supervising runners and turned into crash reports; this hook covers
/// everything else. The originating thread is logged, so on a host that
/// runs dedicated per-tree loops the panic is attributable to a tree by
/// its thread name.
pub fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let current = thread::current();
        let thread = current.name().unwrap_or("unnamed");
        let backtrace = format!("{:?}", Backtrace::new());
        match info.location() {
            Some(location) => {
                tracing::error!(
                    message = %info,
                    thread,
                    backtrace = %backtrace,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                    "panic"
                );
            }
            None => {
                tracing::error!(message = %info, thread, backtrace = %backtrace, "panic");
            }
        }
        PANICS.inc();
        default_hook(info);
    }));
}
