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

use std::sync::atomic::{AtomicUsize, Ordering};

use snafu::ResultExt;
use tokio::runtime::{Builder as TokioBuilder, Runtime};

use crate::{
    error::{self, Result},
    options::LoopOptions,
};

impl LoopOptions {
    /// Build the tree's event loop with time and IO drivers enabled.
    ///
    /// Single-threaded unless worker threads were requested; a service
    /// tree mutates its shared state only from its own loop, so one
    /// thread is the correct default. A single-threaded loop makes
    /// progress only while the host is blocked on it.
    pub fn create(self) -> Result<Runtime> {
        let mut builder = match self.worker_threads {
            None => TokioBuilder::new_current_thread(),
            Some(threads) => {
                let mut builder = TokioBuilder::new_multi_thread();
                builder.worker_threads(threads.max(1));
                builder
            }
        };
        builder.enable_all();

        // Threads carry the tree's name, one counter per loop.
        let prefix = format!("{}-loop", self.tree);
        let counter = AtomicUsize::new(0);
        builder.thread_name_fn(move || {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}-{idx}")
        });

        builder.build().context(error::BuildSnafu { tree: self.tree })
    }
}
