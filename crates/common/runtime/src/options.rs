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

use bon::Builder;
use smart_default::SmartDefault;

/// Options for a dedicated event loop backing one service tree.
///
/// Trees schedule cooperatively on a single loop, so the default is a
/// single-threaded runtime driven from the host's joining thread. Worker
/// threads are opt-in, for hosts whose activity bodies do genuinely
/// parallel work. Loop threads are named `<tree>-loop-<n>` so a host
/// embedding several trees can tell them apart in stack dumps and
/// metrics.
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(finish_fn = build)]
pub struct LoopOptions {
    /// Name of the tree this loop drives; used to label its threads.
    #[default("tree".to_string())]
    #[builder(default = "tree".to_string(), into)]
    pub tree: String,

    /// Worker threads for the loop. `None` builds a single-threaded
    /// runtime.
    #[default(None)]
    pub worker_threads: Option<usize>,
}

impl LoopOptions {
    /// Options for the loop of the tree rooted at `tree`.
    #[must_use]
    pub fn for_tree(tree: impl Into<String>) -> Self {
        LoopOptions {
            tree: tree.into(),
            worker_threads: None,
        }
    }
}
