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

//! Event-loop factories for shepherd service trees.
//!
//! A tree never pins itself to a runtime; it spawns onto whatever handle
//! is ambient at first use. Hosts that have no runtime of their own build
//! a dedicated loop here, one per embedded tree, with threads named after
//! the tree. Nothing in this crate is process-global: a host embedding
//! several trees builds several loops.

mod error;
mod factory;
mod options;

pub use error::{Error, Result};
pub use options::LoopOptions;
pub use tokio::runtime::Runtime;
