// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for stagerun.
//!
//! Configuration is read from `.config/stagerun.toml` under the project root, layered on top of
//! the defaults embedded in the binary. Settings are grouped into profiles. Custom profiles fall
//! back to the `default` profile for anything they don't set.

mod build_threads;
mod drain_order;
mod imp;

pub use build_threads::*;
pub use drain_order::*;
pub use imp::*;
