// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The pipeline driver.
//!
//! Tests are built and installed in parallel on a thread pool, handed over through a bounded
//! queue, and executed one at a time on the calling thread. The main structure in this module is
//! [`PipelineRunner`].

mod context;
mod imp;

pub use imp::*;
