// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A pipelined test runner for slow target environments.
//!
//! stagerun builds and installs tests in parallel while the tests that are already installed run
//! one at a time, then judges each result against hierarchical expectations.
//!
//! This crate is the command-line interface. The pipeline lives in
//! [`stagerun-runner`](stagerun_runner).

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
