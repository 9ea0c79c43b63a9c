// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [stagerun](https://crates.io/crates/stagerun), a pipelined test runner
//! for slow target environments.
//!
//! Building and installing a test for a virtual machine or a device is usually much slower than
//! running it. stagerun builds tests in parallel while already-installed tests run one at a time,
//! and judges every result against a set of hierarchical expectations.
//!
//! The library is split into:
//! * [`discovery`]: turning input files into a [`TestCorpus`](discovery::TestCorpus).
//! * [`expectations`]: resolving the expected result for each test.
//! * [`backend`]: the target environment, behind [`ExecutionBackend`](backend::ExecutionBackend).
//! * [`runner`]: the pipeline itself.
//! * [`reporter`]: logging results and writing JUnit reports.

pub mod backend;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod expectations;
pub mod reporter;
pub mod runner;
mod stopwatch;
pub mod test_run;
