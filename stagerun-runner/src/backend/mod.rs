// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution backends: the environment tests are built for and run in.
//!
//! The pipeline only talks to the target environment through [`ExecutionBackend`]. The library
//! ships [`CommandBackend`], which drives each phase through configurable external commands.

mod command;

pub use command::*;

use crate::{errors::BackendError, test_run::TestRun};

/// The operations the pipeline needs from a target environment.
///
/// Backends are shared between the build workers and the drain loop, so every method takes
/// `&self`. Per-test state lives on the [`TestRun`] or behind the backend's own synchronization.
pub trait ExecutionBackend: Send + Sync {
    /// Performs one-time global setup, such as waiting for a device to come up.
    ///
    /// Called once per run, after builds have started and before any test executes. An error
    /// here aborts the run.
    fn prepare(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Builds the test and installs it into the target environment.
    ///
    /// A build failure that belongs to the test (e.g. a compile error) should be recorded on the
    /// test run with [`TestRun::set_result`]. An `Err` is recorded as an `ERROR` result.
    fn build_and_install(&self, test_run: &mut TestRun) -> Result<(), BackendError>;

    /// Runs a test that built successfully and records its outcome.
    ///
    /// Returning without recording an outcome is treated as an error.
    fn run_test(&self, test_run: &mut TestRun) -> Result<(), BackendError>;

    /// Releases anything the backend holds for this test.
    ///
    /// Called exactly once per test, whatever its outcome. Must not fail: problems should be
    /// logged and swallowed.
    fn cleanup(&self, test_run: &TestRun);
}
