// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `stagerun` failures.
///
/// `stagerun` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum StagerunExitCode {}

impl StagerunExitCode {
    /// No errors occurred and stagerun exited normally.
    pub const OK: i32 = 0;

    /// No tests were discovered in the input files, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// One or more tests did not produce their expected result.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The build phase stopped handing over tests before every test had been drained.
    ///
    /// This is the one systemic failure of a run: the build workers are wedged, so the run is
    /// aborted rather than waiting forever.
    pub const BUILD_STALLED: i32 = 101;

    /// The execution backend's one-time preparation step failed.
    pub const PREPARE_FAILED: i32 = 102;

    /// Writing report files produced an error.
    pub const REPORT_FAILED: i32 = 110;

    /// A user issue happened while setting up a stagerun invocation: bad configuration, an
    /// unknown profile, an unreadable expectations file and so on.
    pub const SETUP_ERROR: i32 = 96;
}
