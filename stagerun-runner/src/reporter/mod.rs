// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logging and reporting of test results.
//!
//! Every result is logged as it is judged. Once the run is over, the full ordered list of test
//! runs can be handed to a [`ReportSink`].

mod junit;

pub use junit::*;

use crate::{errors::ReportError, test_run::TestRun};
use itertools::Itertools;
use tracing::{debug, info};

/// Consumes the ordered results of a run, once, at the end of the run.
pub trait ReportSink {
    /// Writes reports for `runs` and returns the number of report files written.
    fn write_reports(&self, runs: &[TestRun]) -> Result<usize, ReportError>;
}

/// Logs the judged result of a test.
///
/// Passing tests are logged as `OK <name> (<RESULT>)`. Their output is only shown at `info` level
/// if `verbose` is set. Failing tests are logged as `FAIL <name> (<RESULT>)` along with their
/// description and output.
pub fn log_result(test_run: &TestRun, verbose: bool) {
    let Some(outcome) = test_run.outcome() else {
        return;
    };

    if test_run.is_expected_result() {
        info!("OK {} ({})", test_run.qualified_name(), outcome.result);
        if !outcome.output.is_empty() {
            if verbose {
                info!("{}", indented(&outcome.output));
            } else {
                debug!("{}", indented(&outcome.output));
            }
        }
    } else {
        info!("FAIL {} ({})", test_run.qualified_name(), outcome.result);
        if let Some(description) = test_run.description() {
            info!("  \"{description}\"");
        }
        if !outcome.output.is_empty() {
            info!("{}", indented(&outcome.output));
        }
    }
}

fn indented(lines: &[String]) -> String {
    lines.iter().map(|line| format!("  {line}")).join("\n")
}
