// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RunReport, RunStats};
use crate::{
    errors::RunError,
    reporter::{ReportSink, log_result},
    test_run::TestRun,
};
use tracing::info;

/// State owned by the drain loop for the duration of a run.
pub(super) struct RunContext<'a> {
    stats: RunStats,
    runs: Vec<TestRun>,
    verbose: bool,
    sink: Option<&'a dyn ReportSink>,
}

impl<'a> RunContext<'a> {
    pub(super) fn new(
        initial_run_count: usize,
        verbose: bool,
        sink: Option<&'a dyn ReportSink>,
    ) -> Self {
        Self {
            stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            runs: Vec::with_capacity(initial_run_count),
            verbose,
            sink,
        }
    }

    pub(super) fn initial_run_count(&self) -> usize {
        self.stats.initial_run_count
    }

    /// Records a test that was skipped as unsupported.
    pub(super) fn test_skipped(&mut self, test_run: TestRun) -> &TestRun {
        self.stats.final_run_count += 1;
        self.stats.unsupported += 1;
        self.push(test_run)
    }

    /// Judges, logs and records a test that has a result.
    pub(super) fn test_finished(&mut self, test_run: TestRun) -> &TestRun {
        self.stats.final_run_count += 1;
        if test_run.is_expected_result() {
            self.stats.passed += 1;
        } else {
            self.stats.failed += 1;
        }
        log_result(&test_run, self.verbose);
        self.push(test_run)
    }

    fn push(&mut self, test_run: TestRun) -> &TestRun {
        self.runs.push(test_run);
        &self.runs[self.runs.len() - 1]
    }

    /// Logs the summary and hands the results to the report sink, if any.
    pub(super) fn finish(self) -> Result<RunReport, RunError> {
        if self.stats.unsupported > 0 {
            info!("Skipped {} unsupported tests.", self.stats.unsupported);
        }

        let reports_written = match self.sink {
            Some(sink) => {
                info!("Writing reports...");
                let count = sink.write_reports(&self.runs).map_err(RunError::Report)?;
                info!("{count} report files written.");
                Some(count)
            }
            None => None,
        };

        Ok(RunReport {
            runs: self.runs,
            stats: self.stats,
            reports_written,
        })
    }
}
