// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Code to generate JUnit XML reports from finished test runs.

use super::ReportSink;
use crate::{
    errors::ReportError,
    test_run::{TestResult, TestRun},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::fs::File;
use tracing::debug;

/// Writes one JUnit XML file per test class.
///
/// Tests are grouped by [`class_name`](TestRun::class_name), and each group is written to
/// `TEST-<class>.xml` in the output directory.
#[derive(Clone, Debug)]
pub struct JunitReportSink {
    dir: Utf8PathBuf,
}

impl JunitReportSink {
    /// Creates a new sink writing into `dir`. The directory is created if necessary.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the output directory.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn write_suite(&self, class_name: &str, suite: TestSuite) -> Result<(), ReportError> {
        let mut report = Report::new(class_name);
        report.add_test_suite(suite);

        let junit_path = self.dir.join(format!("TEST-{}.xml", file_stem(class_name)));
        debug!("writing JUnit report to {junit_path}");
        let f = File::create(&junit_path).map_err(|error| ReportError::Fs {
            path: junit_path.clone(),
            error,
        })?;
        report.serialize(f).map_err(|error| ReportError::Junit {
            file: junit_path,
            error,
        })
    }
}

impl ReportSink for JunitReportSink {
    fn write_reports(&self, runs: &[TestRun]) -> Result<usize, ReportError> {
        let mut suites: IndexMap<&str, TestSuite> = IndexMap::new();
        for test_run in runs {
            suites
                .entry(test_run.class_name())
                .or_insert_with(|| TestSuite::new(test_run.class_name()))
                .add_test_case(test_case(test_run));
        }

        std::fs::create_dir_all(&self.dir).map_err(|error| ReportError::Fs {
            path: self.dir.clone(),
            error,
        })?;

        let count = suites.len();
        for (class_name, suite) in suites {
            self.write_suite(class_name, suite)?;
        }
        Ok(count)
    }
}

/// Maps a class name to a file name component, replacing anything that could leave the output
/// directory.
fn file_stem(class_name: &str) -> String {
    class_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn test_case(test_run: &TestRun) -> TestCase {
    let actual = test_run.result();
    let status = if actual == Some(TestResult::Unsupported) {
        TestCaseStatus::skipped()
    } else if test_run.is_expected_result() {
        TestCaseStatus::success()
    } else {
        let actual_str = actual.map_or("(no result)", TestResult::as_str);
        let expected = test_run
            .expected_result()
            .map_or_else(|| TestResult::Success.to_string(), |e| e.to_string());
        let kind = if actual == Some(TestResult::Error) {
            NonSuccessKind::Error
        } else {
            NonSuccessKind::Failure
        };
        let mut status = TestCaseStatus::non_success(kind);
        status
            .set_type(actual_str)
            .set_message(format!("expected {expected}, got {actual_str}"));
        status
    };

    let mut test_case = TestCase::new(test_run.simple_name(), status);
    test_case.set_classname(test_run.class_name());
    if let Some(description) = test_run.description() {
        test_case.status.set_description(description);
    }
    if let Some(timing) = test_run.timing() {
        test_case
            .set_timestamp(DateTime::<Utc>::from(timing.start_time))
            .set_time(timing.time_taken);
    }
    let output = test_run.failure_message();
    if !output.is_empty() {
        test_case.set_system_out(output);
    }
    test_case
}
