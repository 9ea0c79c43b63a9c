// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The unit of work scheduled by stagerun, and the results it can produce.

use crate::errors::{DisplayErrorChain, TestResultParseError};
use camino::{Utf8Path, Utf8PathBuf};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::{
    error, fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::warn;

/// The outcome of a test, either as produced by executing it or as declared in an expectation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TestResult {
    /// The test ran and succeeded.
    Success,

    /// The test could not be built.
    CompileFailed,

    /// The test ran and failed.
    ExecFailed,

    /// The test ran but did not finish in time.
    ExecTimeout,

    /// Something went wrong around the test rather than in it: the backend errored out or
    /// panicked while building, installing or running the test.
    Error,

    /// The test isn't supported in this environment. Unsupported tests are never built.
    Unsupported,
}

impl TestResult {
    /// Returns the string representations of all known variants.
    pub fn variants() -> &'static [&'static str] {
        &[
            "SUCCESS",
            "COMPILE_FAILED",
            "EXEC_FAILED",
            "EXEC_TIMEOUT",
            "ERROR",
            "UNSUPPORTED",
        ]
    }

    /// Returns the string representation of this result.
    pub fn as_str(self) -> &'static str {
        match self {
            TestResult::Success => "SUCCESS",
            TestResult::CompileFailed => "COMPILE_FAILED",
            TestResult::ExecFailed => "EXEC_FAILED",
            TestResult::ExecTimeout => "EXEC_TIMEOUT",
            TestResult::Error => "ERROR",
            TestResult::Unsupported => "UNSUPPORTED",
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TestResult {
    type Err = TestResultParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        let result = match normalized.as_str() {
            "SUCCESS" => TestResult::Success,
            "COMPILE_FAILED" => TestResult::CompileFailed,
            "EXEC_FAILED" => TestResult::ExecFailed,
            "EXEC_TIMEOUT" => TestResult::ExecTimeout,
            "ERROR" => TestResult::Error,
            "UNSUPPORTED" => TestResult::Unsupported,
            _ => return Err(TestResultParseError::new(s)),
        };
        Ok(result)
    }
}

impl<'de> Deserialize<'de> for TestResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What a qualified name (or a prefix of one) is expected to produce.
#[derive(Clone, Debug)]
pub struct ExpectedResult {
    result: TestResult,
    pattern: Option<OutputPattern>,
}

impl ExpectedResult {
    /// Creates a new expectation for the given result, with no constraint on output.
    pub fn new(result: TestResult) -> Self {
        Self {
            result,
            pattern: None,
        }
    }

    /// Creates a new expectation whose output must also match `pattern`.
    ///
    /// The pattern must match the entire output, with lines joined by `\n`. `.` matches newlines
    /// and `^`/`$` match at line boundaries.
    pub fn with_pattern(result: TestResult, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            result,
            pattern: Some(OutputPattern::new(pattern)?),
        })
    }

    /// The built-in expectation for names that have no entry: the test is expected to succeed.
    pub fn success() -> Self {
        Self::new(TestResult::Success)
    }

    /// Returns the expected result.
    pub fn result(&self) -> TestResult {
        self.result
    }

    /// Returns the output pattern as written, if any.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(|pattern| pattern.source.as_str())
    }

    /// Returns true if an actual result and its output satisfy this expectation.
    pub fn matches(&self, actual: TestResult, output: &str) -> bool {
        if actual != self.result {
            return false;
        }
        match &self.pattern {
            Some(pattern) => pattern.regex.is_match(output),
            None => true,
        }
    }
}

impl PartialEq for ExpectedResult {
    fn eq(&self, other: &Self) -> bool {
        self.result == other.result && self.pattern() == other.pattern()
    }
}

impl Eq for ExpectedResult {}

impl fmt::Display for ExpectedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pattern() {
            Some(pattern) => write!(f, "{} matching /{}/", self.result, pattern),
            None => write!(f, "{}", self.result),
        }
    }
}

#[derive(Clone, Debug)]
struct OutputPattern {
    source: String,
    regex: Regex,
}

impl OutputPattern {
    fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&format!(r"\A(?:{source})\z"))
            .dot_matches_new_line(true)
            .multi_line(true)
            .build()?;
        Ok(Self {
            source: source.to_owned(),
            regex,
        })
    }
}

/// The actual outcome recorded for a test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestOutcome {
    /// The result kind.
    pub result: TestResult,

    /// Diagnostic output, one entry per line.
    pub output: Vec<String>,
}

/// When a test executed and for how long.
#[derive(Copy, Clone, Debug)]
pub struct ExecutionTiming {
    /// The realtime clock at the start of execution.
    pub start_time: SystemTime,

    /// How long execution took.
    pub time_taken: Duration,
}

/// One schedulable test.
///
/// A test run is identified by its qualified name: two runs with the same name are equal. The
/// expected result and the actual outcome are each recorded at most once. Later writes are
/// ignored with a warning.
#[derive(Clone, Debug)]
pub struct TestRun {
    qualified_name: String,
    source: Option<Utf8PathBuf>,
    description: Option<String>,
    expected: Option<Arc<ExpectedResult>>,
    outcome: Option<TestOutcome>,
    timing: Option<ExecutionTiming>,
}

impl TestRun {
    /// Creates a new test run with the given dotted, hierarchical name.
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            source: None,
            description: None,
            expected: None,
            outcome: None,
            timing: None,
        }
    }

    /// Sets the file this test was discovered in.
    pub fn with_source(mut self, source: impl Into<Utf8PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets a human-readable description for this test.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the qualified name, e.g. `pkg.Class.method`.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Returns the qualified name with its last component removed.
    ///
    /// Names without any dots are returned unchanged.
    pub fn class_name(&self) -> &str {
        match self.qualified_name.rsplit_once('.') {
            Some((class_name, _)) => class_name,
            None => &self.qualified_name,
        }
    }

    /// Returns the last component of the qualified name.
    pub fn simple_name(&self) -> &str {
        match self.qualified_name.rsplit_once('.') {
            Some((_, simple_name)) => simple_name,
            None => &self.qualified_name,
        }
    }

    /// Returns the file this test was discovered in, if known.
    pub fn source(&self) -> Option<&Utf8Path> {
        self.source.as_deref()
    }

    /// Returns the description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the expected result, if it has been resolved.
    pub fn expected_result(&self) -> Option<&ExpectedResult> {
        self.expected.as_deref()
    }

    /// Attaches the expected result. Only the first call has any effect.
    pub fn set_expected_result(&mut self, expected: Arc<ExpectedResult>) {
        if self.expected.is_some() {
            warn!(
                "ignoring second expected result ({expected}) for {}",
                self.qualified_name
            );
            return;
        }
        self.expected = Some(expected);
    }

    /// Returns the actual result, if one has been recorded.
    pub fn result(&self) -> Option<TestResult> {
        self.outcome.as_ref().map(|outcome| outcome.result)
    }

    /// Returns the recorded outcome, if any.
    pub fn outcome(&self) -> Option<&TestOutcome> {
        self.outcome.as_ref()
    }

    /// Records the actual result along with its diagnostic output. Only the first call has any
    /// effect.
    pub fn set_result(&mut self, result: TestResult, output: Vec<String>) {
        if let Some(outcome) = &self.outcome {
            warn!(
                "ignoring result {result} for {}: already recorded {}",
                self.qualified_name, outcome.result
            );
            return;
        }
        self.outcome = Some(TestOutcome { result, output });
    }

    /// Records an `ERROR` result whose output is the error and its chain of causes.
    pub fn set_error(&mut self, error: &(dyn error::Error + 'static)) {
        let output = DisplayErrorChain::new(error)
            .to_string()
            .lines()
            .map(str::to_owned)
            .collect();
        self.set_result(TestResult::Error, output);
    }

    /// Returns true if the test can still be executed.
    ///
    /// This is false once any result has been recorded, e.g. because building it failed.
    pub fn is_runnable(&self) -> bool {
        self.outcome.is_none()
    }

    /// Returns true if the actual outcome satisfies the expected result.
    ///
    /// A test without a resolved expectation is judged against the default `SUCCESS`
    /// expectation. A test without an outcome never matches.
    pub fn is_expected_result(&self) -> bool {
        let Some(outcome) = &self.outcome else {
            return false;
        };
        let output = outcome.output.join("\n");
        match &self.expected {
            Some(expected) => expected.matches(outcome.result, &output),
            None => ExpectedResult::success().matches(outcome.result, &output),
        }
    }

    /// Returns the diagnostic output joined into a single string.
    pub fn failure_message(&self) -> String {
        match &self.outcome {
            Some(outcome) => outcome.output.join("\n"),
            None => String::new(),
        }
    }

    /// Returns execution timing, if the test was executed.
    pub fn timing(&self) -> Option<ExecutionTiming> {
        self.timing
    }

    pub(crate) fn set_timing(&mut self, timing: ExecutionTiming) {
        self.timing = Some(timing);
    }
}

impl PartialEq for TestRun {
    fn eq(&self, other: &Self) -> bool {
        self.qualified_name == other.qualified_name
    }
}

impl Eq for TestRun {}

impl Hash for TestRun {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.qualified_name.hash(state);
    }
}

impl fmt::Display for TestRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name)
    }
}

/// Returns true if `name` is a valid qualified name: one or more non-empty, dot-separated
/// components without whitespace or path separators.
pub fn is_valid_qualified_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|component| {
            !component.is_empty()
                && !component.contains(|c: char| c.is_whitespace() || c == '/' || c == '\\')
        })
}
