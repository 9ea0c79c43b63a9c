// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by stagerun.

use crate::{config::DrainOrder, test_run::TestResult};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt, io, time::Duration};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error(
    "failed to parse stagerun config{}",
    .config_file.as_ref().map_or_else(String::new, |file| format!(" at `{file}`"))
)]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self { config_file, kind }
    }

    /// Returns the config file that failed to parse, if a file was involved.
    pub fn config_file(&self) -> Option<&Utf8PathBuf> {
        self.config_file.as_ref()
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the layered config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error which indicates that a profile was requested but not known to stagerun.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurs while parsing a
/// [`BuildThreads`](crate::config::BuildThreads) value from a string.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for build-threads: {input}")]
pub struct BuildThreadsParseError {
    input: String,
}

impl BuildThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while parsing a [`DrainOrder`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for drain-order: {input}\n(known values: {})",
    DrainOrder::variants().join(", "),
)]
pub struct DrainOrderParseError {
    input: String,
}

impl DrainOrderParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while parsing a [`TestResult`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized test result: {input}\n(known values: {})",
    TestResult::variants().join(", "),
)]
pub struct TestResultParseError {
    input: String,
}

impl TestResultParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while parsing a backend command template.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandTemplateParseError {
    /// The template was empty or only contained whitespace.
    #[error("command template is empty")]
    Empty,

    /// The template could not be split into words.
    #[error("failed to split command template `{template}` into words")]
    Split {
        /// The template that failed to split.
        template: String,

        /// The underlying error.
        #[source]
        error: shell_words::ParseError,
    },
}

/// An error that occurs while loading expectations files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExpectationParseError {
    /// An expectations file exists but could not be read.
    #[error("failed to read expectations file `{file}`")]
    Read {
        /// The file that could not be read.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An expectations file is not valid TOML, or doesn't follow the expected schema.
    #[error("failed to parse expectations file `{file}`")]
    Parse {
        /// The file that failed to parse.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Box<toml::de::Error>,
    },

    /// An expectation's output pattern is not a valid regular expression.
    #[error("invalid output pattern for `{name}` in expectations file `{file}`")]
    InvalidPattern {
        /// The file containing the expectation.
        file: Utf8PathBuf,

        /// The qualified name the expectation is declared for.
        name: String,

        /// The underlying error.
        #[source]
        error: Box<regex::Error>,
    },
}

/// An error that occurs while discovering tests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// An input file could not be read.
    #[error("failed to read test file `{file}`")]
    Read {
        /// The file that could not be read.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A test list contained a name that isn't a valid qualified name.
    #[error("invalid qualified name `{name}` at {file}:{line}")]
    InvalidName {
        /// The file containing the name.
        file: Utf8PathBuf,

        /// The 1-based line number.
        line: usize,

        /// The offending name.
        name: String,
    },
}

/// An error returned by an [`ExecutionBackend`](crate::backend::ExecutionBackend).
///
/// Errors returned while building or running an individual test are recorded against that test
/// as an `ERROR` result. Only an error from the one-time preparation step ends the run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// A command could not be started or waited on.
    #[error("failed to execute `{command}`")]
    Exec {
        /// The command that failed.
        command: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A command exited with a failure status where success was required.
    #[error("`{command}` failed with {status}")]
    CommandFailed {
        /// The command that failed.
        command: String,

        /// A description of the exit status.
        status: String,
    },

    /// The backend does not know how to run tests.
    #[error("no run command configured for the backend")]
    NoRunCommand,

    /// The backend returned from `run_test` without recording a result.
    #[error("backend did not record a result for `{name}`")]
    NoResultRecorded {
        /// The qualified name of the test.
        name: String,
    },

    /// The backend panicked.
    #[error("backend panicked: {message}")]
    Panicked {
        /// The panic message, if it could be extracted.
        message: String,
    },

    /// Some other error occurred.
    #[error(transparent)]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl BackendError {
    /// Wraps an arbitrary error produced by a custom backend.
    pub fn other(error: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        BackendError::Other(error.into())
    }
}

/// An error that occurs while writing reports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportError {
    /// An error occurred while operating on the file system.
    #[error("error operating on path `{path}`")]
    Fs {
        /// The path being operated on.
        path: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while producing JUnit XML.
    #[error("error writing JUnit output to `{file}`")]
    Junit {
        /// The output file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// An error that occurs while building a [`PipelineRunner`](crate::runner::PipelineRunner).
#[derive(Debug, Error)]
#[error("error creating build thread pool")]
pub struct TestRunnerBuildError {
    #[from]
    error: rayon::ThreadPoolBuildError,
}

/// An error that aborts a whole run.
///
/// Failures of individual tests are never represented here: they're recorded as results on the
/// tests themselves.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// The execution backend failed to prepare the target environment.
    #[error("failed to prepare the execution backend")]
    Prepare(#[source] BackendError),

    /// No test was handed over by the build phase within the timeout.
    #[error(
        "expected {expected} tests but found only {found} \
         (no test finished building within {})",
        humantime::format_duration(*.timeout)
    )]
    BuildStalled {
        /// The number of tests that were submitted.
        expected: usize,

        /// The number of tests that were drained before the stall.
        found: usize,

        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Every build worker went away before all tests were handed over.
    #[error("expected {expected} tests but found only {found} (build workers exited early)")]
    BuildDisconnected {
        /// The number of tests that were submitted.
        expected: usize,

        /// The number of tests that were drained.
        found: usize,
    },

    /// Writing reports failed after all tests ran.
    #[error("failed to write reports")]
    Report(#[source] ReportError),
}

/// Displays an error along with its chain of sources, one per line.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new chain displayer for the given error.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Display for DisplayErrorChain<E>
where
    E: error::Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, "\n  caused by: {error}")?;
            source = error.source();
        }

        Ok(())
    }
}

impl<E: fmt::Debug> fmt::Debug for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayErrorChain")
            .field("error", &self.error)
            .finish()
    }
}
