// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use stagerun_metadata::StagerunExitCode;
use stagerun_runner::errors::*;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are mostly placeholder messages. Errors are expected to be printed with
// display_to_stderr.

/// An error that stagerun knows how to report.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("expectations parse error")]
    ExpectationParseError {
        #[from]
        err: ExpectationParseError,
    },
    #[error("test discovery error")]
    DiscoveryError {
        #[from]
        err: DiscoveryError,
    },
    #[error("test runner build error")]
    TestRunnerBuildError {
        #[from]
        err: TestRunnerBuildError,
    },
    #[error("test run error")]
    RunError {
        #[from]
        err: RunError,
    },
    #[error("error writing to output")]
    WriteError {
        #[source]
        err: std::io::Error,
    },
    #[error("no tests found")]
    NoTestsFound { files: Vec<Utf8PathBuf> },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::ExpectationParseError { .. }
            | Self::DiscoveryError { .. }
            | Self::TestRunnerBuildError { .. }
            | Self::WriteError { .. } => StagerunExitCode::SETUP_ERROR,
            Self::NoTestsFound { .. } => StagerunExitCode::NO_TESTS_RUN,
            Self::RunError { err } => match err {
                RunError::Prepare(_) => StagerunExitCode::PREPARE_FAILED,
                RunError::BuildStalled { .. } | RunError::BuildDisconnected { .. } => {
                    StagerunExitCode::BUILD_STALLED
                }
                RunError::Report(_) => StagerunExitCode::REPORT_FAILED,
                _ => StagerunExitCode::TEST_RUN_FAILED,
            },
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::ConfigParseError { err } => {
                let file = err
                    .config_file()
                    .map_or_else(|| "(default config)".to_owned(), |file| file.to_string());
                match err.kind() {
                    ConfigParseErrorKind::BuildError(build_error) => {
                        error!("failed to parse config at `{}`", file.style(styles.bold));
                        Some(&**build_error as &dyn Error)
                    }
                    ConfigParseErrorKind::DeserializeError(deserialize_error) => {
                        error!(
                            "failed to parse config at `{}`: invalid value for `{}`",
                            file.style(styles.bold),
                            deserialize_error.path().style(styles.bold)
                        );
                        Some(deserialize_error.inner() as &dyn Error)
                    }
                    _ => {
                        error!("failed to parse config at `{}`", file.style(styles.bold));
                        err.source()
                    }
                }
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                None
            }
            Self::ExpectationParseError { err } => {
                error!("{err}");
                err.source()
            }
            Self::DiscoveryError { err } => {
                error!("failed to discover tests");
                Some(err as &dyn Error)
            }
            Self::TestRunnerBuildError { err } => {
                error!("failed to build test runner");
                Some(err as &dyn Error)
            }
            Self::RunError { err } => {
                error!("{err}");
                err.source()
            }
            Self::WriteError { err } => {
                error!("failed to write to output");
                Some(err as &dyn Error)
            }
            Self::NoTestsFound { files } => {
                error!(
                    "no tests found in {} input files",
                    files.len().style(styles.bold)
                );
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
