// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ExecutionBackend;
use crate::{
    errors::{BackendError, CommandTemplateParseError},
    test_run::{TestResult, TestRun},
};
use camino::{Utf8Path, Utf8PathBuf};
use duct::{Expression, Handle, cmd};
use serde::Deserialize;
use std::{
    fmt, io,
    str::FromStr,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// How often a running test is checked for completion when a run timeout is set.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A command line with per-test placeholders.
///
/// Templates are split into words with shell quoting rules, but are not run through a shell.
/// Within each word, `{name}` is replaced with the test's qualified name, `{class}` with its class
/// name, and `{source}` with the file it was discovered in (or nothing, if unknown).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    /// Returns the program, before substitution.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments, before substitution.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the program and arguments with placeholders filled in for `test_run`.
    pub fn expand(&self, test_run: &TestRun) -> (String, Vec<String>) {
        let source = test_run.source().map_or("", Utf8Path::as_str);
        let substitute = |word: &str| {
            word.replace("{name}", test_run.qualified_name())
                .replace("{class}", test_run.class_name())
                .replace("{source}", source)
        };
        (
            substitute(&self.program),
            self.args.iter().map(|arg| substitute(arg)).collect(),
        )
    }
}

impl FromStr for CommandTemplate {
    type Err = CommandTemplateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = shell_words::split(s).map_err(|error| CommandTemplateParseError::Split {
            template: s.to_owned(),
            error,
        })?;
        if words.is_empty() {
            return Err(CommandTemplateParseError::Empty);
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(&self.args);
        write!(f, "{}", shell_words::join(words))
    }
}

impl<'de> Deserialize<'de> for CommandTemplate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct TemplateVisitor;

        impl<'de> serde::de::Visitor<'de> for TemplateVisitor {
            type Value = CommandTemplate;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a Unix shell command or a list of arguments")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match value.parse() {
                    Ok(template) => Ok(template),
                    Err(CommandTemplateParseError::Empty) => {
                        Err(E::invalid_value(serde::de::Unexpected::Str(value), &self))
                    }
                    Err(error) => Err(E::custom(error)),
                }
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let Some(program) = seq.next_element::<String>()? else {
                    return Err(serde::de::Error::invalid_length(0, &self));
                };
                let mut args = Vec::new();
                while let Some(arg) = seq.next_element::<String>()? {
                    args.push(arg);
                }
                Ok(CommandTemplate { program, args })
            }
        }

        deserializer.deserialize_any(TemplateVisitor)
    }
}

/// An execution backend that shells out to a configured command for each phase.
///
/// * `prepare` runs once. A failing exit status aborts the run.
/// * `build` runs per test. A failing exit status is recorded as `COMPILE_FAILED`. Without a
///   build command, building is a no-op.
/// * `run` runs per test: exit status 0 is `SUCCESS`, anything else `EXEC_FAILED`. If a run
///   timeout is set and exceeded, the command is killed and the result is `EXEC_TIMEOUT`.
/// * `cleanup` runs per test. Failures are logged and ignored.
///
/// Standard output and standard error are captured together and recorded as the test's output.
#[derive(Clone, Debug, Default)]
pub struct CommandBackend {
    dir: Option<Utf8PathBuf>,
    prepare: Option<CommandTemplate>,
    build: Option<CommandTemplate>,
    run: Option<CommandTemplate>,
    run_timeout: Option<Duration>,
    cleanup: Option<CommandTemplate>,
}

impl CommandBackend {
    /// Creates a backend with no commands configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the working directory for all commands.
    pub fn set_dir(&mut self, dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.dir = Some(dir.into());
        self
    }

    /// Sets the command run once before any test executes.
    pub fn set_prepare(&mut self, template: Option<CommandTemplate>) -> &mut Self {
        self.prepare = template;
        self
    }

    /// Sets the command that builds and installs each test.
    pub fn set_build(&mut self, template: Option<CommandTemplate>) -> &mut Self {
        self.build = template;
        self
    }

    /// Sets the command that runs each test.
    pub fn set_run(&mut self, template: Option<CommandTemplate>) -> &mut Self {
        self.run = template;
        self
    }

    /// Sets how long a single test may run before it is killed.
    pub fn set_run_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.run_timeout = timeout;
        self
    }

    /// Sets the command run after each test.
    pub fn set_cleanup(&mut self, template: Option<CommandTemplate>) -> &mut Self {
        self.cleanup = template;
        self
    }

    fn expression(&self, program: &str, args: &[String]) -> Expression {
        let mut expression = cmd(program, args)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked();
        if let Some(dir) = &self.dir {
            expression = expression.dir(dir.as_std_path());
        }
        expression
    }

    fn execute(
        &self,
        program: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, BackendError> {
        let command = display_command(program, args);
        debug!("executing `{command}`");
        let exec_error = |error: io::Error| BackendError::Exec {
            command: command.clone(),
            error,
        };

        let mut expression = self.expression(program, args);
        if timeout.is_some() {
            expression = in_process_group(expression);
        }
        let handle = expression.start().map_err(exec_error)?;

        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;
            loop {
                if handle.try_wait().map_err(exec_error)?.is_some() {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    kill_process_groups(&handle);
                    handle.kill().map_err(exec_error)?;
                    // Whatever was written before the kill is still useful.
                    let output = handle
                        .into_output()
                        .map(|output| output_lines(&output.stdout))
                        .unwrap_or_default();
                    return Ok(CommandOutput {
                        command,
                        status: CommandStatus::TimedOut(timeout),
                        output,
                    });
                }
                thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
        }

        let output = handle.into_output().map_err(exec_error)?;
        let status = if output.status.success() {
            CommandStatus::Success
        } else {
            CommandStatus::Failed(output.status.to_string())
        };
        Ok(CommandOutput {
            command,
            status,
            output: output_lines(&output.stdout),
        })
    }
}

impl ExecutionBackend for CommandBackend {
    fn prepare(&self) -> Result<(), BackendError> {
        let Some(template) = &self.prepare else {
            return Ok(());
        };
        let output = self.execute(template.program(), template.args(), None)?;
        match output.status {
            CommandStatus::Success => Ok(()),
            status => Err(BackendError::CommandFailed {
                command: output.command,
                status: status.to_string(),
            }),
        }
    }

    fn build_and_install(&self, test_run: &mut TestRun) -> Result<(), BackendError> {
        let Some(template) = &self.build else {
            return Ok(());
        };
        let (program, args) = template.expand(test_run);
        let output = self.execute(&program, &args, None)?;
        if !matches!(output.status, CommandStatus::Success) {
            test_run.set_result(TestResult::CompileFailed, output.output);
        }
        Ok(())
    }

    fn run_test(&self, test_run: &mut TestRun) -> Result<(), BackendError> {
        let template = self.run.as_ref().ok_or(BackendError::NoRunCommand)?;
        let (program, args) = template.expand(test_run);
        let output = self.execute(&program, &args, self.run_timeout)?;
        let result = match output.status {
            CommandStatus::Success => TestResult::Success,
            CommandStatus::Failed(_) => TestResult::ExecFailed,
            CommandStatus::TimedOut(timeout) => {
                debug!(
                    "`{}` timed out after {}",
                    output.command,
                    humantime::format_duration(timeout)
                );
                TestResult::ExecTimeout
            }
        };
        test_run.set_result(result, output.output);
        Ok(())
    }

    fn cleanup(&self, test_run: &TestRun) {
        let Some(template) = &self.cleanup else {
            return;
        };
        let (program, args) = template.expand(test_run);
        match self.execute(&program, &args, None) {
            Ok(CommandOutput {
                status: CommandStatus::Success,
                ..
            }) => {}
            Ok(CommandOutput {
                command, status, ..
            }) => {
                warn!("cleanup for {test_run} failed: `{command}` exited with {status}");
            }
            Err(error) => {
                warn!("cleanup for {test_run} failed: {error}");
            }
        }
    }
}

#[derive(Debug)]
struct CommandOutput {
    command: String,
    status: CommandStatus,
    output: Vec<String>,
}

#[derive(Debug)]
enum CommandStatus {
    Success,
    Failed(String),
    TimedOut(Duration),
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(status) => write!(f, "{status}"),
            Self::TimedOut(timeout) => {
                write!(f, "timeout after {}", humantime::format_duration(*timeout))
            }
        }
    }
}

fn display_command(program: &str, args: &[String]) -> String {
    shell_words::join(std::iter::once(program).chain(args.iter().map(String::as_str)))
}

fn output_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Starts the command in a process group of its own, so that a timeout reaches anything it
/// spawned as well.
#[cfg(unix)]
fn in_process_group(expression: Expression) -> Expression {
    expression.before_spawn(|command| {
        use std::os::unix::process::CommandExt;

        command.process_group(0);
        Ok(())
    })
}

#[cfg(not(unix))]
fn in_process_group(expression: Expression) -> Expression {
    expression
}

/// Kills every process group started by [`in_process_group`] for this handle.
///
/// Children that outlive the test's own process would otherwise hold its output pipe open.
#[cfg(unix)]
fn kill_process_groups(handle: &Handle) {
    for pid in handle.pids() {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            continue;
        };
        // ESRCH just means the group has already exited.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_groups(_handle: &Handle) {}
