// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use stagerun_runner::{
    backend::ExecutionBackend,
    config::BuildThreads,
    discovery::TestCorpus,
    errors::{BackendError, RunError},
    expectations::ExpectationStore,
    reporter::ReportSink,
    runner::{PipelineRunnerBuilder, RunReport},
    test_run::{TestResult, TestRun},
};
use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

/// What the stub backend does for a particular test.
#[derive(Clone, Debug)]
pub(crate) enum Behavior {
    /// Builds fine and runs with the given result and output.
    Run(TestResult, &'static [&'static str]),
    /// Records a failed build.
    BuildFails(TestResult),
    /// Returns an error from the build.
    BuildErrors,
    /// Panics while building.
    BuildPanics,
    /// Returns an error from the run.
    RunErrors,
    /// Panics while running.
    RunPanics,
    /// Returns from the run without recording anything.
    RunRecordsNothing,
    /// Runs successfully, then panics during cleanup.
    CleanupPanics,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Calls {
    pub(crate) prepared: usize,
    pub(crate) built: Vec<String>,
    /// The number of builds that had returned, whatever their outcome.
    pub(crate) builds_finished: usize,
    /// For each run, in order, the value of `builds_finished` when it started.
    pub(crate) builds_finished_at_run: Vec<usize>,
    pub(crate) ran: Vec<String>,
    pub(crate) cleaned: Vec<String>,
}

impl Calls {
    pub(crate) fn cleaned_count(&self, name: &str) -> usize {
        self.cleaned.iter().filter(|cleaned| *cleaned == name).count()
    }
}

/// A backend that records every call made to it.
///
/// Tests without a configured behavior build fine and run with `SUCCESS`. Clones share their
/// recorded calls, so a clone can be handed to the runner while the original is inspected.
#[derive(Clone, Debug, Default)]
pub(crate) struct StubBackend {
    behaviors: HashMap<String, Behavior>,
    build_delays: HashMap<String, Duration>,
    fail_prepare: bool,
    calls: Arc<Mutex<Calls>>,
}

impl StubBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_behavior(mut self, name: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(name.to_owned(), behavior);
        self
    }

    pub(crate) fn with_build_delay(mut self, name: &str, delay: Duration) -> Self {
        self.build_delays.insert(name.to_owned(), delay);
        self
    }

    pub(crate) fn with_failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub(crate) fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    fn behavior(&self, test_run: &TestRun) -> Behavior {
        self.behaviors
            .get(test_run.qualified_name())
            .cloned()
            .unwrap_or(Behavior::Run(TestResult::Success, &[]))
    }
}

impl ExecutionBackend for StubBackend {
    fn prepare(&self) -> Result<(), BackendError> {
        self.calls.lock().unwrap().prepared += 1;
        if self.fail_prepare {
            return Err(BackendError::Exec {
                command: "adb wait-for-device".to_owned(),
                error: io::Error::new(io::ErrorKind::NotFound, "device offline"),
            });
        }
        Ok(())
    }

    fn build_and_install(&self, test_run: &mut TestRun) -> Result<(), BackendError> {
        let name = test_run.qualified_name().to_owned();
        self.calls.lock().unwrap().built.push(name.clone());
        if let Some(delay) = self.build_delays.get(&name) {
            thread::sleep(*delay);
        }
        self.calls.lock().unwrap().builds_finished += 1;

        match self.behavior(test_run) {
            Behavior::BuildFails(result) => {
                test_run.set_result(result, vec![format!("{name}: build failed")]);
                Ok(())
            }
            Behavior::BuildErrors => Err(BackendError::other(format!("cannot install {name}"))),
            Behavior::BuildPanics => panic!("build of {name} blew up"),
            _ => Ok(()),
        }
    }

    fn run_test(&self, test_run: &mut TestRun) -> Result<(), BackendError> {
        let name = test_run.qualified_name().to_owned();
        {
            let mut calls = self.calls.lock().unwrap();
            calls.ran.push(name.clone());
            let finished = calls.builds_finished;
            calls.builds_finished_at_run.push(finished);
        }

        match self.behavior(test_run) {
            Behavior::Run(result, output) => {
                let output = output.iter().map(|line| (*line).to_owned()).collect();
                test_run.set_result(result, output);
                Ok(())
            }
            Behavior::RunErrors => Err(BackendError::other(format!("lost connection running {name}"))),
            Behavior::RunPanics => panic!("run of {name} blew up"),
            Behavior::RunRecordsNothing => Ok(()),
            Behavior::CleanupPanics => {
                test_run.set_result(TestResult::Success, Vec::new());
                Ok(())
            }
            Behavior::BuildFails(_) | Behavior::BuildErrors | Behavior::BuildPanics => {
                panic!("{name} should not have been run")
            }
        }
    }

    fn cleanup(&self, test_run: &TestRun) {
        let name = test_run.qualified_name().to_owned();
        self.calls.lock().unwrap().cleaned.push(name.clone());
        if let Behavior::CleanupPanics = self.behavior(test_run) {
            panic!("cleanup of {name} blew up");
        }
    }
}

pub(crate) fn corpus(names: &[&str]) -> TestCorpus {
    names.iter().map(|name| TestRun::new(*name)).collect()
}

pub(crate) fn run_with(
    builder: PipelineRunnerBuilder,
    store: &ExpectationStore,
    backend: &StubBackend,
    corpus: TestCorpus,
    sink: Option<&dyn ReportSink>,
) -> Result<RunReport, RunError> {
    let runner = builder
        .build(Arc::new(store.clone()), Arc::new(backend.clone()))
        .unwrap();
    runner.run(corpus, sink)
}

pub(crate) fn run_simple(
    store: &ExpectationStore,
    backend: &StubBackend,
    names: &[&str],
) -> RunReport {
    let mut builder = PipelineRunnerBuilder::default();
    builder.set_build_threads(BuildThreads::Count(4));
    run_with(builder, store, backend, corpus(names), None).unwrap()
}

pub(crate) fn find<'a>(report: &'a RunReport, name: &str) -> &'a TestRun {
    report
        .runs
        .iter()
        .find(|test_run| test_run.qualified_name() == name)
        .unwrap_or_else(|| panic!("{name} not in report"))
}
