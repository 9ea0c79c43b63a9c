// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use pretty_assertions::assert_eq;
use stagerun_runner::{
    config::{BuildThreads, DrainOrder},
    expectations::ExpectationStore,
    runner::PipelineRunnerBuilder,
    test_run::TestRun,
};
use std::{num::NonZeroUsize, time::Duration};
use test_case::test_case;

const NAMES: [&str; 6] = [
    "o.A.t0", "o.A.t1", "o.A.t2", "o.B.t3", "o.B.t4", "o.B.t5",
];

fn report_names(runs: &[TestRun]) -> Vec<String> {
    runs.iter()
        .map(|test_run| test_run.qualified_name().to_owned())
        .collect()
}

#[test_case(1; "queue of one")]
#[test_case(4; "default queue")]
fn submission_order_despite_build_delays(queue_capacity: usize) {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new()
        .with_build_delay("o.A.t0", Duration::from_millis(150))
        .with_build_delay("o.A.t2", Duration::from_millis(80))
        .with_build_delay("o.B.t3", Duration::from_millis(10));
    let mut builder = PipelineRunnerBuilder::default();
    builder
        .set_build_threads(BuildThreads::Count(4))
        .set_queue_capacity(NonZeroUsize::new(queue_capacity).unwrap())
        .set_drain_order(DrainOrder::Submission);

    let report = run_with(builder, &store, &backend, corpus(&NAMES), None).unwrap();

    assert_eq!(report_names(&report.runs), NAMES.to_vec());
    assert_eq!(backend.calls().ran, NAMES.to_vec());
}

#[test]
fn arrival_order_runs_fast_builds_first() {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new().with_build_delay("o.A.t0", Duration::from_millis(300));
    let mut builder = PipelineRunnerBuilder::default();
    builder
        .set_build_threads(BuildThreads::Count(2))
        .set_drain_order(DrainOrder::Arrival);

    let report = run_with(builder, &store, &backend, corpus(&NAMES), None).unwrap();

    let executed = report_names(&report.runs);
    assert_eq!(executed.len(), NAMES.len());
    assert_eq!(executed.last().map(String::as_str), Some("o.A.t0"));
    assert_eq!(backend.calls().ran, executed, "report is in execution order");
}

#[test]
fn builds_start_in_submission_order() {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new();
    let mut builder = PipelineRunnerBuilder::default();
    builder.set_build_threads(BuildThreads::Count(1));

    run_with(builder, &store, &backend, corpus(&NAMES), None).unwrap();

    assert_eq!(backend.calls().built, NAMES.to_vec());
}

#[test_case(DrainOrder::Submission; "submission")]
#[test_case(DrainOrder::Arrival; "arrival")]
fn build_look_ahead_is_bounded(drain_order: DrainOrder) {
    let names: Vec<String> = (0..20).map(|i| format!("w.Window.t{i}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let store = ExpectationStore::empty();
    let backend = StubBackend::new().with_build_delay(names[0], Duration::from_millis(300));
    let mut builder = PipelineRunnerBuilder::default();
    builder
        .set_build_threads(BuildThreads::Count(2))
        .set_queue_capacity(NonZeroUsize::new(1).unwrap())
        .set_drain_order(drain_order);

    let report = run_with(builder, &store, &backend, corpus(&names), None).unwrap();
    assert_eq!(report.runs.len(), names.len());

    // One slot in the queue plus one test per build thread.
    let window = 3;
    let calls = backend.calls();
    assert_eq!(calls.builds_finished, names.len());
    for (executed, finished) in calls.builds_finished_at_run.iter().enumerate() {
        assert!(
            *finished <= executed + window,
            "{finished} builds had finished before run {executed}"
        );
    }
    if drain_order == DrainOrder::Submission {
        assert_eq!(calls.builds_finished_at_run[0], window);
    }
}
