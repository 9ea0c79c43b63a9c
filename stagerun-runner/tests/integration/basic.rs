// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use pretty_assertions::assert_eq;
use stagerun_runner::{
    config::BuildThreads,
    errors::RunError,
    expectations::ExpectationStore,
    runner::PipelineRunnerBuilder,
    test_run::{ExpectedResult, TestResult},
};
use std::{num::NonZeroUsize, sync::mpsc, thread, time::Duration};

#[test]
fn unsupported_class_is_skipped_without_backend() {
    let store = ExpectationStore::from_entries([(
        "a.b.C",
        ExpectedResult::new(TestResult::Unsupported),
    )]);
    let backend = StubBackend::new();

    let report = run_simple(&store, &backend, &["a.b.C.method1", "a.b.D.method1"]);

    let skipped = find(&report, "a.b.C.method1");
    assert_eq!(skipped.result(), Some(TestResult::Unsupported));
    assert_eq!(
        skipped.expected_result().map(|e| e.result()),
        Some(TestResult::Unsupported)
    );

    let calls = backend.calls();
    assert_eq!(calls.built, vec!["a.b.D.method1".to_owned()]);
    assert_eq!(calls.ran, vec!["a.b.D.method1".to_owned()]);
    assert_eq!(report.stats.unsupported, 1);
    assert_eq!(report.stats.passed, 1);
    assert!(report.stats.is_success());
}

#[test]
fn empty_store_expects_success() {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new();

    let report = run_simple(&store, &backend, &["x.Y.z"]);

    let test_run = find(&report, "x.Y.z");
    assert_eq!(test_run.expected_result(), Some(&ExpectedResult::success()));
    assert_eq!(test_run.result(), Some(TestResult::Success));
    assert!(test_run.is_expected_result());
    assert!(test_run.timing().is_some(), "executed tests are timed");
    assert_eq!(report.stats.passed, 1);
    assert_eq!(report.reports_written, None);
}

#[test]
fn most_specific_expectation_wins() {
    let store = ExpectationStore::from_entries([
        ("m.N.method", ExpectedResult::new(TestResult::CompileFailed)),
        ("m.N", ExpectedResult::new(TestResult::Success)),
    ]);
    let backend = StubBackend::new()
        .with_behavior("m.N.method", Behavior::BuildFails(TestResult::CompileFailed));

    let report = run_simple(&store, &backend, &["m.N.method", "m.N.other"]);

    let method = find(&report, "m.N.method");
    assert_eq!(
        method.expected_result().map(|e| e.result()),
        Some(TestResult::CompileFailed)
    );
    assert!(method.is_expected_result(), "expected compile failure passes");
    assert!(
        !backend.calls().ran.contains(&"m.N.method".to_owned()),
        "tests that failed to build are not run"
    );
    assert_eq!(report.stats.passed, 2);
}

#[test]
fn build_panic_is_recorded_and_drained() {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new().with_behavior("p.Q.boom", Behavior::BuildPanics);

    let report = run_simple(&store, &backend, &["p.Q.before", "p.Q.boom", "p.Q.after"]);

    assert_eq!(report.runs.len(), 3);
    let boom = find(&report, "p.Q.boom");
    assert_eq!(boom.result(), Some(TestResult::Error));
    assert!(
        boom.failure_message().contains("build of p.Q.boom blew up"),
        "{}",
        boom.failure_message()
    );
    assert_eq!(boom.expected_result(), Some(&ExpectedResult::success()));
    assert_eq!(backend.calls().cleaned_count("p.Q.boom"), 1);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.passed, 2);
    assert!(!report.stats.is_success());
}

#[test]
fn later_expectation_file_wins() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let first = dir.path().join("first.toml");
    let second = dir.path().join("second.toml");
    std::fs::write(
        &first,
        indoc! {r#"
            [expectations]
            "p.Q" = "EXEC_FAILED"
        "#},
    )?;
    std::fs::write(
        &second,
        indoc! {r#"
            [expectations]
            "p.Q" = "EXEC_TIMEOUT"
        "#},
    )?;
    let store = ExpectationStore::load([&first, &second])?;
    let backend =
        StubBackend::new().with_behavior("p.Q.slow", Behavior::Run(TestResult::ExecTimeout, &[]));

    let report = run_simple(&store, &backend, &["p.Q.slow"]);

    let slow = find(&report, "p.Q.slow");
    ensure!(
        slow.expected_result().map(|e| e.result()) == Some(TestResult::ExecTimeout),
        "later file should win, got {:?}",
        slow.expected_result()
    );
    ensure!(slow.is_expected_result(), "timeout was expected");
    Ok(())
}

#[test]
fn report_has_one_entry_per_test() {
    let store = ExpectationStore::from_entries([
        ("u", ExpectedResult::new(TestResult::Unsupported)),
        ("k.L.flaky", ExpectedResult::new(TestResult::Unsupported)),
    ]);
    let backend = StubBackend::new()
        .with_behavior("k.L.fails", Behavior::Run(TestResult::ExecFailed, &["boom"]))
        .with_behavior("k.L.errors", Behavior::RunErrors)
        .with_behavior("k.L.nothing", Behavior::RunRecordsNothing)
        .with_behavior("k.L.install", Behavior::BuildErrors);
    let names = [
        "u.V.one",
        "u.V.two",
        "k.L.passes",
        "k.L.fails",
        "k.L.errors",
        "k.L.nothing",
        "k.L.install",
        "k.L.flaky",
    ];

    let report = run_simple(&store, &backend, &names);

    assert_eq!(report.runs.len(), names.len());
    assert_eq!(report.stats.initial_run_count, names.len());
    assert_eq!(report.stats.final_run_count, names.len());
    assert_eq!(report.stats.unsupported, 3);
    assert_eq!(report.stats.passed, 1);
    assert_eq!(report.stats.failed, 4);
    for test_run in &report.runs {
        assert!(
            test_run.expected_result().is_some(),
            "{test_run} has an expectation"
        );
        assert!(test_run.result().is_some(), "{test_run} has a result");
    }

    let calls = backend.calls();
    for unsupported in ["u.V.one", "u.V.two", "k.L.flaky"] {
        assert!(
            !calls.built.iter().any(|built| built == unsupported),
            "{unsupported} must not be built"
        );
    }
}

#[test]
fn run_failures_become_errors() {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new()
        .with_behavior("r.S.errors", Behavior::RunErrors)
        .with_behavior("r.S.panics", Behavior::RunPanics)
        .with_behavior("r.S.nothing", Behavior::RunRecordsNothing)
        .with_behavior("r.S.fails", Behavior::Run(TestResult::ExecFailed, &["expected 1"]));

    let report = run_simple(
        &store,
        &backend,
        &["r.S.errors", "r.S.panics", "r.S.nothing", "r.S.fails"],
    );

    let errors = find(&report, "r.S.errors");
    assert_eq!(errors.result(), Some(TestResult::Error));
    assert!(errors.failure_message().contains("lost connection"));

    let panics = find(&report, "r.S.panics");
    assert_eq!(panics.result(), Some(TestResult::Error));
    assert!(panics.failure_message().contains("run of r.S.panics blew up"));

    let nothing = find(&report, "r.S.nothing");
    assert_eq!(nothing.result(), Some(TestResult::Error));
    assert_eq!(
        nothing.failure_message(),
        "backend did not record a result for `r.S.nothing`"
    );

    let fails = find(&report, "r.S.fails");
    assert_eq!(fails.result(), Some(TestResult::ExecFailed));
    assert_eq!(fails.failure_message(), "expected 1");

    assert_eq!(report.stats.failed, 4);
}

#[test]
fn cleanup_runs_exactly_once() {
    let store = ExpectationStore::from_entries([(
        "c.D.skipped",
        ExpectedResult::new(TestResult::Unsupported),
    )]);
    let backend = StubBackend::new()
        .with_behavior("c.D.build", Behavior::BuildFails(TestResult::CompileFailed))
        .with_behavior("c.D.install", Behavior::BuildErrors)
        .with_behavior("c.D.errors", Behavior::RunErrors)
        .with_behavior("c.D.panics", Behavior::RunPanics)
        .with_behavior("c.D.cleanup", Behavior::CleanupPanics);
    let names = [
        "c.D.passes",
        "c.D.build",
        "c.D.install",
        "c.D.errors",
        "c.D.panics",
        "c.D.cleanup",
        "c.D.skipped",
    ];

    let report = run_simple(&store, &backend, &names);

    let calls = backend.calls();
    for name in names {
        assert_eq!(calls.cleaned_count(name), 1, "cleanup count for {name}");
    }
    assert!(
        find(&report, "c.D.cleanup").is_expected_result(),
        "a cleanup panic doesn't change the result"
    );
    assert_eq!(calls.prepared, 1);
}

#[test]
fn expected_output_pattern() -> Result<()> {
    let store = ExpectationStore::from_entries([
        (
            "o.P.oom",
            ExpectedResult::with_pattern(TestResult::ExecFailed, ".*OutOfMemoryError.*")?,
        ),
        (
            "o.P.other",
            ExpectedResult::with_pattern(TestResult::ExecFailed, ".*OutOfMemoryError.*")?,
        ),
    ]);
    let backend = StubBackend::new()
        .with_behavior(
            "o.P.oom",
            Behavior::Run(
                TestResult::ExecFailed,
                &["Exception in thread main", "java.lang.OutOfMemoryError", "\tat o.P.oom"],
            ),
        )
        .with_behavior(
            "o.P.other",
            Behavior::Run(TestResult::ExecFailed, &["java.lang.NullPointerException"]),
        );

    let report = run_simple(&store, &backend, &["o.P.oom", "o.P.other"]);

    ensure!(find(&report, "o.P.oom").is_expected_result(), "pattern matches");
    ensure!(
        !find(&report, "o.P.other").is_expected_result(),
        "pattern doesn't match"
    );
    Ok(())
}

#[test]
fn prepare_failure_aborts_run() {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new().with_failing_prepare();
    let mut builder = PipelineRunnerBuilder::default();
    builder.set_queue_capacity(NonZeroUsize::new(1).unwrap());

    let error = run_with(
        builder,
        &store,
        &backend,
        corpus(&["a.B.one", "a.B.two", "a.B.three", "a.B.four"]),
        None,
    )
    .unwrap_err();

    assert!(matches!(error, RunError::Prepare(_)), "{error:?}");
    let calls = backend.calls();
    assert_eq!(calls.prepared, 1);
    assert!(calls.ran.is_empty(), "nothing runs after prepare fails");
}

#[test]
fn stalled_build_is_fatal() {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new().with_build_delay("s.T.slow", Duration::from_millis(500));
    let mut builder = PipelineRunnerBuilder::default();
    builder.set_build_timeout(Duration::from_millis(20));

    let error = run_with(builder, &store, &backend, corpus(&["s.T.slow"]), None).unwrap_err();

    match error {
        RunError::BuildStalled {
            expected,
            found,
            timeout,
        } => {
            assert_eq!(expected, 1);
            assert_eq!(found, 0);
            assert_eq!(timeout, Duration::from_millis(20));
        }
        other => panic!("expected BuildStalled, got {other:?}"),
    }
    assert!(backend.calls().ran.is_empty());
}

#[test]
fn wedged_build_does_not_hang_run() {
    let store = ExpectationStore::empty();
    // Long enough to outlast the test binary.
    let backend =
        StubBackend::new().with_build_delay("s.T.wedged", Duration::from_secs(24 * 60 * 60));
    let mut builder = PipelineRunnerBuilder::default();
    builder
        .set_build_threads(BuildThreads::Count(2))
        .set_build_timeout(Duration::from_millis(50));

    let (sender, receiver) = mpsc::channel();
    let run_backend = backend.clone();
    thread::spawn(move || {
        let result = run_with(
            builder,
            &store,
            &run_backend,
            corpus(&["s.T.wedged", "s.T.fine"]),
            None,
        );
        let stalled = match result {
            Err(RunError::BuildStalled {
                expected, found, ..
            }) => Some((expected, found)),
            _ => None,
        };
        sender.send(stalled).unwrap();
    });

    let stalled = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("run returned while a build was still in progress");
    let (expected, found) = stalled.expect("run failed with BuildStalled");
    assert_eq!(expected, 2);
    assert!(found <= 1, "the wedged test can't have been drained");

    let calls = backend.calls();
    assert!(calls.ran.is_empty(), "nothing runs before the first test");
    assert_eq!(calls.cleaned, Vec::<String>::new());
}

#[test]
fn empty_corpus() {
    let store = ExpectationStore::empty();
    let backend = StubBackend::new();

    let report = run_simple(&store, &backend, &[]);

    assert!(report.runs.is_empty());
    assert_eq!(report.stats.final_run_count, 0);
    assert_eq!(backend.calls().prepared, 1);
}
