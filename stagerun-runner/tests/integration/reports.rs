// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use stagerun_runner::{
    expectations::ExpectationStore,
    reporter::JunitReportSink,
    runner::PipelineRunnerBuilder,
    test_run::{ExpectedResult, TestResult},
};

#[test]
fn junit_reports_after_run() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let store = ExpectationStore::from_entries([(
        "j.Skip",
        ExpectedResult::new(TestResult::Unsupported),
    )]);
    let backend = StubBackend::new()
        .with_behavior("j.K.fails", Behavior::Run(TestResult::ExecFailed, &["assertion failed"]));
    let sink = JunitReportSink::new(dir.path().join("junit"));

    let report = run_with(
        PipelineRunnerBuilder::default(),
        &store,
        &backend,
        corpus(&["j.K.passes", "j.K.fails", "j.Skip.me"]),
        Some(&sink),
    )?;

    assert_eq!(report.reports_written, Some(2));
    let k = std::fs::read_to_string(sink.dir().join("TEST-j.K.xml"))?;
    ensure!(k.contains(r#"tests="2""#), "{k}");
    ensure!(k.contains(r#"failures="1""#), "{k}");
    ensure!(k.contains("assertion failed"), "{k}");
    let skip = std::fs::read_to_string(sink.dir().join("TEST-j.Skip.xml"))?;
    ensure!(skip.contains("<skipped"), "{skip}");
    Ok(())
}

#[cfg(unix)]
mod command_backend {
    use super::*;
    use pretty_assertions::assert_eq;
    use indoc::indoc;
    use stagerun_runner::{config::StagerunConfig, discovery::TestCorpus, test_run::TestRun};
    use std::sync::Arc;

    #[test]
    fn run_from_profile() -> Result<()> {
        let dir = Utf8TempDir::new()?;
        std::fs::create_dir_all(dir.path().join(".config"))?;
        std::fs::write(
            dir.path().join(".config/stagerun.toml"),
            indoc! {r#"
                [profile.ci]
                expectations = ["expectations.toml"]
                build-threads = 2

                [profile.ci.junit]
                dir = "junit"

                [profile.ci.backend]
                build = ["sh", "-c", "test {class} != e.Broken || { echo compile error; exit 1; }"]
                run = ["sh", "-c", "case {name} in *fails) echo broken; exit 1;; esac; echo ok"]
            "#},
        )?;
        std::fs::write(
            dir.path().join("expectations.toml"),
            indoc! {r#"
                [expectations]
                "e.Broken" = "COMPILE_FAILED"
                "e.Ok.fails" = { result = "EXEC_FAILED", pattern = "broken" }
            "#},
        )?;

        let config = StagerunConfig::from_sources(dir.path(), None)?;
        let profile = config.profile("ci")?;
        let store = Arc::new(ExpectationStore::load(profile.expectations())?);
        let backend = Arc::new(profile.command_backend());
        let sink = JunitReportSink::new(profile.junit_dir().unwrap());
        let mut builder = PipelineRunnerBuilder::default();
        builder
            .set_build_threads(profile.build_threads())
            .set_queue_capacity(profile.queue_capacity())
            .set_build_timeout(profile.build_timeout())
            .set_drain_order(profile.drain_order());
        let runner = builder.build(store, backend)?;

        let corpus = TestCorpus::new([
            TestRun::new("e.Ok.passes"),
            TestRun::new("e.Ok.fails"),
            TestRun::new("e.Broken.compiles"),
        ]);
        let report = runner.run(corpus, Some(&sink))?;

        let results: Vec<_> = report
            .runs
            .iter()
            .map(|test_run| (test_run.qualified_name(), test_run.result()))
            .collect();
        assert_eq!(
            results,
            vec![
                ("e.Ok.passes", Some(TestResult::Success)),
                ("e.Ok.fails", Some(TestResult::ExecFailed)),
                ("e.Broken.compiles", Some(TestResult::CompileFailed)),
            ]
        );
        ensure!(report.stats.is_success(), "{:?}", report.stats);
        assert_eq!(report.reports_written, Some(2));
        ensure!(
            dir.path().join("junit/TEST-e.Broken.xml").exists(),
            "junit report for e.Broken"
        );
        Ok(())
    }
}
