// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{OutputContext, OutputOpts, StderrStyles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use stagerun_metadata::StagerunExitCode;
use stagerun_runner::{
    config::{BuildThreads, DrainOrder, StagerunConfig, StagerunProfile},
    discovery::{ListFileFinder, SourcePathFinder, TestCorpus, TestFinder},
    expectations::ExpectationStore,
    reporter::{JunitReportSink, ReportSink},
    runner::{PipelineRunnerBuilder, RunStats},
};
use std::{
    io::{BufWriter, Write},
    sync::Arc,
};
use tracing::{info, warn};

/// A pipelined test runner for slow target environments.
///
/// Tests are built and installed in parallel while the tests that are already installed run one
/// at a time. Each result is judged against the expectations that apply to the test.
#[derive(Debug, Parser)]
#[command(version, name = "stagerun")]
pub struct StagerunApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl StagerunApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.config_opts.make_config()?;
        match self.command {
            Command::List { discover_opts } => {
                let discovered = discover_opts.discover(&config)?;
                list_tests(&discovered)
            }
            Command::Run {
                discover_opts,
                runner_opts,
            } => {
                let discovered = discover_opts.discover(&config)?;
                run_tests(discovered, &runner_opts, output)
            }
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Project root that config-relative paths are resolved against
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    root: Utf8PathBuf,

    /// Config file [default: <root>/.config/stagerun.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self) -> Result<StagerunConfig> {
        Ok(StagerunConfig::from_sources(
            &self.root,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List discovered tests along with their expected results
    List {
        #[clap(flatten)]
        discover_opts: DiscoverOpts,
    },
    /// Build and run tests
    Run {
        #[clap(flatten)]
        discover_opts: DiscoverOpts,

        #[clap(flatten)]
        runner_opts: RunnerOpts,
    },
}

#[derive(Debug, Args)]
struct DiscoverOpts {
    /// Configuration profile to use
    #[arg(
        long,
        short = 'P',
        env = "STAGERUN_PROFILE",
        default_value = StagerunConfig::DEFAULT_PROFILE,
    )]
    profile: String,

    /// Additional expectations files, applied after those in the profile
    #[arg(long, value_name = "FILE")]
    expectations: Vec<Utf8PathBuf>,

    /// Files to discover tests in (`.tests` lists or test sources)
    #[arg(value_name = "FILES", required = true)]
    files: Vec<Utf8PathBuf>,
}

impl DiscoverOpts {
    fn discover<'cfg>(&self, config: &'cfg StagerunConfig) -> Result<Discovered<'cfg>> {
        let profile = config.profile(&self.profile)?;

        let mut expectation_files = profile.expectations();
        expectation_files.extend(self.expectations.iter().cloned());
        let store = ExpectationStore::load(&expectation_files)?;

        let finders: Vec<Box<dyn TestFinder>> = vec![
            Box::new(ListFileFinder::new()),
            Box::new(SourcePathFinder::new(config.root())),
        ];
        let corpus = TestCorpus::discover(&self.files, &finders)?;

        Ok(Discovered {
            profile,
            store,
            corpus,
            files: self.files.clone(),
        })
    }
}

#[derive(Debug, Args)]
struct RunnerOpts {
    /// Number of build threads [possible values: integer or "num-cpus"]
    #[arg(
        long,
        short = 'j',
        visible_alias = "build-threads",
        value_name = "THREADS",
        allow_negative_numbers = true
    )]
    jobs: Option<BuildThreads>,

    /// Directory to write JUnit reports to
    #[arg(long, value_name = "DIR")]
    junit_dir: Option<Utf8PathBuf>,

    /// Order in which built tests are executed [possible values: submission, arrival]
    #[arg(long, value_name = "ORDER")]
    drain_order: Option<DrainOrder>,
}

struct Discovered<'cfg> {
    profile: StagerunProfile<'cfg>,
    store: ExpectationStore,
    corpus: TestCorpus,
    files: Vec<Utf8PathBuf>,
}

fn list_tests(discovered: &Discovered<'_>) -> Result<i32> {
    let mut writer = BufWriter::new(std::io::stdout().lock());
    for test_run in discovered.corpus.iter() {
        let expected = discovered.store.resolve(test_run.qualified_name());
        writeln!(writer, "{} {expected}", test_run.qualified_name())
            .map_err(|err| ExpectedError::WriteError { err })?;
    }
    writer
        .flush()
        .map_err(|err| ExpectedError::WriteError { err })?;

    Ok(StagerunExitCode::OK)
}

fn run_tests(discovered: Discovered<'_>, opts: &RunnerOpts, output: OutputContext) -> Result<i32> {
    let Discovered {
        profile,
        store,
        corpus,
        files,
    } = discovered;

    if corpus.is_empty() {
        return Err(ExpectedError::NoTestsFound { files });
    }

    let mut builder = PipelineRunnerBuilder::default();
    builder
        .set_build_threads(opts.jobs.unwrap_or_else(|| profile.build_threads()))
        .set_queue_capacity(profile.queue_capacity())
        .set_build_timeout(profile.build_timeout())
        .set_drain_order(opts.drain_order.unwrap_or_else(|| profile.drain_order()))
        .set_verbose(output.verbose || profile.verbose());

    let runner = builder.build(Arc::new(store), Arc::new(profile.command_backend()))?;

    let junit_dir = opts.junit_dir.clone().or_else(|| profile.junit_dir());
    let sink = junit_dir.as_deref().map(JunitReportSink::new);
    let report = runner.run(corpus, sink.as_ref().map(|sink| sink as &dyn ReportSink))?;

    log_summary(&report.stats, junit_dir.as_deref(), &output.stderr_styles());
    if report.stats.is_success() {
        Ok(StagerunExitCode::OK)
    } else {
        Ok(StagerunExitCode::TEST_RUN_FAILED)
    }
}

fn log_summary(stats: &RunStats, junit_dir: Option<&Utf8Path>, styles: &StderrStyles) {
    info!(
        "Summary: {} tests run: {} {}, {} {}, {} {}",
        stats.final_run_count,
        stats.passed,
        "passed".style(styles.pass),
        stats.failed,
        "failed".style(styles.fail),
        stats.unsupported,
        "unsupported".style(styles.skip),
    );
    if let Some(dir) = junit_dir {
        info!("JUnit reports are in `{}`", dir.style(styles.bold));
    }
    if stats.initial_run_count > stats.final_run_count {
        warn!(
            "{} of {} tests were not run",
            stats.initial_run_count - stats.final_run_count,
            stats.initial_run_count
        );
    }
}
