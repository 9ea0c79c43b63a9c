// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::context::RunContext;
use crate::{
    backend::ExecutionBackend,
    config::{BuildThreads, DrainOrder},
    discovery::TestCorpus,
    errors::{BackendError, RunError, TestRunnerBuildError},
    expectations::ExpectationStore,
    reporter::ReportSink,
    stopwatch::StopwatchStart,
    test_run::{ExecutionTiming, TestResult, TestRun},
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    any::Any,
    collections::{BTreeMap, VecDeque},
    iter::Enumerate,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
    vec,
};
use tracing::{debug, info, warn};

/// The number of built tests that may wait for execution, unless configured otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// How long the drain loop waits for the next built test, unless configured otherwise.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(300);

/// Pipeline runner options.
#[derive(Debug, Default)]
pub struct PipelineRunnerBuilder {
    build_threads: Option<BuildThreads>,
    queue_capacity: Option<NonZeroUsize>,
    build_timeout: Option<Duration>,
    drain_order: DrainOrder,
    verbose: bool,
}

impl PipelineRunnerBuilder {
    /// Sets the number of threads used to build and install tests.
    pub fn set_build_threads(&mut self, build_threads: BuildThreads) -> &mut Self {
        self.build_threads = Some(build_threads);
        self
    }

    /// Sets how many built tests may wait for execution.
    ///
    /// Together with the number of build threads, this also bounds how far building runs ahead
    /// of execution.
    pub fn set_queue_capacity(&mut self, queue_capacity: NonZeroUsize) -> &mut Self {
        self.queue_capacity = Some(queue_capacity);
        self
    }

    /// Sets how long execution waits for the next built test before the run is aborted.
    pub fn set_build_timeout(&mut self, build_timeout: Duration) -> &mut Self {
        self.build_timeout = Some(build_timeout);
        self
    }

    /// Sets the order in which built tests are executed.
    pub fn set_drain_order(&mut self, drain_order: DrainOrder) -> &mut Self {
        self.drain_order = drain_order;
        self
    }

    /// If set, the output of passing tests is logged at `info` level.
    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Creates a new pipeline runner.
    ///
    /// The store and backend are shared with the build pool's threads, which can outlive a run
    /// whose build stalled.
    pub fn build(
        self,
        expectations: Arc<ExpectationStore>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Result<PipelineRunner, TestRunnerBuildError> {
        let build_threads = self
            .build_threads
            .unwrap_or(BuildThreads::NumCpus)
            .compute();
        let build_pool = ThreadPoolBuilder::new()
            .num_threads(build_threads)
            .thread_name(|idx| format!("stagerun-build-{idx}"))
            .build()?;

        Ok(PipelineRunner {
            expectations,
            backend,
            build_pool,
            build_threads,
            queue_capacity: self
                .queue_capacity
                .map_or(DEFAULT_QUEUE_CAPACITY, NonZeroUsize::get),
            build_timeout: self.build_timeout.unwrap_or(DEFAULT_BUILD_TIMEOUT),
            drain_order: self.drain_order,
            verbose: self.verbose,
        })
    }
}

/// Context for running tests through the build and execute pipeline.
///
/// Created using [`PipelineRunnerBuilder::build`].
pub struct PipelineRunner {
    expectations: Arc<ExpectationStore>,
    backend: Arc<dyn ExecutionBackend>,
    build_pool: ThreadPool,
    build_threads: usize,
    queue_capacity: usize,
    build_timeout: Duration,
    drain_order: DrainOrder,
    verbose: bool,
}

impl PipelineRunner {
    /// Builds and executes every test in `corpus`.
    ///
    /// Tests are built in parallel on the build pool and executed one at a time on the calling
    /// thread. Failures of individual tests are recorded on the returned test runs. An error is
    /// only returned if the backend can't be prepared, if building stalls for longer than the
    /// build timeout, or if writing reports fails.
    ///
    /// Building stays at most `queue_capacity + build_threads` tests ahead of execution. If the
    /// run is aborted, builds that are still in progress are abandoned rather than waited for.
    pub fn run(
        &self,
        corpus: TestCorpus,
        sink: Option<&dyn ReportSink>,
    ) -> Result<RunReport, RunError> {
        let mut ctx = RunContext::new(corpus.len(), self.verbose, sink);
        info!("Running {} tests.", corpus.len());

        let shared = Arc::new(BuildShared {
            expectations: Arc::clone(&self.expectations),
            backend: Arc::clone(&self.backend),
            canceled: AtomicBool::new(false),
        });
        let (sender, receiver) = crossbeam_channel::bounded(self.queue_capacity);
        let mut dispatcher = Dispatcher {
            pool: &self.build_pool,
            shared: Arc::clone(&shared),
            tests: corpus.into_iter().enumerate(),
            sender: Some(sender),
            dispatched: 0,
            window: self.queue_capacity + self.build_threads,
        };
        dispatcher.fill(0);

        let result = self
            .prepare()
            .and_then(|()| self.drain(&receiver, &mut dispatcher, &mut ctx));
        if result.is_err() {
            // Workers that haven't started yet skip the backend. Those blocked on a full queue
            // are unblocked once the receiver is dropped.
            shared.canceled.store(true, Ordering::Release);
        }
        drop(dispatcher);
        drop(receiver);
        result?;

        ctx.finish()
    }

    // ---
    // Helper methods
    // ---

    fn prepare(&self) -> Result<(), RunError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.backend.prepare())) {
            Ok(result) => result.map_err(RunError::Prepare),
            Err(payload) => Err(RunError::Prepare(BackendError::Panicked {
                message: panic_message(&*payload),
            })),
        }
    }

    fn drain(
        &self,
        receiver: &Receiver<BuiltTest>,
        dispatcher: &mut Dispatcher<'_>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), RunError> {
        let expected = ctx.initial_run_count();
        let mut pending = PendingTests::new(self.drain_order);
        let mut received = 0;
        let mut executed = 0;

        loop {
            while let Some(BuiltTest { index, test_run }) = pending.pop_ready() {
                debug!("executing test {index}; {} are ready to run", pending.len());
                self.execute(test_run, ctx);
                executed += 1;
                dispatcher.fill(executed);
            }
            if received == expected {
                return Ok(());
            }

            match receiver.recv_timeout(self.build_timeout) {
                Ok(built) => {
                    received += 1;
                    debug!(
                        "installed test {}; {} are ready to run",
                        built.index,
                        pending.len() + 1
                    );
                    pending.push(built);
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(RunError::BuildStalled {
                        expected,
                        found: received,
                        timeout: self.build_timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RunError::BuildDisconnected {
                        expected,
                        found: received,
                    });
                }
            }
        }
    }

    fn execute(&self, mut test_run: TestRun, ctx: &mut RunContext<'_>) {
        if test_run.result() == Some(TestResult::Unsupported) {
            debug!("skipping unsupported test {test_run}");
            let test_run = ctx.test_skipped(test_run);
            self.cleanup(test_run);
            return;
        }

        if test_run.is_runnable() {
            let stopwatch = StopwatchStart::now();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.backend.run_test(&mut test_run)));
            let end = stopwatch.end();
            test_run.set_timing(ExecutionTiming {
                start_time: end.start_time,
                time_taken: end.duration,
            });

            match outcome {
                Ok(Ok(())) if test_run.is_runnable() => {
                    let error = BackendError::NoResultRecorded {
                        name: test_run.qualified_name().to_owned(),
                    };
                    test_run.set_error(&error);
                }
                Ok(Ok(())) => {}
                Ok(Err(error)) => test_run.set_error(&error),
                Err(payload) => test_run.set_error(&BackendError::Panicked {
                    message: panic_message(&*payload),
                }),
            }
        }

        let test_run = ctx.test_finished(test_run);
        self.cleanup(test_run);
    }

    fn cleanup(&self, test_run: &TestRun) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.backend.cleanup(test_run)))
        {
            warn!(
                "cleanup for {test_run} panicked: {}",
                panic_message(&*payload)
            );
        }
    }
}

/// Hands tests to the build pool in submission order.
///
/// At most `window` tests are dispatched beyond the number already executed.
struct Dispatcher<'pool> {
    pool: &'pool ThreadPool,
    shared: Arc<BuildShared>,
    tests: Enumerate<vec::IntoIter<TestRun>>,
    // Dropped once every test has been dispatched, so a dead pool shows up as a disconnect.
    sender: Option<Sender<BuiltTest>>,
    dispatched: usize,
    window: usize,
}

impl Dispatcher<'_> {
    fn fill(&mut self, executed: usize) {
        while self.dispatched < executed + self.window {
            let Some(sender) = self.sender.clone() else {
                return;
            };
            let Some((index, test_run)) = self.tests.next() else {
                self.sender = None;
                return;
            };

            let shared = Arc::clone(&self.shared);
            self.pool.spawn_fifo(move || {
                let test_run = shared.build_one(test_run);
                // Failure to send means the run was aborted.
                let _ = sender.send(BuiltTest { index, test_run });
            });
            self.dispatched += 1;
        }
    }
}

/// State shared with build workers for the duration of a run, and possibly beyond it.
struct BuildShared {
    expectations: Arc<ExpectationStore>,
    backend: Arc<dyn ExecutionBackend>,
    canceled: AtomicBool,
}

impl BuildShared {
    /// Resolves the expectation for a test and builds it. Runs on the build pool.
    fn build_one(&self, mut test_run: TestRun) -> TestRun {
        if self.canceled.load(Ordering::Acquire) {
            return test_run;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.build_inner(&mut test_run))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => test_run.set_error(&error),
            Err(payload) => test_run.set_error(&BackendError::Panicked {
                message: panic_message(&*payload),
            }),
        }

        if test_run.expected_result().is_none() {
            test_run.set_expected_result(self.expectations.default_expectation());
        }
        test_run
    }

    fn build_inner(&self, test_run: &mut TestRun) -> Result<(), BackendError> {
        if test_run.expected_result().is_none() {
            test_run.set_expected_result(self.expectations.resolve(test_run.qualified_name()));
        }

        let unsupported = test_run
            .expected_result()
            .is_some_and(|expected| expected.result() == TestResult::Unsupported);
        if unsupported {
            debug!("not building unsupported test {test_run}");
            test_run.set_result(TestResult::Unsupported, Vec::new());
            return Ok(());
        }

        self.backend.build_and_install(test_run)
    }
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of tests that were expected to be run at the beginning.
    pub initial_run_count: usize,

    /// The total number of tests that were drained, including unsupported ones.
    pub final_run_count: usize,

    /// The number of tests whose result matched their expectation.
    pub passed: usize,

    /// The number of tests whose result didn't match their expectation.
    pub failed: usize,

    /// The number of tests that were skipped as unsupported.
    pub unsupported: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run is a failure if any test failed, or if not every test was drained.
    pub fn is_success(&self) -> bool {
        if self.initial_run_count > self.final_run_count {
            return false;
        }
        self.failed == 0
    }
}

/// The outcome of a completed run.
#[derive(Debug)]
pub struct RunReport {
    /// Every test run, in the order it was executed.
    pub runs: Vec<TestRun>,

    /// Counts of passing, failing and unsupported tests.
    pub stats: RunStats,

    /// The number of report files written, if a report sink was configured.
    pub reports_written: Option<usize>,
}

#[derive(Debug)]
struct BuiltTest {
    index: usize,
    test_run: TestRun,
}

/// Built tests that have been taken off the queue but not executed yet.
#[derive(Debug)]
enum PendingTests {
    // Keyed by submission index. Only the entry for `next` is ready.
    Submission {
        next: usize,
        buffer: BTreeMap<usize, TestRun>,
    },
    Arrival(VecDeque<BuiltTest>),
}

impl PendingTests {
    fn new(drain_order: DrainOrder) -> Self {
        match drain_order {
            DrainOrder::Submission => Self::Submission {
                next: 0,
                buffer: BTreeMap::new(),
            },
            DrainOrder::Arrival => Self::Arrival(VecDeque::new()),
        }
    }

    fn push(&mut self, built: BuiltTest) {
        match self {
            Self::Submission { buffer, .. } => {
                buffer.insert(built.index, built.test_run);
            }
            Self::Arrival(queue) => queue.push_back(built),
        }
    }

    fn pop_ready(&mut self) -> Option<BuiltTest> {
        match self {
            Self::Submission { next, buffer } => {
                let test_run = buffer.remove(next)?;
                let index = *next;
                *next += 1;
                Some(BuiltTest { index, test_run })
            }
            Self::Arrival(queue) => queue.pop_front(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Submission { buffer, .. } => buffer.len(),
            Self::Arrival(queue) => queue.len(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "(non-string panic payload)".to_owned()
    }
}
