// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The coordinator at the heart of the runner.
//!
//! A [`TestRunner`] owns a FIFO queue of pending [`TestSpec`]s and a bounded set of in-flight
//! [`TestJob`]s. Callers pull completed jobs out one at a time with [`TestRunner::get_next`],
//! which lets them apply policy (fail-fast, cancellation) without the coordinator knowing about
//! it. Parallelism is process-level only: the coordinator itself is single-threaded and polls
//! its children cooperatively.

use crate::{
    stopwatch::StopwatchStart,
    test_list::{TestList, TestSpec},
};
use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use duct::cmd;
use std::{
    collections::VecDeque,
    fmt, fs,
    fs::File,
    io::{Read, Seek, SeekFrom},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use structopt::StructOpt;

/// Exit code a unit uses to report success. Stderr must also be empty for the unit to pass.
pub const EXIT_PASSED: i32 = 0;

/// Reserved exit code a unit uses to report that it skipped itself.
pub const EXIT_SKIPPED: i32 = 77;

/// Number of distinct port-range seeds available to concurrently-running units.
pub const SEED_RANGE: u64 = 625;

/// How long the coordinator sleeps between polls of the in-flight set.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Test runner options.
#[derive(Debug, Default, StructOpt)]
#[structopt(rename_all = "kebab-case")]
pub struct TestRunnerOpts {
    /// Number of tests to run simultaneously [default: logical CPU count]
    #[structopt(short = "j", long)]
    pub jobs: Option<usize>,

    /// Seconds a unit may run before it is asked to stop [default: no timeout]
    #[structopt(long)]
    pub timeout: Option<u64>,
}

impl TestRunnerOpts {
    /// Creates a new test runner over the given list.
    ///
    /// `flags` are appended to every unit invocation ahead of the per-job flags; `canceled` is
    /// checked on every poll tick so a top-level signal can stop the run promptly.
    pub fn build(
        self,
        test_list: TestList,
        tests_dir: &Utf8Path,
        tmpdir: &Utf8Path,
        flags: Vec<String>,
        canceled: Arc<AtomicBool>,
    ) -> Result<TestRunner> {
        let jobs = self.jobs.unwrap_or_else(num_cpus::get);
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        let tests_dir = tests_dir
            .canonicalize()
            .with_context(|| format!("tests directory '{}' not found", tests_dir))?;
        let tests_dir =
            Utf8PathBuf::try_from(tests_dir).context("tests directory is not valid UTF-8")?;
        Ok(TestRunner {
            jobs,
            timeout: self.timeout.map(Duration::from_secs),
            tests_dir,
            tmpdir: tmpdir.to_owned(),
            flags,
            pending: test_list.into_specs().into(),
            running: Vec::new(),
            seed_offset: seed_offset(),
            canceled,
        })
    }
}

/// Coordinates one orchestration run. Not restartable: once every spec has been pulled through
/// [`get_next`](Self::get_next), the runner is spent.
pub struct TestRunner {
    jobs: usize,
    timeout: Option<Duration>,
    tests_dir: Utf8PathBuf,
    tmpdir: Utf8PathBuf,
    flags: Vec<String>,
    pending: VecDeque<TestSpec>,
    running: Vec<TestJob>,
    seed_offset: u64,
    canceled: Arc<AtomicBool>,
}

impl TestRunner {
    /// Blocks until one in-flight job has terminated, then classifies and returns it.
    ///
    /// Free slots are refilled from the pending queue (in submission order) before waiting.
    /// Calling this when nothing is pending or running is a caller contract violation and
    /// returns an error.
    pub fn get_next(&mut self) -> Result<CompletedTest> {
        self.fill_slots()?;
        if self.running.is_empty() {
            bail!("get_next called with no tests pending or running");
        }

        loop {
            if self.canceled.load(Ordering::Acquire) {
                bail!("termination signal received, canceling test run");
            }

            if let Some(timeout) = self.timeout {
                for job in &mut self.running {
                    if !job.interrupt_sent() && job.elapsed() > timeout {
                        log::debug!(
                            "{} exceeded the {}s timeout, sending interrupt",
                            job.spec().name(),
                            timeout.as_secs()
                        );
                        job.request_stop();
                    }
                }
            }

            // Return the first job that has terminated. A job stays tracked until its process
            // has actually exited, even if it was interrupted long ago.
            for idx in 0..self.running.len() {
                if self.running[idx].is_finished()? {
                    let job = self.running.swap_remove(idx);
                    return job.into_completed();
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Number of specs that have not been started yet.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of jobs currently in flight.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Force-kills every still-running job and blocks until each has been reaped.
    ///
    /// This is the only path that guarantees no orphaned child processes after an early exit.
    /// A no-op when nothing is in flight.
    pub fn kill_and_join(&mut self) -> Result<()> {
        for job in &self.running {
            job.force_stop();
        }
        for job in self.running.drain(..) {
            job.join()?;
        }
        Ok(())
    }

    // ---
    // Helper methods
    // ---

    fn fill_slots(&mut self) -> Result<()> {
        while self.running.len() < self.jobs {
            let spec = match self.pending.pop_front() {
                Some(spec) => spec,
                None => break,
            };
            let seed = allocate_seed(self.pending.len(), self.seed_offset);
            let testdir = self.tmpdir.join(format!("{}_{}", spec.workdir_stem(), seed));
            fs::create_dir_all(&testdir)
                .with_context(|| format!("failed to create test directory '{}'", testdir))?;
            let job = TestJob::start(
                spec,
                &self.tests_dir,
                testdir,
                seed,
                &self.flags,
                &self.tmpdir,
            )?;
            self.running.push(job);
        }
        debug_assert!(self.running.len() <= self.jobs, "worker bound respected");
        Ok(())
    }
}

/// Computes the port-range seed for a job dequeued with `pending` specs left behind it.
///
/// The pending count strictly decreases with every dequeue, so seeds are pairwise distinct
/// within a run without any shared counter. Across separate runs only the time-derived offset
/// keeps seeds apart, which is acceptable because each run gets an isolated directory root.
fn allocate_seed(pending: usize, offset: u64) -> u64 {
    pending as u64 + offset
}

/// A pseudorandom per-run offset, to hop over ports left bound by zombie daemons from
/// earlier runs.
fn seed_offset() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis();
    (millis % SEED_RANGE as u128) as u64
}

/// One in-flight unit: the child process handle plus everything needed to classify it later.
pub struct TestJob {
    spec: TestSpec,
    testdir: Utf8PathBuf,
    stopwatch: StopwatchStart,
    interrupt_sent: bool,
    state: JobState,
}

enum JobState {
    /// The child is (or was) running; capture files receive its output.
    Running {
        handle: duct::Handle,
        stdout: File,
        stderr: File,
    },
    /// The child never started. Reported as an immediate failure with the spawn error standing
    /// in for stderr.
    SpawnFailed { error: String },
}

impl TestJob {
    /// Launches a unit. The child's argv is the spec's own arguments, then the run-level flags,
    /// then the per-job `--portseed` and `--tmpdir` flags.
    ///
    /// Stdout and stderr are redirected into anonymous temp files under the run root so a
    /// verbose unit spills to disk instead of exhausting memory. A spawn error is folded into
    /// the job rather than propagated: the unit still yields exactly one result.
    fn start(
        spec: TestSpec,
        tests_dir: &Utf8Path,
        testdir: Utf8PathBuf,
        seed: u64,
        flags: &[String],
        tmpdir: &Utf8Path,
    ) -> Result<Self> {
        let stopwatch = StopwatchStart::now();
        let program = tests_dir.join(spec.program());

        let mut args: Vec<String> = spec.extra_args().to_vec();
        args.extend(flags.iter().cloned());
        args.push(format!("--portseed={}", seed));
        args.push(format!("--tmpdir={}", testdir));

        let stdout_file = camino_tempfile::tempfile_in(tmpdir)
            .context("failed to create stdout capture file")?;
        let stderr_file = camino_tempfile::tempfile_in(tmpdir)
            .context("failed to create stderr capture file")?;
        let stdout_read = stdout_file.try_clone().context("failed to clone capture file")?;
        let stderr_read = stderr_file.try_clone().context("failed to clone capture file")?;

        let expression = cmd(program.as_std_path(), &args)
            .dir(testdir.as_std_path())
            .stdout_file(stdout_file)
            .stderr_file(stderr_file)
            .unchecked();

        let state = match expression.start() {
            Ok(handle) => JobState::Running {
                handle,
                stdout: stdout_read,
                stderr: stderr_read,
            },
            Err(err) => JobState::SpawnFailed {
                error: format!("failed to launch '{}': {}", program, err),
            },
        };

        Ok(Self {
            spec,
            testdir,
            stopwatch,
            interrupt_sent: false,
            state,
        })
    }

    /// The spec this job was started from.
    pub fn spec(&self) -> &TestSpec {
        &self.spec
    }

    /// Time since the job was started.
    pub fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }

    /// True once the graceful interrupt tier has been used on this job.
    pub fn interrupt_sent(&self) -> bool {
        self.interrupt_sent
    }

    /// Asks the unit to stop gracefully, giving it a chance to flush state before exiting.
    ///
    /// The job is not removed from tracking: whatever exit condition the interrupt produces is
    /// classified like any other.
    #[cfg(unix)]
    pub fn request_stop(&mut self) {
        if let JobState::Running { handle, .. } = &self.state {
            for pid in handle.pids() {
                // The child may have exited between the poll and this call; a stale pid is fine.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGINT);
                }
            }
        }
        self.interrupt_sent = true;
    }

    /// Asks the unit to stop. There is no interrupt analogue on this platform, so this
    /// escalates straight to a kill.
    #[cfg(not(unix))]
    pub fn request_stop(&mut self) {
        self.force_stop();
        self.interrupt_sent = true;
    }

    /// Forcibly terminates the unit. The caller must still [`join`](Self::join) to reap it.
    pub fn force_stop(&self) {
        if let JobState::Running { handle, .. } = &self.state {
            let _ = handle.kill();
        }
    }

    /// Blocks until the child has been reaped, discarding its outcome.
    pub fn join(self) -> Result<()> {
        if let JobState::Running { handle, .. } = &self.state {
            handle
                .wait()
                .with_context(|| format!("failed to reap '{}'", self.spec.name()))?;
        }
        Ok(())
    }

    fn is_finished(&self) -> Result<bool> {
        match &self.state {
            JobState::Running { handle, .. } => Ok(handle
                .try_wait()
                .with_context(|| format!("failed to poll '{}'", self.spec.name()))?
                .is_some()),
            JobState::SpawnFailed { .. } => Ok(true),
        }
    }

    /// Reaps the terminated child, drains its captured output, and classifies the outcome.
    fn into_completed(self) -> Result<CompletedTest> {
        let time_taken = self.stopwatch.end().duration;
        let (status, stdout, stderr) = match self.state {
            JobState::Running {
                handle,
                stdout,
                stderr,
            } => {
                let output = handle
                    .wait()
                    .with_context(|| format!("failed to reap '{}'", self.spec.name()))?;
                let stdout = drain_capture(stdout).context("failed to read captured stdout")?;
                let stderr = drain_capture(stderr).context("failed to read captured stderr")?;
                (
                    TestStatus::classify(output.status.code(), &stderr),
                    stdout,
                    stderr,
                )
            }
            JobState::SpawnFailed { error } => {
                (TestStatus::Failed, Vec::new(), error.into_bytes())
            }
        };

        Ok(CompletedTest {
            result: TestResult {
                name: self.spec.name().to_owned(),
                status,
                time_taken,
            },
            testdir: self.testdir,
            stdout,
            stderr,
        })
    }
}

fn drain_capture(mut file: File) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// A job that has reached a terminal status, with everything the caller needs to report it.
#[derive(Clone, Debug)]
pub struct CompletedTest {
    pub result: TestResult,
    /// The job's working directory, left intact for post-mortem inspection.
    pub testdir: Utf8PathBuf,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// The terminal record for one unit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub time_taken: Duration,
}

impl TestResult {
    /// A skipped unit is not a failure; only `Failed` counts against the run.
    pub fn was_successful(&self) -> bool {
        self.status != TestStatus::Failed
    }
}

/// Terminal status of a unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    /// Classifies a terminated child from its exit code and captured stderr.
    ///
    /// A unit that writes to stderr is treated as failed even if it exits cleanly: stderr
    /// output signals an unexpected condition the unit itself flagged. Signal deaths surface
    /// as a missing exit code and land in the failure arm.
    pub fn classify(exit_code: Option<i32>, stderr: &[u8]) -> TestStatus {
        match exit_code {
            Some(EXIT_SKIPPED) => TestStatus::Skipped,
            Some(EXIT_PASSED) if stderr.is_empty() => TestStatus::Passed,
            _ => TestStatus::Failed,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TestStatus::Passed => f.pad("Passed"),
            TestStatus::Failed => f.pad("Failed"),
            TestStatus::Skipped => f.pad("Skipped"),
        }
    }
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug)]
pub struct RunStats {
    /// The total number of tests that were expected to be run at the beginning.
    ///
    /// If the test run stops early, this will be more than `final_run_count`.
    pub initial_run_count: usize,

    /// The total number of tests that actually produced a result.
    pub final_run_count: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed.
    pub failed: usize,

    /// The number of tests that skipped themselves.
    pub skipped: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success: no unit reached the `Failed` status.
    /// Skips never count against the run.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Records one terminal result.
    pub fn on_test_finished(&mut self, status: TestStatus) {
        self.final_run_count += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_classify() {
        assert_eq!(TestStatus::classify(Some(0), b""), TestStatus::Passed);
        assert_eq!(
            TestStatus::classify(Some(77), b""),
            TestStatus::Skipped,
            "skip code wins"
        );
        assert_eq!(
            TestStatus::classify(Some(77), b"deliberately skipped"),
            TestStatus::Skipped,
            "skip code wins even with stderr output"
        );
        assert_eq!(TestStatus::classify(Some(1), b""), TestStatus::Failed);
        assert_eq!(
            TestStatus::classify(Some(0), b"boom"),
            TestStatus::Failed,
            "stderr output fails a clean exit"
        );
        assert_eq!(
            TestStatus::classify(None, b""),
            TestStatus::Failed,
            "signal death => failure"
        );
    }

    #[test]
    fn test_is_success() {
        assert!(RunStats::default().is_success(), "empty run => success");
        assert!(
            RunStats {
                initial_run_count: 42,
                final_run_count: 42,
                passed: 41,
                skipped: 1,
                ..RunStats::default()
            }
            .is_success(),
            "skipped => not considered a failure"
        );
        assert!(
            !RunStats {
                initial_run_count: 42,
                final_run_count: 42,
                passed: 41,
                failed: 1,
                ..RunStats::default()
            }
            .is_success(),
            "failed => failure"
        );
    }

    proptest! {
        // Overlapping jobs must never share a seed, or their derived port ranges collide.
        #[test]
        fn proptest_seeds_pairwise_distinct(
            offset in 0u64..SEED_RANGE,
            count in 0usize..100,
        ) {
            let seeds: Vec<_> = (0..count)
                .rev()
                .map(|pending| allocate_seed(pending, offset))
                .collect();
            let unique: HashSet<_> = seeds.iter().copied().collect();
            prop_assert_eq!(unique.len(), seeds.len(), "seeds are pairwise distinct");
        }
    }
}
