// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    coverage::CommandCoverage,
    output::{OutputContext, OutputFormat, OutputOpts},
    reporter::{ReporterOpts, TestReporter},
    runner::{RunStats, TestRunnerOpts, TestStatus},
    signal::SignalHandler,
    stopwatch::StopwatchStart,
    test_list::TestList,
};
use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use std::fs;
use structopt::StructOpt;
use termcolor::BufferWriter;

/// Orchestrates a suite of functional-test units, each an independent executable, as parallel
/// child processes.
#[derive(Debug, StructOpt)]
#[structopt(name = "functest-runner", rename_all = "kebab-case")]
pub struct Opts {
    #[structopt(flatten)]
    output: OutputOpts,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// List the test units selected for a run
    List {
        /// Output format
        #[structopt(short = "T", long, default_value, possible_values = &OutputFormat::variants(), case_insensitive = true)]
        format: OutputFormat,

        #[structopt(flatten)]
        selection: TestSelection,
    },
    /// Run test units
    Run {
        #[structopt(flatten)]
        selection: TestSelection,

        #[structopt(flatten)]
        runner_opts: TestRunnerOpts,

        #[structopt(flatten)]
        reporter_opts: ReporterOpts,

        /// Generate a coverage report for the command interface
        #[structopt(long)]
        coverage: bool,

        /// Stop execution after the first test failure
        #[structopt(long)]
        failfast: bool,

        /// Root directory for per-test working directories [default: system temp dir]
        #[structopt(short = "t", long)]
        tmpdir_prefix: Option<Utf8PathBuf>,

        /// Extra argument passed through to every unit (repeatable)
        #[structopt(short = "a", long = "test-arg", number_of_values = 1)]
        test_args: Vec<String>,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct TestSelection {
    /// Directory containing the test unit programs
    #[structopt(long)]
    tests_dir: Utf8PathBuf,

    /// Comma-separated list of test names to exclude
    #[structopt(short = "x", long, use_delimiter = true)]
    exclude: Vec<String>,

    /// Test unit names; a name may embed extra arguments ("unit --flag")
    #[structopt(required = true)]
    names: Vec<String>,
}

impl TestSelection {
    fn compute(&self) -> Result<TestList> {
        TestList::new(self.names.iter().cloned(), &self.exclude)
    }
}

impl Opts {
    /// Execute the selected command.
    pub fn exec(self) -> Result<()> {
        let output = self.output.init();

        match self.command {
            Command::List { format, selection } => {
                let test_list = selection.compute()?;
                let stdout = BufferWriter::stdout(output.color.color_choice(atty::Stream::Stdout));
                let mut buffer = stdout.buffer();
                test_list.write(format, &mut buffer)?;
                stdout.print(&buffer).context("error writing output")?;
                Ok(())
            }
            Command::Run {
                selection,
                runner_opts,
                reporter_opts,
                coverage,
                failfast,
                tmpdir_prefix,
                test_args,
            } => run_tests(
                output,
                &selection,
                runner_opts,
                reporter_opts,
                coverage,
                failfast,
                tmpdir_prefix,
                test_args,
            ),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_tests(
    output: OutputContext,
    selection: &TestSelection,
    runner_opts: TestRunnerOpts,
    reporter_opts: ReporterOpts,
    coverage: bool,
    failfast: bool,
    tmpdir_prefix: Option<Utf8PathBuf>,
    test_args: Vec<String>,
) -> Result<()> {
    let test_list = selection.compute()?;
    if test_list.is_empty() {
        log::warn!("No test units selected after exclusions; nothing to run.");
        return Ok(());
    }

    // Create the base test directory. Every job gets its own subdirectory; the root outlives
    // the run unless every unit cleaned up after itself.
    let tmpdir_root = match tmpdir_prefix {
        Some(prefix) => prefix,
        None => Utf8PathBuf::try_from(std::env::temp_dir())
            .context("system temp directory is not valid UTF-8")?,
    };
    let tmpdir = tmpdir_root.join(format!(
        "functest_runner_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    fs::create_dir_all(&tmpdir)
        .with_context(|| format!("failed to create test directory '{}'", tmpdir))?;
    log::debug!("Temporary test directory at {}", tmpdir);

    let coverage = if coverage {
        Some(CommandCoverage::create()?)
    } else {
        None
    };

    let mut flags = test_args;
    if let Some(coverage) = &coverage {
        flags.push(coverage.flag());
    }

    let handler = SignalHandler::install()?;
    let stopwatch = StopwatchStart::now();
    let reporter = TestReporter::new(&test_list, output.color, reporter_opts);

    let initial_run_count = test_list.len();
    let mut runner = runner_opts.build(
        test_list,
        &selection.tests_dir,
        &tmpdir,
        flags,
        handler.canceled_flag(),
    )?;

    let mut stats = RunStats {
        initial_run_count,
        ..RunStats::default()
    };
    let mut results = Vec::with_capacity(initial_run_count);

    let run_result = (|| -> Result<()> {
        for _ in 0..initial_run_count {
            let completed = runner.get_next()?;
            reporter.report_result(&completed)?;
            stats.on_test_finished(completed.result.status);
            let failed = completed.result.status == TestStatus::Failed;
            results.push(completed.result);
            if failed && failfast {
                log::debug!("Early exiting after test failure");
                break;
            }
        }
        Ok(())
    })();

    // A no-op unless the loop above exited early, in which case dangling processes must be
    // killed and reaped before the run exits.
    runner.kill_and_join()?;
    run_result?;

    reporter.print_summary(&mut results, stats, stopwatch.elapsed())?;

    if let Some(coverage) = &coverage {
        coverage.report(output.color)?;
        log::debug!("Cleaning up coverage data");
    }
    drop(coverage);

    // Clear up the temp directory if all the units cleaned up behind themselves.
    if fs::read_dir(&tmpdir)?.next().is_none() {
        fs::remove_dir(&tmpdir)?;
    }

    if !stats.is_success() {
        bail!("test run failed");
    }
    Ok(())
}
