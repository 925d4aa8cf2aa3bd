// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting of test results to stdout.
//!
//! Passes and skips are logged at debug level as the run progresses; failures print their
//! captured output immediately and verbatim. Once the run is over the reporter renders the
//! results table, re-sorted by unit name so the output is deterministic no matter which jobs
//! finished first.

use crate::{
    output::Color,
    runner::{CompletedTest, RunStats, TestResult, TestStatus},
    test_list::TestList,
};
use anyhow::{Context, Result};
use camino::Utf8Path;
use std::{io, io::Write, time::Duration};
use structopt::StructOpt;
use termcolor::{BufferWriter, ColorSpec, WriteColor};
use walkdir::WalkDir;

#[derive(Debug, Default, StructOpt)]
#[structopt(rename_all = "kebab-case")]
pub struct ReporterOpts {
    /// Print a combined log (of length n lines) from the unit's working directory on failure
    #[structopt(short = "c", long, default_value = "0")]
    pub combined_logs_len: usize,
}

/// Functionality to report test results to stdout.
pub struct TestReporter {
    stdout: BufferWriter,
    opts: ReporterOpts,
    name_width: usize,
}

impl TestReporter {
    /// Creates a new instance with the given color choice.
    pub fn new(test_list: &TestList, color: Color, opts: ReporterOpts) -> Self {
        let stdout = BufferWriter::stdout(color.color_choice(atty::Stream::Stdout));
        let name_width = test_list
            .iter()
            .map(|spec| spec.name().len())
            .max()
            .unwrap_or_default()
            .max("TEST".len());
        Self {
            stdout,
            opts,
            name_width,
        }
    }

    /// Report one completed test. Failures print captured output immediately; passes and skips
    /// only show up in the debug log and the final table.
    pub fn report_result(&self, completed: &CompletedTest) -> Result<()> {
        let result = &completed.result;
        match result.status {
            TestStatus::Passed => {
                log::debug!(
                    "{} passed, Duration: {:.1} s",
                    result.name,
                    result.time_taken.as_secs_f64()
                );
            }
            TestStatus::Skipped => {
                log::debug!("{} skipped", result.name);
            }
            TestStatus::Failed => {
                let mut buffer = self.stdout.buffer();
                self.write_failure(completed, &mut buffer)?;
                self.stdout.print(&buffer).context("error writing output")?;
            }
        }
        Ok(())
    }

    /// Render the final results table, the aggregate line, and the total runtime.
    pub fn print_summary(
        &self,
        results: &mut [TestResult],
        stats: RunStats,
        wallclock: Duration,
    ) -> Result<()> {
        let mut buffer = self.stdout.buffer();
        self.write_summary(results, stats, wallclock, &mut buffer)?;
        self.stdout.print(&buffer).context("error writing output")
    }

    // ---
    // Helper methods
    // ---

    fn write_failure(
        &self,
        completed: &CompletedTest,
        mut writer: impl WriteColor,
    ) -> io::Result<()> {
        let result = &completed.result;

        writeln!(writer)?;
        writer.set_color(&bold_spec())?;
        write!(writer, "{}", result.name)?;
        writer.reset()?;
        writeln!(
            writer,
            " failed, Duration: {:.1} s\n",
            result.time_taken.as_secs_f64()
        )?;

        writer.set_color(&bold_spec())?;
        writeln!(writer, "stdout:")?;
        writer.reset()?;
        writer.write_all(&completed.stdout)?;
        writeln!(writer)?;

        writer.set_color(&bold_spec())?;
        writeln!(writer, "stderr:")?;
        writer.reset()?;
        writer.write_all(&completed.stderr)?;
        writeln!(writer)?;

        if self.opts.combined_logs_len > 0 && completed.testdir.is_dir() {
            let lines = combined_log_tail(&completed.testdir, self.opts.combined_logs_len)?;
            writer.set_color(&bold_spec())?;
            writeln!(
                writer,
                "Combined log for {} (last {} lines):",
                completed.testdir, self.opts.combined_logs_len
            )?;
            writer.reset()?;
            for line in lines {
                writeln!(writer, "{}", line)?;
            }
        }

        Ok(())
    }

    fn write_summary(
        &self,
        results: &mut [TestResult],
        stats: RunStats,
        wallclock: Duration,
        mut writer: impl WriteColor,
    ) -> io::Result<()> {
        // Completion order is nondeterministic; the table is not.
        results.sort_by_key(|result| result.name.to_lowercase());

        writeln!(writer)?;
        writer.set_color(&bold_spec())?;
        writeln!(
            writer,
            "{:<width$} | {:<9} | DURATION",
            "TEST",
            "STATUS",
            width = self.name_width
        )?;
        writer.reset()?;
        writeln!(writer)?;

        let mut time_sum = Duration::default();
        for result in results.iter() {
            time_sum += result.time_taken;
            writer.set_color(&status_spec(result.status))?;
            writeln!(
                writer,
                "{:<width$} | {:<9} | {:.1} s",
                result.name,
                result.status,
                result.time_taken.as_secs_f64(),
                width = self.name_width
            )?;
            writer.reset()?;
        }

        let (all_spec, all_label) = if stats.is_success() {
            (status_spec(TestStatus::Passed), "Passed")
        } else {
            (status_spec(TestStatus::Failed), "Failed")
        };
        writeln!(writer)?;
        writer.set_color(&all_spec)?;
        write!(
            writer,
            "{:<width$} | {:<9} | {:.1} s (accumulated)",
            "ALL",
            all_label,
            time_sum.as_secs_f64(),
            width = self.name_width
        )?;
        writer.reset()?;
        writeln!(writer)?;

        if stats.final_run_count < stats.initial_run_count {
            writeln!(
                writer,
                "{}/{} tests produced a result",
                stats.final_run_count, stats.initial_run_count
            )?;
        }
        writeln!(writer, "Runtime: {} s", wallclock.as_secs())?;
        Ok(())
    }
}

/// Collects the trailing `len` lines across all `*.log` files under the unit's working
/// directory, in path order. This is what failing units leave behind for diagnostics, so
/// nothing needs to be re-run to inspect it.
fn combined_log_tail(testdir: &Utf8Path, len: usize) -> io::Result<Vec<String>> {
    let mut lines = Vec::new();
    for entry in WalkDir::new(testdir).sort_by_file_name() {
        let entry = entry?;
        let is_log = entry.file_type().is_file()
            && entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.ends_with(".log"));
        if is_log {
            let contents = std::fs::read(entry.path())?;
            lines.extend(
                String::from_utf8_lossy(&contents)
                    .lines()
                    .map(str::to_owned),
            );
        }
    }
    let start = lines.len().saturating_sub(len);
    Ok(lines.split_off(start))
}

fn bold_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec.set_bold(true);
    color_spec
}

fn status_spec(status: TestStatus) -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    match status {
        TestStatus::Passed => {
            color_spec
                .set_fg(Some(termcolor::Color::Blue))
                .set_bold(true);
        }
        TestStatus::Failed => {
            color_spec.set_fg(Some(termcolor::Color::Red)).set_bold(true);
        }
        TestStatus::Skipped => {
            color_spec
                .set_fg(Some(termcolor::Color::Yellow))
                .set_bold(true);
        }
    }
    color_spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TestStatus;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use termcolor::NoColor;

    fn result(name: &str, status: TestStatus, secs: u64) -> TestResult {
        TestResult {
            name: name.to_owned(),
            status,
            time_taken: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_summary_sorted_by_name() {
        let list = TestList::new(["zeta", "Alpha", "beta"], &[]).expect("valid list");
        let reporter = TestReporter::new(&list, Color::Never, ReporterOpts::default());

        let mut results = vec![
            result("zeta", TestStatus::Passed, 3),
            result("beta", TestStatus::Failed, 1),
            result("Alpha", TestStatus::Skipped, 0),
        ];
        let mut stats = RunStats {
            initial_run_count: 3,
            ..RunStats::default()
        };
        for result in &results {
            stats.on_test_finished(result.status);
        }

        let mut buf = NoColor::new(vec![]);
        reporter
            .write_summary(&mut results, stats, Duration::from_secs(7), &mut buf)
            .expect("write succeeded");
        let output = String::from_utf8(buf.into_inner()).expect("valid UTF-8");

        let expected = "\n\
            TEST  | STATUS    | DURATION\n\
            \n\
            Alpha | Skipped   | 0.0 s\n\
            beta  | Failed    | 1.0 s\n\
            zeta  | Passed    | 3.0 s\n\
            \n\
            ALL   | Failed    | 4.0 s (accumulated)\n\
            Runtime: 7 s\n";
        assert_eq!(output, expected);
    }

    #[test]
    fn test_combined_log_tail() {
        let dir = camino_tempfile::tempdir().expect("created tempdir");
        let node1 = dir.path().join("node1");
        std::fs::create_dir(&node1).expect("created node1");
        std::fs::write(node1.join("debug.log"), "one\ntwo\nthree\n").expect("wrote log");
        std::fs::write(dir.path().join("notes.txt"), "ignored\n").expect("wrote notes");

        let lines = combined_log_tail(dir.path(), 2).expect("collected tail");
        assert_eq!(lines, ["two", "three"]);

        let all = combined_log_tail(dir.path(), 100).expect("collected tail");
        assert_eq!(all, ["one", "two", "three"]);
    }
}
