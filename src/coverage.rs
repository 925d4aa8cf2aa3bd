// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-coverage reporting.
//!
//! Coverage works by having each unit write the command identifiers it exercised into its own
//! fragment file under a shared coverage directory — the directory is handed to units via a
//! flag, and distinct fragment names keep the sharing append-only. After all units complete,
//! the fragments are merged by set union and diffed against a reference listing of every
//! command. The merge is a pure set operation, so the uncovered report is identical no matter
//! which order the jobs finished in.

use crate::output::Color;
use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use std::{collections::BTreeSet, fs, io, io::Write};
use termcolor::{BufferWriter, ColorSpec, WriteColor};
use walkdir::WalkDir;

/// The reference listing of every known command, one per line, deposited into the coverage
/// directory by the unit framework.
pub const REFERENCE_FILENAME: &str = "command_interface.txt";

/// Fragment files written by units share this prefix.
pub const COVERAGE_FILE_PREFIX: &str = "coverage.";

/// Coverage collection state for one run. Dropping it removes the coverage directory.
#[derive(Debug)]
pub struct CommandCoverage {
    dir: Utf8TempDir,
}

impl CommandCoverage {
    /// Creates the shared coverage directory.
    pub fn create() -> Result<Self> {
        let dir = camino_tempfile::Builder::new()
            .prefix("coverage")
            .tempdir()
            .context("failed to create coverage directory")?;
        log::debug!("Initializing coverage directory at {}", dir.path());
        Ok(Self { dir })
    }

    /// The directory units write their fragments into.
    pub fn dir(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// The flag appended to every unit invocation.
    pub fn flag(&self) -> String {
        format!("--coveragedir={}", self.dir.path())
    }

    /// Prints the commands that no unit exercised.
    pub fn report(&self, color: Color) -> Result<()> {
        let uncovered = self.uncovered_commands()?;
        let stdout = BufferWriter::stdout(color.color_choice(atty::Stream::Stdout));
        let mut buffer = stdout.buffer();
        write_report(&uncovered, &mut buffer)?;
        stdout.print(&buffer).context("error writing output")
    }

    /// Returns the set of commands present in the reference but absent from every fragment.
    ///
    /// The reference file is required: its absence means coverage capture was requested but the
    /// unit framework never initialized it.
    pub fn uncovered_commands(&self) -> Result<BTreeSet<String>> {
        let reference_path = self.dir().join(REFERENCE_FILENAME);
        if !reference_path.is_file() {
            bail!("no coverage reference found at '{}'", reference_path);
        }
        let reference = read_command_set(reference_path.as_ref())?;

        let mut covered = BTreeSet::new();
        for entry in WalkDir::new(self.dir()) {
            let entry = entry.context("failed to walk coverage directory")?;
            let is_fragment = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| name.starts_with(COVERAGE_FILE_PREFIX));
            if is_fragment {
                covered.extend(read_command_set(entry.path())?);
            }
        }

        Ok(diff(&reference, &covered))
    }
}

/// Commands in `reference` that `covered` is missing, sorted by the set's own ordering.
pub fn diff(reference: &BTreeSet<String>, covered: &BTreeSet<String>) -> BTreeSet<String> {
    reference.difference(covered).cloned().collect()
}

fn read_command_set(path: &std::path::Path) -> Result<BTreeSet<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read coverage file '{}'", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

fn write_report(uncovered: &BTreeSet<String>, mut writer: impl WriteColor) -> io::Result<()> {
    if uncovered.is_empty() {
        writeln!(writer, "All commands covered.")?;
        return Ok(());
    }
    writer.set_color(ColorSpec::new().set_bold(true))?;
    writeln!(writer, "Uncovered commands:")?;
    writer.reset()?;
    for command in uncovered {
        writeln!(writer, "  - {}", command)?;
    }
    Ok(())
}
