// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::OutputFormat;
use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::io;
use termcolor::{ColorSpec, NoColor, WriteColor};

/// Specification of a single test unit.
///
/// The name is the identifier the unit was selected by. It may embed extra invocation arguments
/// after whitespace (`"quorum-signing --spork21"`), in which case the first token is the program
/// to run and the rest are passed through on its command line. Two specs that share a program but
/// differ in arguments are distinct units with distinct names.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestSpec {
    name: String,
    argv: Vec<String>,
}

impl TestSpec {
    /// Creates a new spec from a unit name, splitting embedded arguments off on whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let argv: Vec<String> = name.split_whitespace().map(str::to_owned).collect();
        if argv.is_empty() {
            bail!("test name is empty");
        }
        Ok(Self { name, argv })
    }

    /// The full name of the unit, including any embedded arguments.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The program to execute, relative to the tests directory.
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments embedded in the name, not including the program itself.
    pub fn extra_args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// The stem used to build this unit's working-directory name: the program's file stem with
    /// anything outside `[A-Za-z0-9._-]` replaced. Working directories stay unique regardless
    /// because the allocated seed is appended to the stem.
    pub fn workdir_stem(&self) -> String {
        let stem = Utf8Path::new(self.program())
            .file_stem()
            .unwrap_or_else(|| self.program());
        stem.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

/// The ordered list of test units selected for a run.
///
/// Order is significant: it determines which units are dequeued first when worker slots free up.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestList {
    test_count: usize,
    tests: Vec<TestSpec>,
}

impl TestList {
    /// Creates a new test list from the selected names, dropping any excluded ones.
    ///
    /// Exclusions match the full unit name. An exclusion that matches nothing is reported as a
    /// warning rather than an error, since it usually means a stale invocation.
    pub fn new(
        names: impl IntoIterator<Item = impl Into<String>>,
        exclude: &[String],
    ) -> Result<Self> {
        let mut tests = Vec::new();
        for name in names {
            tests.push(TestSpec::new(name)?);
        }

        for exclude_name in exclude {
            let before = tests.len();
            tests.retain(|spec| spec.name() != exclude_name);
            if tests.len() == before {
                log::warn!(
                    "WARNING! Excluded test '{}' not found in the selected test list.",
                    exclude_name
                );
            }
        }

        Ok(Self {
            test_count: tests.len(),
            tests,
        })
    }

    /// Returns the number of units in the list.
    pub fn len(&self) -> usize {
        self.test_count
    }

    /// Returns true if no units were selected.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Iterates over the units in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &TestSpec> + '_ {
        self.tests.iter()
    }

    /// Consumes the list, yielding the units in submission order.
    pub(crate) fn into_specs(self) -> Vec<TestSpec> {
        self.tests
    }

    /// Outputs this list to the given writer.
    pub fn write(&self, output_format: OutputFormat, writer: impl WriteColor) -> Result<()> {
        match output_format {
            OutputFormat::Plain => self.write_plain(writer).context("error writing test list"),
            OutputFormat::Serializable(format) => format.to_writer(self, writer),
        }
    }

    /// Outputs this list as a string with the given format.
    pub fn to_string(&self, output_format: OutputFormat) -> Result<String> {
        // Ugh this sucks. String really should have an io::Write impl that errors on non-UTF8 text.
        let mut buf = NoColor::new(vec![]);
        self.write(output_format, &mut buf)?;
        Ok(String::from_utf8(buf.into_inner()).expect("buffer is valid UTF-8"))
    }

    // ---
    // Helper methods
    // ---

    fn write_plain(&self, mut writer: impl WriteColor) -> io::Result<()> {
        let name_spec = test_name_spec();
        for spec in &self.tests {
            writer.set_color(&name_spec)?;
            write!(writer, "{}", spec.program())?;
            writer.reset()?;
            for arg in spec.extra_args() {
                write!(writer, " {}", arg)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}

pub(crate) fn test_name_spec() -> ColorSpec {
    let mut color_spec = ColorSpec::new();
    color_spec
        .set_fg(Some(termcolor::Color::Blue))
        .set_bold(true);
    color_spec
}
