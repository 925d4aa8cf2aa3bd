// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

// clippy complains about the Arbitrary impl for OutputFormat
#![allow(clippy::unit_arg)]

use anyhow::{bail, Context, Error, Result};
use log::LevelFilter;
use serde::Serialize;
use std::{fmt, io, io::Write, str::FromStr};
use structopt::{clap::arg_enum, StructOpt};
use termcolor::ColorChoice;

arg_enum! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum Color {
        Always,
        Auto,
        Never,
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::Auto
    }
}

impl Color {
    pub(crate) fn color_choice(self, stream: atty::Stream) -> ColorChoice {
        // https://docs.rs/termcolor/1.1.2/termcolor/index.html#detecting-presence-of-a-terminal
        match self {
            Color::Always => ColorChoice::Always,
            Color::Auto => {
                if atty::is(stream) {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                }
            }
            Color::Never => ColorChoice::Never,
        }
    }
}

/// Output options shared by all subcommands.
#[derive(Copy, Clone, Debug, Default, StructOpt)]
#[structopt(rename_all = "kebab-case")]
pub struct OutputOpts {
    /// Only print the results summary and failure output
    #[structopt(long, short, global = true)]
    pub quiet: bool,

    /// Produce color output: auto, always, never
    #[structopt(long, global = true, default_value, possible_values = &Color::variants(), case_insensitive = true)]
    pub color: Color,
}

impl OutputOpts {
    /// Installs the logger and returns the finalized output context.
    pub fn init(self) -> OutputContext {
        // Progress lines (passes and skips) are logged at debug level, so --quiet hides them by
        // raising the default filter to info.
        let level = if self.quiet {
            LevelFilter::Info
        } else {
            LevelFilter::Debug
        };
        env_logger::Builder::new()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .filter_level(level)
            .parse_default_env()
            .init();

        OutputContext { color: self.color }
    }
}

/// Finalized output configuration, passed explicitly to components that print.
#[derive(Copy, Clone, Debug)]
pub struct OutputContext {
    pub color: Color,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum OutputFormat {
    Plain,
    Serializable(SerializableFormat),
}

impl OutputFormat {
    pub fn variants() -> [&'static str; 3] {
        ["plain", "json", "json-pretty"]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Plain => write!(f, "plain"),
            OutputFormat::Serializable(SerializableFormat::Json) => write!(f, "json"),
            OutputFormat::Serializable(SerializableFormat::JsonPretty) => write!(f, "json-pretty"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s {
            "plain" => OutputFormat::Plain,
            "json" => OutputFormat::Serializable(SerializableFormat::Json),
            "json-pretty" => OutputFormat::Serializable(SerializableFormat::JsonPretty),
            other => bail!("unrecognized format: {}", other),
        };
        Ok(val)
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Plain
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum SerializableFormat {
    Json,
    JsonPretty,
}

impl SerializableFormat {
    /// Write this data in the given format to the writer.
    pub fn to_writer(self, value: &impl Serialize, writer: impl io::Write) -> Result<()> {
        match self {
            SerializableFormat::Json => {
                serde_json::to_writer(writer, value).context("error serializing to JSON")
            }
            SerializableFormat::JsonPretty => {
                serde_json::to_writer_pretty(writer, value).context("error serializing to JSON")
            }
        }
    }
}
