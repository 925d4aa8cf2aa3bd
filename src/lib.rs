// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parallel process-based runner for functional test suites.
//!
//! Test units are opaque executables: the runner launches each one as its own child process with
//! a private working directory and a disjoint port-range seed, bounds how many run at once,
//! enforces an optional per-unit timeout, and classifies outcomes from the unit's exit code and
//! stderr. An optional coverage pass reports which commands of an external interface no unit
//! exercised.

pub mod coverage;
pub mod dispatch;
pub mod output;
pub mod reporter;
pub mod runner;
pub mod signal;
mod stopwatch;
pub mod test_list;
