// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level termination-signal handling.
//!
//! The runner itself never installs process-wide handlers. Dispatch installs one here and hands
//! the resulting flag to the runner, which checks it on every poll tick and bails out so the
//! caller can kill and reap whatever is still in flight.

use anyhow::{Context, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Converts SIGINT/SIGTERM (Ctrl-C and friends) into a cancellation flag.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    canceled: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Installs the process-wide handler. Can only be called once per process.
    pub fn install() -> Result<Self> {
        let canceled = Arc::new(AtomicBool::new(false));
        let flag = canceled.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Release);
        })
        .context("failed to set up termination signal handler")?;
        Ok(Self { canceled })
    }

    /// Creates a handler that never fires. Useful for tests and embedding.
    pub fn noop() -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The flag flipped when a termination signal arrives.
    pub fn canceled_flag(&self) -> Arc<AtomicBool> {
        self.canceled.clone()
    }
}
