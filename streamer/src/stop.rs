use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;

static STOP: AtomicBool = AtomicBool::new(false);

/// Flips the stop flag on ctrl-c
pub fn install_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| STOP.store(true, Ordering::Relaxed)).context("Set ctrl-c")
}

pub fn stopped() -> bool {
    STOP.load(Ordering::Relaxed)
}
