// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<usize> = OnceLock::new();

/// Configures the global tracing subscriber for one training worker.
///
/// Rank 0 honours `RUST_LOG` (default `info`); every other rank is clamped
/// to `warn` so a multi-worker run narrates once. This replaces the usual
/// trick of swapping the process print function on non-primary workers
/// with an explicit, testable capability.
pub fn init_tracing(rank: usize) -> Result<(), InitError> {
    INITIALISED
        .set(rank)
        .map_err(|_| InitError::AlreadyInitialised)?;

    let ansi = std::io::stdout().is_terminal();
    let filter = if rank == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("warn")
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi);
    Registry::default().with(filter).with(fmt_layer).init();

    Ok(())
}

/// Rank the subscriber was initialised for, when it has been.
pub fn initialised_rank() -> Option<usize> {
    INITIALISED.get().copied()
}

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
}
