// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-wide bootstrap shared by the AVAlign crates: deterministic seed
//! derivation and tracing initialisation.

pub mod determinism;
pub mod tracing;
