// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod engine;

pub use engine::{MatchConfig, MatchEngine, MatchError, MatchNote, MatchOutcome};
