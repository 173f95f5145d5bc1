// Copyright 2021-2022 Parity Technologies (UK) Ltd.
// This file is part of Polkadot.

// Polkadot is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Polkadot is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Polkadot.  If not, see <http://www.gnu.org/licenses/>.

//! Types and constants that are shared all over the place.

use std::collections::BTreeMap;

/// Name of a candidate, exactly as it appears in poll records and results.
pub type CandidateName = String;
/// Identifier of a polling source (institute), canonical after normalization.
pub type SourceId = String;
/// Final results of an election: candidate to percentage.
pub type FinalResults = BTreeMap<CandidateName, f64>;

/// Default port to start the prometheus server on.
pub const DEFAULT_PROMETHEUS_PORT: u16 = 9999;
/// The logging target.
pub const LOG_TARGET: &str = "poll-calibrator";

/// Default estimation window, in days, counted back from the as-of date.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 45;
/// Default exponential decay rate per day of poll age.
pub const DEFAULT_DECAY_RATE: f64 = 0.05;

/// Default calibration window, in days, counted back from the election date.
pub const DEFAULT_CALIBRATION_MAX_AGE_DAYS: i64 = 40;
/// Default learning rate of the reliability bonus.
pub const DEFAULT_LR_BONUS: f64 = 0.3;
/// Default learning rate of the source-level bias coefficient.
pub const DEFAULT_LR_COEF_GLOBAL: f64 = 0.7;
/// Default learning rate of the candidate-level bias coefficient.
pub const DEFAULT_LR_COEF_CANDIDATE: f64 = 0.7;

/// Default tolerance, in percentage points, of the convergence loop.
pub const DEFAULT_TOLERANCE: f64 = 3.0;
/// Default cap on convergence iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Canonical name given to sources with an empty identifier.
pub const UNKNOWN_SOURCE: &str = "unknown";
