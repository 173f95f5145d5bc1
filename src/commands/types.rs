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

use crate::{
	error::Error,
	opt::{EstimationWindow, LearningRates},
	prelude::*,
};
use chrono::NaiveDate;
use std::path::PathBuf;

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate, Error> {
	NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
		.map_err(|e| Error::InvalidDate(format!("expected YYYY-MM-DD, got `{s}`: {e}")))
}

/// Lookup tables shared by every command.
#[derive(Debug, Clone, PartialEq, clap::Parser)]
pub struct SharedConfig {
	/// JSON object mapping raw source names to canonical source identifiers.
	#[clap(long)]
	pub aliases: Option<PathBuf>,

	/// JSON file overriding some or all of the heuristic constants.
	#[clap(long)]
	pub heuristics: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, clap::Parser)]
pub struct WindowConfig {
	/// Polls older than this many days before the as-of date are ignored.
	#[clap(long, default_value_t = DEFAULT_MAX_AGE_DAYS)]
	pub max_age_days: i64,

	/// Exponential decay rate of a poll's weight, per day of age.
	#[clap(long, default_value_t = DEFAULT_DECAY_RATE)]
	pub decay_rate: f64,
}

impl WindowConfig {
	pub fn window(&self) -> EstimationWindow {
		EstimationWindow { max_age_days: self.max_age_days, decay_rate: self.decay_rate }
	}
}

#[derive(Debug, Clone, PartialEq, clap::Parser)]
pub struct LearningRateConfig {
	/// Learning rate of the reliability bonus.
	#[clap(long, default_value_t = DEFAULT_LR_BONUS)]
	pub lr_bonus: f64,

	/// Learning rate of the source-level bias coefficient.
	#[clap(long, default_value_t = DEFAULT_LR_COEF_GLOBAL)]
	pub lr_coef_global: f64,

	/// Learning rate of the candidate-level bias coefficient.
	#[clap(long, default_value_t = DEFAULT_LR_COEF_CANDIDATE)]
	pub lr_coef_candidate: f64,
}

impl LearningRateConfig {
	pub fn rates(&self) -> LearningRates {
		LearningRates {
			bonus: self.lr_bonus,
			coefficient_global: self.lr_coef_global,
			coefficient_candidate: self.lr_coef_candidate,
		}
	}
}

#[derive(Debug, Clone, PartialEq, clap::Parser)]
pub struct EstimateConfig {
	/// JSON array of poll records.
	#[clap(long)]
	pub polls: PathBuf,

	/// Source profile store. All sources are neutral if not provided.
	#[clap(long)]
	pub profiles: Option<PathBuf>,

	/// Reference date of the estimate.
	#[clap(long, value_parser = parse_date)]
	pub as_of: NaiveDate,

	/// Candidate to estimate, may be repeated.
	#[clap(long = "candidate", required = true)]
	pub candidates: Vec<CandidateName>,

	/// Where to write the estimates. Printed to stdout if not provided.
	#[clap(long)]
	pub output: Option<PathBuf>,

	#[clap(flatten)]
	pub window: WindowConfig,

	#[clap(flatten)]
	pub shared: SharedConfig,
}

#[derive(Debug, Clone, PartialEq, clap::Parser)]
pub struct CalibrateConfig {
	/// JSON array of poll records.
	#[clap(long)]
	pub polls: PathBuf,

	/// Final results, as percentages or raw vote counts.
	#[clap(long)]
	pub results: PathBuf,

	/// Date of the election the results belong to.
	#[clap(long, value_parser = parse_date)]
	pub election_date: NaiveDate,

	/// Previous source profile store. Calibration starts from neutral profiles if not provided.
	#[clap(long)]
	pub profiles: Option<PathBuf>,

	/// Polls older than this many days before the election are ignored.
	#[clap(long, default_value_t = DEFAULT_CALIBRATION_MAX_AGE_DAYS)]
	pub max_age_days: i64,

	/// Where to write the new source profile store.
	#[clap(long)]
	pub output: PathBuf,

	/// Where to write the full calibration report, clamp events included.
	#[clap(long)]
	pub report: Option<PathBuf>,

	#[clap(flatten)]
	pub rates: LearningRateConfig,

	#[clap(flatten)]
	pub shared: SharedConfig,
}

#[derive(Debug, Clone, PartialEq, clap::Parser)]
pub struct ConvergeConfig {
	/// JSON array of poll records, re-read on every iteration.
	#[clap(long)]
	pub polls: PathBuf,

	/// Final results, as percentages or raw vote counts.
	#[clap(long)]
	pub results: PathBuf,

	/// Date of the election the results belong to.
	#[clap(long, value_parser = parse_date)]
	pub election_date: NaiveDate,

	/// Reference date of the estimates. Defaults to the election date.
	#[clap(long, value_parser = parse_date)]
	pub as_of: Option<NaiveDate>,

	/// Initial source profile store. Neutral profiles if not provided.
	#[clap(long)]
	pub profiles: Option<PathBuf>,

	/// Candidates to track. All candidates of the final results if not provided.
	#[clap(long = "candidate")]
	pub candidates: Vec<CandidateName>,

	/// Largest accepted gap, in percentage points, between an estimate and the final result.
	#[clap(long, default_value_t = DEFAULT_TOLERANCE)]
	pub tolerance: f64,

	/// Give up after this many iterations.
	#[clap(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
	pub max_iterations: u32,

	/// Calibration window, in days before the election.
	#[clap(long, default_value_t = DEFAULT_CALIBRATION_MAX_AGE_DAYS)]
	pub calibration_max_age_days: i64,

	/// Directory receiving one snapshot per iteration.
	#[clap(long)]
	pub history_dir: Option<PathBuf>,

	/// Where to write the final source profile store.
	#[clap(long)]
	pub output: PathBuf,

	/// Where to write the convergence report.
	#[clap(long)]
	pub report: Option<PathBuf>,

	#[clap(flatten)]
	pub window: WindowConfig,

	#[clap(flatten)]
	pub rates: LearningRateConfig,

	#[clap(flatten)]
	pub shared: SharedConfig,
}
