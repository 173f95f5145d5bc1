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

//! Converge command implementation.

use crate::{
	calibration::CalibrationEngine,
	commands::types::ConvergeConfig,
	convergence::{ConvergenceConfig, ConvergenceLoop, Outcome},
	error::Error,
	estimator::Estimator,
	fetch::{FilePollSource, load_final_results},
	prelude::*,
	types::SourceProfileStore,
	utils::{read_optional_json_file, write_data_to_json_file},
};

/// Run the convergence loop over a polls file that is re-read on every iteration.
///
/// Both outcomes are a success; the outcome is logged and recorded in the report.
pub async fn converge_cmd(config: ConvergeConfig) -> Result<(), Error> {
	let final_results = load_final_results(&config.results).await?;
	let initial: SourceProfileStore = read_optional_json_file(config.profiles.as_deref()).await?;
	let (heuristics, normalizer) = config.shared.load().await?;

	let loop_config = ConvergenceConfig {
		final_results,
		candidates: config.candidates.clone(),
		as_of: config.as_of.unwrap_or(config.election_date),
		election_date: config.election_date,
		window: config.window.window(),
		calibration_max_age_days: config.calibration_max_age_days,
		rates: config.rates.rates(),
		tolerance: config.tolerance,
		max_iterations: config.max_iterations,
		history_dir: config.history_dir.clone(),
	};

	log::info!(
		target: LOG_TARGET,
		"converging on {} within ±{:.2} (at most {} iteration(s))",
		config.results.display(),
		config.tolerance,
		config.max_iterations
	);

	let mut source = FilePollSource::new(&config.polls, normalizer.clone());
	let convergence = ConvergenceLoop::new(
		Estimator::new(heuristics.clone(), normalizer.clone()),
		CalibrationEngine::new(heuristics, normalizer),
		loop_config,
	);
	let report = convergence.run(&mut source, initial).await?;

	let max_diff =
		report.max_diff.map(|d| format!("{d:.2}")).unwrap_or_else(|| "unknown".to_string());
	match report.outcome {
		Outcome::Converged => log::info!(
			target: LOG_TARGET,
			"converged after {} iteration(s), max difference {max_diff}",
			report.iterations
		),
		Outcome::Exhausted => log::warn!(
			target: LOG_TARGET,
			"no convergence after {} iteration(s), max difference {max_diff}",
			report.iterations
		),
	}

	write_data_to_json_file(&report.profiles, &config.output).await?;
	if let Some(path) = &config.report {
		write_data_to_json_file(&report, path).await?;
	}

	Ok(())
}
