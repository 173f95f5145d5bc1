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

//! Calibrate command implementation.

use crate::{
	calibration::CalibrationEngine,
	commands::types::CalibrateConfig,
	error::Error,
	fetch::{load_final_results, load_polls},
	prelude::*,
	prometheus,
	types::SourceProfileStore,
	utils::{read_optional_json_file, write_data_to_json_file},
};

/// Run one calibration pass and write the new source profile store.
///
/// Unlike the convergence loop, a pass without usable data is an error here: there is no
/// previous iteration to fall back on.
pub async fn calibrate_cmd(config: CalibrateConfig) -> Result<(), Error> {
	let (heuristics, normalizer) = config.shared.load().await?;
	let fetched = load_polls(&config.polls, &normalizer).await?;
	prometheus::on_skipped_records(fetched.skipped.len());

	let final_results = load_final_results(&config.results).await?;
	let previous: SourceProfileStore = read_optional_json_file(config.profiles.as_deref()).await?;
	let engine = CalibrationEngine::new(heuristics, normalizer);

	let mut report = engine
		.calibrate(
			&fetched.polls,
			&final_results,
			&previous,
			config.election_date,
			config.max_age_days,
			config.rates.rates(),
		)
		.inspect_err(|_| prometheus::on_calibration_failure())?;
	prometheus::on_calibration(report.clamps.len());

	log::info!(
		target: LOG_TARGET,
		"calibrated {} source(s) from {} poll(s) ({} outside the window), {} error(s) measured, {} clamp(s)",
		report.profiles.len(),
		report.polls_used,
		report.polls_skipped,
		report.errors_used,
		report.clamps.len()
	);
	for clamp in &report.clamps {
		log::info!(
			target: LOG_TARGET,
			"clamped {}{} {}: {:.4} -> {:.4}",
			clamp.source,
			clamp.candidate.as_ref().map(|c| format!("/{c}")).unwrap_or_default(),
			clamp.field,
			clamp.unclamped,
			clamp.clamped
		);
	}
	for note in &report.notes {
		log::debug!(target: LOG_TARGET, "{note}");
	}

	report.notes.extend(fetched.skipped.iter().map(ToString::to_string));

	write_data_to_json_file(&report.profiles, &config.output).await?;
	if let Some(path) = &config.report {
		write_data_to_json_file(&report, path).await?;
	}

	Ok(())
}
