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

//! Estimate command implementation.

use crate::{
	commands::types::EstimateConfig,
	error::Error,
	estimator::Estimator,
	fetch::load_polls,
	prelude::*,
	prometheus,
	types::{EstimationResult, SourceProfileStore},
	utils::{read_optional_json_file, write_data_to_json_file},
};
use std::collections::BTreeMap;

/// Estimate every requested candidate and write the results as a JSON object keyed by candidate.
pub async fn estimate_cmd(config: EstimateConfig) -> Result<(), Error> {
	let (heuristics, normalizer) = config.shared.load().await?;
	let fetched = load_polls(&config.polls, &normalizer).await?;
	prometheus::on_skipped_records(fetched.skipped.len());

	let profiles: SourceProfileStore = read_optional_json_file(config.profiles.as_deref()).await?;
	let estimator = Estimator::new(heuristics, normalizer);

	log::info!(
		target: LOG_TARGET,
		"estimating {} candidate(s) as of {} from {} poll(s), {} profile(s)",
		config.candidates.len(),
		config.as_of,
		fetched.polls.len(),
		profiles.len()
	);

	let window = config.window.window();
	let results: BTreeMap<CandidateName, EstimationResult> = config
		.candidates
		.iter()
		.map(|candidate| {
			let mut result =
				estimator.estimate(&fetched.polls, candidate, &profiles, config.as_of, window);
			result.log();
			result.notes.extend(fetched.skipped.iter().map(ToString::to_string));
			prometheus::on_estimate(result.poll_count);
			(candidate.clone(), result)
		})
		.collect();

	match &config.output {
		Some(path) => write_data_to_json_file(&results, path).await?,
		None => println!("{}", serde_json::to_string_pretty(&results)?),
	}

	Ok(())
}
