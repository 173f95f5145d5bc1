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

//! The fetch collaborator of the convergence loop.
//!
//! Retrieval itself (web search, scraping) lives outside this crate. A [`PollSource`] only has
//! to hand over the current poll set; [`FilePollSource`] does so from a JSON file that an
//! external agent keeps up to date.

use crate::{
	error::Error,
	normalize::SourceNormalizer,
	prelude::*,
	types::{PollRecord, SkippedRecord, ingest},
	utils::read_data_from_json_file,
};
use futures::future::{BoxFuture, FutureExt};
use std::{
	collections::HashSet,
	path::{Path, PathBuf},
};

/// Polls handed over by one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchedPolls {
	pub polls: Vec<PollRecord>,
	pub skipped: Vec<SkippedRecord>,
}

/// Anything able to refresh the poll set of the convergence loop.
///
/// A failing fetch aborts the loop; retries, if any, belong to the implementation.
pub trait PollSource: Send {
	fn fetch(&mut self) -> BoxFuture<'_, Result<FetchedPolls, Error>>;
}

/// Append the polls of `new` whose `(canonical source, date)` pair is not in `existing` yet.
///
/// The same poll published under two aliases of one institute is kept once, in the first form
/// seen.
pub fn merge_polls(
	existing: &mut Vec<PollRecord>,
	new: Vec<PollRecord>,
	normalizer: &SourceNormalizer,
) -> usize {
	let mut seen: HashSet<(SourceId, chrono::NaiveDate)> =
		existing.iter().map(|p| (normalizer.canonical(&p.source), p.date)).collect();
	let before = existing.len();

	for poll in new {
		if seen.insert((normalizer.canonical(&poll.source), poll.date)) {
			existing.push(poll);
		}
	}

	existing.len() - before
}

/// Turn final results given as raw vote counts into percentages.
///
/// Results are taken as votes as soon as one value exceeds 100; they are then rescaled to sum to
/// 100 and rounded to two decimals. Percentages are returned untouched.
pub fn normalize_final_results(results: FinalResults) -> FinalResults {
	if !results.values().any(|v| *v > 100.0) {
		return results;
	}

	let total: f64 = results.values().sum();
	log::info!(target: LOG_TARGET, "final results look like vote counts, converting to percentages");
	results
		.into_iter()
		.map(|(c, v)| (c, (v / total * 100.0 * 100.0).round() / 100.0))
		.collect()
}

/// Read and normalize final results from a JSON file.
pub async fn load_final_results(path: &Path) -> Result<FinalResults, Error> {
	let results: FinalResults = read_data_from_json_file(path).await?;
	Ok(normalize_final_results(results))
}

/// Read a batch of poll records from a JSON array, skipping the malformed ones and keeping one
/// poll per canonical source and date.
pub async fn load_polls(
	path: &Path,
	normalizer: &SourceNormalizer,
) -> Result<FetchedPolls, Error> {
	let batch: Vec<serde_json::Value> = read_data_from_json_file(path).await?;
	let (parsed, skipped) = ingest(batch);

	let total = parsed.len();
	let mut polls = Vec::with_capacity(total);
	merge_polls(&mut polls, parsed, normalizer);
	if polls.len() < total {
		log::info!(
			target: LOG_TARGET,
			"{}: dropped {} duplicate poll(s)",
			path.display(),
			total - polls.len()
		);
	}

	Ok(FetchedPolls { polls, skipped })
}

/// Re-reads a polls file on every fetch and accumulates its content.
#[derive(Debug, Clone)]
pub struct FilePollSource {
	path: PathBuf,
	normalizer: SourceNormalizer,
	known: Vec<PollRecord>,
}

impl FilePollSource {
	pub fn new(path: impl Into<PathBuf>, normalizer: SourceNormalizer) -> Self {
		Self { path: path.into(), normalizer, known: Vec::new() }
	}
}

impl PollSource for FilePollSource {
	fn fetch(&mut self) -> BoxFuture<'_, Result<FetchedPolls, Error>> {
		async move {
			let FetchedPolls { polls, skipped } = load_polls(&self.path, &self.normalizer)
				.await
				.map_err(|e| Error::Fetch(e.to_string()))?;
			let added = merge_polls(&mut self.known, polls, &self.normalizer);
			log::info!(
				target: LOG_TARGET,
				"fetched {}: {added} new poll(s), {} skipped, {} total",
				self.path.display(),
				skipped.len(),
				self.known.len()
			);
			Ok(FetchedPolls { polls: self.known.clone(), skipped })
		}
		.boxed()
	}
}
