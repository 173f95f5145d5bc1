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

//! Data model shared by the estimator, the calibration engine and the convergence loop.

use crate::prelude::*;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Poll records
// ============================================================================

/// One published poll. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRecord {
	pub source: String,
	pub date: NaiveDate,
	pub sample_size: u64,
	/// Informational only, never used for weighting.
	pub method: String,
	pub percentages: BTreeMap<CandidateName, f64>,
	/// Reported 95%-confidence half-width, in percentage points.
	pub margin_of_error: f64,
}

impl PollRecord {
	/// Age of the poll, in days, relative to `reference`. Negative for polls in the future.
	pub fn age_days(&self, reference: NaiveDate) -> i64 {
		(reference - self.date).num_days()
	}

	/// Whether the poll lies in `[reference - max_age_days, reference]`.
	pub fn within_window(&self, reference: NaiveDate, max_age_days: i64) -> bool {
		let age = self.age_days(reference);
		age >= 0 && age <= max_age_days
	}
}

/// Loosely-typed view of a poll record, as handed over by the fetch collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPollRecord {
	pub source: Option<String>,
	pub date: Option<String>,
	pub sample_size: Option<u64>,
	pub method: Option<String>,
	pub percentages: Option<BTreeMap<CandidateName, f64>>,
	pub margin_of_error: Option<f64>,
}

/// Why a raw record could not be turned into a [`PollRecord`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MalformedRecord {
	#[error("unreadable record: {0}")]
	Unreadable(String),
	#[error("missing field `{0}`")]
	MissingField(&'static str),
	#[error("unparseable date `{0}`")]
	InvalidDate(String),
	#[error("invalid margin of error {0}")]
	InvalidMargin(f64),
	#[error("invalid percentage {value} for `{candidate}`")]
	InvalidPercentage { candidate: CandidateName, value: f64 },
}

impl TryFrom<RawPollRecord> for PollRecord {
	type Error = MalformedRecord;

	fn try_from(raw: RawPollRecord) -> Result<Self, Self::Error> {
		let source = raw
			.source
			.filter(|s| !s.trim().is_empty())
			.ok_or(MalformedRecord::MissingField("source"))?;
		let date_str = raw.date.ok_or(MalformedRecord::MissingField("date"))?;
		let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
			.map_err(|_| MalformedRecord::InvalidDate(date_str.clone()))?;
		let sample_size = raw.sample_size.ok_or(MalformedRecord::MissingField("sample_size"))?;
		let percentages = raw.percentages.ok_or(MalformedRecord::MissingField("percentages"))?;
		let margin_of_error =
			raw.margin_of_error.ok_or(MalformedRecord::MissingField("margin_of_error"))?;

		if !margin_of_error.is_finite() || margin_of_error < 0.0 {
			return Err(MalformedRecord::InvalidMargin(margin_of_error));
		}
		if let Some((candidate, value)) =
			percentages.iter().find(|(_, v)| !v.is_finite() || **v < 0.0 || **v > 100.0)
		{
			return Err(MalformedRecord::InvalidPercentage {
				candidate: candidate.clone(),
				value: *value,
			});
		}

		Ok(PollRecord {
			source,
			date,
			sample_size,
			method: raw.method.unwrap_or_default(),
			percentages,
			margin_of_error,
		})
	}
}

/// A record that was dropped during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
	/// Position of the record in its batch.
	pub index: usize,
	pub reason: String,
}

impl std::fmt::Display for SkippedRecord {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "skipped malformed poll #{}: {}", self.index, self.reason)
	}
}

/// Convert a batch of loosely-typed records, skipping the malformed ones.
///
/// Malformed records are never fatal: each one yields a [`SkippedRecord`] and processing goes on
/// with the rest of the batch.
pub fn ingest(batch: Vec<serde_json::Value>) -> (Vec<PollRecord>, Vec<SkippedRecord>) {
	let mut polls = Vec::with_capacity(batch.len());
	let mut skipped = Vec::new();

	for (index, value) in batch.into_iter().enumerate() {
		let parsed = serde_json::from_value::<RawPollRecord>(value)
			.map_err(|e| MalformedRecord::Unreadable(e.to_string()))
			.and_then(PollRecord::try_from);

		match parsed {
			Ok(poll) => polls.push(poll),
			Err(e) => {
				log::warn!(target: LOG_TARGET, "skipping malformed poll #{index}: {e}");
				skipped.push(SkippedRecord { index, reason: e.to_string() });
			},
		}
	}

	(polls, skipped)
}

// ============================================================================
// Source profiles
// ============================================================================

fn neutral() -> f64 {
	1.0
}

/// Calibration state of one source for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
	/// Reliability bonus.
	#[serde(default = "neutral")]
	pub bias_weight: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mean_error: Option<f64>,
	#[serde(default = "neutral")]
	pub bias_coefficient: f64,
}

/// Calibration state of one polling source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
	/// Reliability bonus.
	#[serde(default = "neutral")]
	pub bias_weight: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mean_error: Option<f64>,
	#[serde(default = "neutral")]
	pub bias_coefficient: f64,
	/// Per-candidate overrides, absent when the source never had any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub candidates: Option<BTreeMap<CandidateName, CandidateProfile>>,
}

impl Default for SourceProfile {
	fn default() -> Self {
		Self { bias_weight: 1.0, mean_error: None, bias_coefficient: 1.0, candidates: None }
	}
}

impl SourceProfile {
	pub fn candidate(&self, name: &str) -> Option<&CandidateProfile> {
		self.candidates.as_ref().and_then(|c| c.get(name))
	}
}

/// All source profiles, keyed by canonical source identifier.
///
/// A store is produced whole by one calibration pass and never patched in place afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceProfileStore(pub BTreeMap<SourceId, SourceProfile>);

impl SourceProfileStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, source: &str) -> Option<&SourceProfile> {
		self.0.get(source)
	}

	pub fn insert(&mut self, source: impl Into<SourceId>, profile: SourceProfile) {
		self.0.insert(source.into(), profile);
	}

	pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &SourceProfile)> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl FromIterator<(SourceId, SourceProfile)> for SourceProfileStore {
	fn from_iter<I: IntoIterator<Item = (SourceId, SourceProfile)>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

// ============================================================================
// Estimation results
// ============================================================================

/// Breakdown of how one poll contributed to an estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollContribution {
	pub source: SourceId,
	pub date: NaiveDate,
	pub sample_size: u64,
	pub method: String,
	pub age_days: i64,
	pub raw_value: f64,
	pub adjusted_value: f64,
	pub margin_of_error: f64,
	pub weight_time: f64,
	pub weight_sample: f64,
	pub source_coefficient: f64,
	pub candidate_coefficient: f64,
	pub bias_coefficient: f64,
	pub source_bonus: f64,
	pub candidate_bonus: f64,
	pub reliability: f64,
	pub source_mean_error: Option<f64>,
	pub candidate_mean_error: Option<f64>,
	pub error_penalty: f64,
	pub final_weight: f64,
}

/// Parameters an estimate was computed with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationParameters {
	pub as_of: NaiveDate,
	pub max_age_days: i64,
	pub decay_rate: f64,
}

/// Aggregated estimate of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationResult {
	pub candidate: CandidateName,
	/// Absent when no poll was usable.
	pub percentage: Option<f64>,
	pub margin_of_error: Option<f64>,
	pub poll_count: usize,
	/// In the order the polls were given.
	pub contributions: Vec<PollContribution>,
	/// Human-readable notes: exclusions, fallbacks, insufficient data.
	pub notes: Vec<String>,
	pub parameters: EstimationParameters,
}

impl EstimationResult {
	pub fn is_insufficient(&self) -> bool {
		self.percentage.is_none()
	}

	/// Log the estimate at `info` and each contribution at `debug`.
	pub fn log(&self) {
		match (self.percentage, self.margin_of_error) {
			(Some(pct), Some(moe)) => log::info!(
				target: LOG_TARGET,
				"{}: {pct:.2}% ± {moe:.2} from {} poll(s)",
				self.candidate,
				self.poll_count
			),
			_ => log::warn!(
				target: LOG_TARGET,
				"{}: insufficient data ({})",
				self.candidate,
				self.notes.join("; ")
			),
		}

		for c in &self.contributions {
			log::debug!(target: LOG_TARGET, "{}: {c:?}", self.candidate);
		}
	}
}

// ============================================================================
// Snapshots
// ============================================================================

/// Estimates of one iteration paired with the final results of the same election.
///
/// This is the ground truth the calibration engine measures error against. It is never fed
/// back into the estimator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
	pub iteration: u32,
	pub created_at: String,
	pub estimates: BTreeMap<CandidateName, EstimationResult>,
	pub final_results: FinalResults,
}

impl Snapshot {
	pub fn new(
		iteration: u32,
		estimates: BTreeMap<CandidateName, EstimationResult>,
		final_results: FinalResults,
	) -> Self {
		Self { iteration, created_at: chrono::Utc::now().to_rfc3339(), estimates, final_results }
	}

	/// The candidates that received an estimate, with their percentage.
	pub fn estimated_percentages(&self) -> BTreeMap<CandidateName, f64> {
		self.estimates
			.iter()
			.filter_map(|(c, r)| r.percentage.map(|p| (c.clone(), p)))
			.collect()
	}

	/// Largest absolute gap between an estimate and the final result, over the candidates that
	/// have both. `None` when no candidate has both.
	pub fn max_diff(&self) -> Option<f64> {
		let estimates = self.estimated_percentages();
		self.final_results
			.iter()
			.filter_map(|(c, real)| estimates.get(c).map(|est| (est - real).abs()))
			.fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |m| m.max(d))))
	}
}
