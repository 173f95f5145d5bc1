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

//! Weighted estimator.
//!
//! Turns a set of dated polls into one bias-corrected percentage with a margin of error per
//! candidate. Every retained poll gets a weight made of four strictly positive factors:
//!
//! - recency: `exp(-decay_rate * age_days)`,
//! - sample size: `sqrt(max(sample_size, 1))`,
//! - reliability: the blended source/candidate bonus,
//! - error penalty: `1 / (1 + mean error)` over the known mean errors, `1` if none is known.
//!
//! The aggregate margin of error assumes independent polls. Correlation between polls of the
//! same source is not modelled.

use crate::{
	normalize::SourceNormalizer,
	opt::{EstimationWindow, Heuristics},
	types::{
		EstimationParameters, EstimationResult, PollContribution, PollRecord, SourceProfile,
		SourceProfileStore,
	},
};
use chrono::NaiveDate;

/// Source and candidate factors read from a profile, with the neutral fallbacks applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProfileFactors {
	pub source_coefficient: f64,
	pub candidate_coefficient: f64,
	pub source_bonus: f64,
	pub candidate_bonus: f64,
	pub source_mean_error: Option<f64>,
	pub candidate_mean_error: Option<f64>,
}

impl ProfileFactors {
	/// Read the factors of `candidate` from `profile`.
	///
	/// The candidate bonus and mean error fall back to the source values, the candidate
	/// coefficient falls back to `1.0`. Multiplicative factors that are not strictly positive
	/// are replaced by `1.0` and negative mean errors are dropped; each replacement is reported
	/// through `notes`.
	pub fn resolve(
		source: &str,
		profile: Option<&SourceProfile>,
		candidate: &str,
		notes: &mut Vec<String>,
	) -> Self {
		let Some(profile) = profile else {
			return Self {
				source_coefficient: 1.0,
				candidate_coefficient: 1.0,
				source_bonus: 1.0,
				candidate_bonus: 1.0,
				source_mean_error: None,
				candidate_mean_error: None,
			};
		};

		let mut positive = |value: f64, field: &str| {
			if value.is_finite() && value > 0.0 {
				value
			} else {
				notes.push(format!("{source}: {field} {value} is not positive, using 1.0"));
				1.0
			}
		};

		let source_coefficient = positive(profile.bias_coefficient, "bias_coefficient");
		let source_bonus = positive(profile.bias_weight, "bias_weight");
		let cand = profile.candidate(candidate);
		let candidate_coefficient =
			positive(cand.map_or(1.0, |c| c.bias_coefficient), "candidate bias_coefficient");
		let candidate_bonus =
			positive(cand.map_or(source_bonus, |c| c.bias_weight), "candidate bias_weight");

		let mut error = |value: Option<f64>, field: &str| match value {
			Some(e) if e.is_finite() && e >= 0.0 => Some(e),
			Some(e) => {
				notes.push(format!("{source}: {field} {e} is not a valid error, ignoring it"));
				None
			},
			None => None,
		};
		let source_mean_error = error(profile.mean_error, "mean_error");
		let candidate_mean_error = match cand {
			Some(c) if c.mean_error.is_some() => error(c.mean_error, "candidate mean_error"),
			_ => source_mean_error,
		};

		Self {
			source_coefficient,
			candidate_coefficient,
			source_bonus,
			candidate_bonus,
			source_mean_error,
			candidate_mean_error,
		}
	}

	pub fn bias_coefficient(&self, heuristics: &Heuristics) -> f64 {
		heuristics.coefficient_blend.apply(self.source_coefficient, self.candidate_coefficient)
	}

	pub fn reliability(&self, heuristics: &Heuristics) -> f64 {
		heuristics.bonus_blend.apply(self.source_bonus, self.candidate_bonus)
	}

	pub fn error_penalty(&self) -> f64 {
		let known: Vec<f64> =
			[self.source_mean_error, self.candidate_mean_error].into_iter().flatten().collect();
		if known.is_empty() {
			1.0
		} else {
			1.0 / (1.0 + known.iter().sum::<f64>() / known.len() as f64)
		}
	}
}

/// The weighted estimator, configured with its heuristics and the source lookup table.
#[derive(Debug, Clone, Default)]
pub struct Estimator {
	heuristics: Heuristics,
	normalizer: SourceNormalizer,
}

impl Estimator {
	pub fn new(heuristics: Heuristics, normalizer: SourceNormalizer) -> Self {
		Self { heuristics, normalizer }
	}

	pub fn heuristics(&self) -> &Heuristics {
		&self.heuristics
	}

	/// Estimate the support of `candidate` as of `as_of`.
	///
	/// Polls dated after `as_of`, older than `max_age_days` or not reporting the candidate are
	/// left out. When nothing is left, the result carries no percentage and a note, it is not an
	/// error.
	pub fn estimate(
		&self,
		polls: &[PollRecord],
		candidate: &str,
		profiles: &SourceProfileStore,
		as_of: NaiveDate,
		window: EstimationWindow,
	) -> EstimationResult {
		let EstimationWindow { max_age_days, decay_rate } = window;
		let mut notes = Vec::new();
		let mut contributions = Vec::new();
		let mut missing_candidate = 0usize;

		for poll in polls {
			let age_days = poll.age_days(as_of);
			if age_days < 0 {
				notes.push(format!(
					"excluded {} poll of {}: dated {} days after {as_of}",
					poll.source, poll.date, -age_days
				));
				continue;
			}
			if age_days > max_age_days {
				notes.push(format!(
					"excluded {} poll of {}: {age_days} days old, window is {max_age_days}",
					poll.source, poll.date
				));
				continue;
			}
			let Some(&raw_value) = poll.percentages.get(candidate) else {
				missing_candidate += 1;
				continue;
			};

			let source = self.normalizer.canonical(&poll.source);
			let factors =
				ProfileFactors::resolve(&source, profiles.get(&source), candidate, &mut notes);

			let weight_time = (-decay_rate * age_days as f64).exp();
			let weight_sample = (poll.sample_size.max(1) as f64).sqrt();
			let bias_coefficient = factors.bias_coefficient(&self.heuristics);
			let reliability = factors.reliability(&self.heuristics);
			let error_penalty = factors.error_penalty();
			let final_weight = weight_time * weight_sample * reliability * error_penalty;

			contributions.push(PollContribution {
				source,
				date: poll.date,
				sample_size: poll.sample_size,
				method: poll.method.clone(),
				age_days,
				raw_value,
				adjusted_value: raw_value * bias_coefficient,
				margin_of_error: poll.margin_of_error,
				weight_time,
				weight_sample,
				source_coefficient: factors.source_coefficient,
				candidate_coefficient: factors.candidate_coefficient,
				bias_coefficient,
				source_bonus: factors.source_bonus,
				candidate_bonus: factors.candidate_bonus,
				reliability,
				source_mean_error: factors.source_mean_error,
				candidate_mean_error: factors.candidate_mean_error,
				error_penalty,
				final_weight,
			});
		}

		if missing_candidate > 0 {
			notes.push(format!("{missing_candidate} poll(s) in window do not report {candidate}"));
		}

		let parameters = EstimationParameters { as_of, max_age_days, decay_rate };
		let aggregate = self.aggregate(&contributions);
		if aggregate.is_none() {
			notes.push(format!("no usable polls for {candidate}"));
		}

		EstimationResult {
			candidate: candidate.to_string(),
			percentage: aggregate.map(|(p, _)| p),
			margin_of_error: aggregate.map(|(_, m)| m),
			poll_count: if aggregate.is_some() { contributions.len() } else { 0 },
			contributions,
			notes,
			parameters,
		}
	}

	/// Weighted mean of the adjusted values and the combined margin of error.
	fn aggregate(&self, contributions: &[PollContribution]) -> Option<(f64, f64)> {
		let weight_sum: f64 = contributions.iter().map(|c| c.final_weight).sum();
		if contributions.is_empty() || !(weight_sum > 0.0) || !weight_sum.is_finite() {
			return None;
		}

		let z = self.heuristics.z_value;
		let mean = contributions.iter().map(|c| c.adjusted_value * c.final_weight).sum::<f64>() /
			weight_sum;
		let variance = contributions
			.iter()
			.map(|c| {
				let se = c.margin_of_error / z;
				c.final_weight.powi(2) * se.powi(2)
			})
			.sum::<f64>() /
			weight_sum.powi(2);

		Some((mean, z * variance.sqrt()))
	}
}
