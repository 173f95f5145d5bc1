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

//! Calibration engine.
//!
//! Measures how far each source's bias-corrected polls landed from the final results and
//! produces a new [`SourceProfileStore`]. Adjusted values are recomputed with the coefficients
//! of the *previous* store only; the values produced by a pass never feed back into the same
//! pass.
//!
//! Update rules, each followed by a clamp into the bounds of [`Heuristics`]:
//!
//! ```text
//! raw_bonus   = base - slope * (mean_error / max_error)
//! bonus       = (1 - α) * prev_bonus + α * raw_bonus
//! raw_coef    = prev_coef * mean(real / adjusted)
//! coefficient = (1 - β) * prev_coef + β * raw_coef
//! ```

use crate::{
	error::Error,
	estimator::ProfileFactors,
	normalize::SourceNormalizer,
	opt::{ClampBounds, Heuristics, LearningRates, ema},
	prelude::*,
	types::{CandidateProfile, PollRecord, SourceProfile, SourceProfileStore},
};
use chrono::NaiveDate;
use serde::Serialize;
use std::{collections::BTreeMap, fmt};

/// Which calibrated value a clamp applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampField {
	Bonus,
	Coefficient,
}

impl fmt::Display for ClampField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bonus => write!(f, "bias_weight"),
			Self::Coefficient => write!(f, "bias_coefficient"),
		}
	}
}

/// A calibrated value that had to be clamped into its bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClampEvent {
	pub source: SourceId,
	/// `None` for source-level values.
	pub candidate: Option<CandidateName>,
	pub field: ClampField,
	pub unclamped: f64,
	pub clamped: f64,
}

/// Outcome of one calibration pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
	/// The replacement store.
	pub profiles: SourceProfileStore,
	pub clamps: Vec<ClampEvent>,
	/// Number of (poll, candidate) errors measured.
	pub errors_used: usize,
	/// Polls inside the window.
	pub polls_used: usize,
	/// Polls outside the window.
	pub polls_skipped: usize,
	pub notes: Vec<String>,
}

#[derive(Debug, Default)]
struct Samples {
	errors: Vec<f64>,
	ratios: Vec<f64>,
}

impl Samples {
	fn record(&mut self, error: f64, ratio: Option<f64>) {
		self.errors.push(error);
		self.ratios.extend(ratio);
	}

	fn mean_error(&self) -> f64 {
		mean(&self.errors).unwrap_or(0.0)
	}

	/// Mean of `real / adjusted`, `1.0` when no ratio could be computed.
	fn mean_ratio(&self) -> f64 {
		mean(&self.ratios).unwrap_or(1.0)
	}
}

fn mean(values: &[f64]) -> Option<f64> {
	(!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

#[derive(Debug, Default)]
struct SourceSamples {
	global: Samples,
	candidates: BTreeMap<CandidateName, Samples>,
	/// Previous factors per candidate, as used to compute the adjusted values.
	previous: BTreeMap<CandidateName, ProfileFactors>,
}

fn round_to(value: f64, decimals: i32) -> f64 {
	let factor = 10f64.powi(decimals);
	(value * factor).round() / factor
}

/// The calibration engine, configured with its heuristics and the source lookup table.
#[derive(Debug, Clone, Default)]
pub struct CalibrationEngine {
	heuristics: Heuristics,
	normalizer: SourceNormalizer,
}

impl CalibrationEngine {
	pub fn new(heuristics: Heuristics, normalizer: SourceNormalizer) -> Self {
		Self { heuristics, normalizer }
	}

	/// Run one calibration pass.
	///
	/// Only polls dated within `max_age_days` before `election_date` are measured. Fails with
	/// [`Error::InsufficientData`] when there are no polls, no final results or no measurable
	/// error; the caller should then keep its current store rather than reset it.
	pub fn calibrate(
		&self,
		polls: &[PollRecord],
		final_results: &FinalResults,
		previous: &SourceProfileStore,
		election_date: NaiveDate,
		max_age_days: i64,
		rates: LearningRates,
	) -> Result<CalibrationReport, Error> {
		if polls.is_empty() {
			return Err(Error::InsufficientData("no polls to calibrate against".into()));
		}
		if final_results.is_empty() {
			return Err(Error::InsufficientData("no final results to calibrate against".into()));
		}

		let previous = previous.canonicalize(&self.normalizer);
		let mut notes = Vec::new();
		let mut samples: BTreeMap<SourceId, SourceSamples> = BTreeMap::new();
		let mut polls_used = 0;
		let mut errors_used = 0;

		for poll in polls {
			if !poll.within_window(election_date, max_age_days) {
				continue;
			}
			polls_used += 1;

			let source = self.normalizer.canonical(&poll.source);
			let prev_profile = previous.get(&source);
			let entry = samples.entry(source.clone()).or_default();

			for (candidate, &real) in final_results {
				let Some(&raw) = poll.percentages.get(candidate) else { continue };

				let factors = *entry.previous.entry(candidate.clone()).or_insert_with(|| {
					ProfileFactors::resolve(&source, prev_profile, candidate, &mut notes)
				});
				let adjusted = raw * factors.bias_coefficient(&self.heuristics);
				let error = (adjusted - real).abs();
				let ratio = (adjusted > 0.0).then(|| real / adjusted);

				entry.global.record(error, ratio);
				entry.candidates.entry(candidate.clone()).or_default().record(error, ratio);
				errors_used += 1;
			}
		}

		samples.retain(|_, s| !s.global.errors.is_empty());
		if samples.is_empty() {
			return Err(Error::InsufficientData(format!(
				"no computable errors: {polls_used} poll(s) in window, none reporting a candidate \
				 with a final result"
			)));
		}

		let max_error = samples.values().map(|s| s.global.mean_error()).fold(0.0, f64::max);
		let mut clamps = Vec::new();
		let mut profiles = SourceProfileStore::new();

		for (source, source_samples) in &samples {
			let profile = self.update_source(
				source,
				source_samples,
				previous.get(source),
				max_error,
				rates,
				&mut clamps,
				&mut notes,
			);
			profiles.insert(source.clone(), profile);
		}

		Ok(CalibrationReport {
			profiles: profiles.canonicalize(&self.normalizer),
			clamps,
			errors_used,
			polls_used,
			polls_skipped: polls.len() - polls_used,
			notes,
		})
	}

	/// `base - slope * (mean_error / max_error)`, or the upper bonus bound when every source was
	/// exact.
	fn raw_bonus(&self, mean_error: f64, max_error: f64) -> f64 {
		if max_error > 0.0 {
			let curve = self.heuristics.bonus_curve;
			curve.base - curve.slope * (mean_error / max_error)
		} else {
			self.heuristics.bonus_bounds.max
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn update_source(
		&self,
		source: &SourceId,
		samples: &SourceSamples,
		previous: Option<&SourceProfile>,
		max_error: f64,
		rates: LearningRates,
		clamps: &mut Vec<ClampEvent>,
		notes: &mut Vec<String>,
	) -> SourceProfile {
		let h = &self.heuristics;
		let mut clamp = |bounds: ClampBounds,
		                 value: f64,
		                 candidate: Option<&CandidateName>,
		                 field: ClampField| {
			let c = bounds.apply(value);
			if c.fired() {
				log::debug!(
					target: LOG_TARGET,
					"{source}{}: {field} {} clamped to {}",
					candidate.map(|c| format!("/{c}")).unwrap_or_default(),
					c.unclamped,
					c.value
				);
				clamps.push(ClampEvent {
					source: source.clone(),
					candidate: candidate.cloned(),
					field,
					unclamped: c.unclamped,
					clamped: c.value,
				});
			}
			c.value
		};

		// Source-level previous values do not depend on the candidate.
		let prev_source = samples
			.previous
			.values()
			.next()
			.copied()
			.unwrap_or_else(|| ProfileFactors::resolve(source, previous, "", notes));

		let mean_error = samples.global.mean_error();
		let bonus = clamp(
			h.bonus_bounds,
			ema(prev_source.source_bonus, self.raw_bonus(mean_error, max_error), rates.bonus),
			None,
			ClampField::Bonus,
		);
		let raw_coefficient = prev_source.source_coefficient * samples.global.mean_ratio();
		let coefficient = clamp(
			h.source_coefficient_bounds,
			ema(prev_source.source_coefficient, raw_coefficient, rates.coefficient_global),
			None,
			ClampField::Coefficient,
		);

		let mut candidates = BTreeMap::new();
		for (candidate, cand_samples) in &samples.candidates {
			let prev = samples.previous.get(candidate).copied().unwrap_or(prev_source);
			let cand_error = cand_samples.mean_error();
			let cand_bonus = clamp(
				h.bonus_bounds,
				ema(prev.candidate_bonus, self.raw_bonus(cand_error, max_error), rates.bonus),
				Some(candidate),
				ClampField::Bonus,
			);
			let raw_cand_coefficient = prev.candidate_coefficient * cand_samples.mean_ratio();
			let cand_coefficient = clamp(
				h.candidate_coefficient_bounds,
				ema(prev.candidate_coefficient, raw_cand_coefficient, rates.coefficient_candidate),
				Some(candidate),
				ClampField::Coefficient,
			);
			candidates.insert(
				candidate.clone(),
				CandidateProfile {
					bias_weight: round_to(cand_bonus, 3),
					mean_error: Some(round_to(cand_error, 3)),
					bias_coefficient: round_to(cand_coefficient, 4),
				},
			);
		}

		SourceProfile {
			bias_weight: round_to(bonus, 3),
			mean_error: Some(round_to(mean_error, 3)),
			bias_coefficient: round_to(coefficient, 4),
			candidates: (!candidates.is_empty()).then_some(candidates),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{Rng, SeedableRng, rngs::StdRng};

	fn date(s: &str) -> NaiveDate {
		NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
	}

	fn election() -> NaiveDate {
		date("2024-06-09")
	}

	fn poll(source: &str, day: &str, pct: &[(&str, f64)]) -> PollRecord {
		PollRecord {
			source: source.to_string(),
			date: date(day),
			sample_size: 1000,
			method: "CAWI".to_string(),
			percentages: pct.iter().map(|(c, v)| (c.to_string(), *v)).collect(),
			margin_of_error: 3.0,
		}
	}

	fn results(pct: &[(&str, f64)]) -> FinalResults {
		pct.iter().map(|(c, v)| (c.to_string(), *v)).collect()
	}

	fn run(
		polls: &[PollRecord],
		final_results: &FinalResults,
		previous: &SourceProfileStore,
	) -> Result<CalibrationReport, Error> {
		CalibrationEngine::default().calibrate(
			polls,
			final_results,
			previous,
			election(),
			40,
			LearningRates::default(),
		)
	}

	#[test]
	fn refuses_to_calibrate_from_nothing() {
		let res = results(&[("A", 40.0)]);
		let store = SourceProfileStore::new();

		assert!(matches!(run(&[], &res, &store), Err(Error::InsufficientData(_))));
		assert!(matches!(
			run(&[poll("S1", "2024-06-01", &[("A", 40.0)])], &FinalResults::new(), &store),
			Err(Error::InsufficientData(_))
		));
		// Outside the window and after the election.
		let polls =
			[poll("S1", "2024-04-01", &[("A", 40.0)]), poll("S1", "2024-06-10", &[("A", 40.0)])];
		assert!(matches!(run(&polls, &res, &store), Err(Error::InsufficientData(_))));
		// No overlap between poll candidates and results.
		let polls = [poll("S1", "2024-06-01", &[("B", 40.0)])];
		assert!(matches!(run(&polls, &res, &store), Err(Error::InsufficientData(_))));
	}

	#[test]
	fn worst_source_gets_the_lowest_bonus() {
		let polls = [poll("S1", "2024-06-01", &[("A", 40.0)]), poll("S2", "2024-06-01", &[("A", 45.0)])];
		let report = run(&polls, &results(&[("A", 41.0)]), &SourceProfileStore::new()).unwrap();

		assert_eq!(report.errors_used, 2);
		assert_eq!(report.polls_used, 2);
		let s1 = report.profiles.get("S1").unwrap();
		let s2 = report.profiles.get("S2").unwrap();

		assert_eq!(s1.mean_error, Some(1.0));
		assert_eq!(s2.mean_error, Some(4.0));
		assert!((s1.bias_weight - 1.0375).abs() < 1e-3);
		assert!((s2.bias_weight - 0.97).abs() < 1e-9);
		assert!((s1.bias_coefficient - 1.0175).abs() < 1e-4);
		assert!((s2.bias_coefficient - (0.3 + 0.7 * 41.0 / 45.0)).abs() < 1e-4);

		let a = s1.candidate("A").unwrap();
		assert!((a.bias_weight - 1.0375).abs() < 1e-3);
		assert!((a.bias_coefficient - 1.0175).abs() < 1e-4);
		assert!(report.clamps.is_empty());
	}

	#[test]
	fn adjusted_values_use_previous_coefficients() {
		let mut previous = SourceProfileStore::new();
		previous.insert(
			"S1",
			SourceProfile { bias_weight: 1.2, bias_coefficient: 1.1, ..Default::default() },
		);
		let report = run(
			&[poll("S1", "2024-06-01", &[("A", 40.0)])],
			&results(&[("A", 44.0)]),
			&previous,
		)
		.unwrap();

		let adjusted = 40.0 * 1.1f64.powf(0.7);
		let s1 = report.profiles.get("S1").unwrap();
		assert_eq!(s1.mean_error, Some(round_to((adjusted - 44.0).abs(), 3)));
		let expected = ema(1.1, 1.1 * 44.0 / adjusted, 0.7);
		assert!((s1.bias_coefficient - expected).abs() < 1e-4);

		// Single source: it is also the worst one. The candidate bonus starts from the
		// previous source bonus since there was no candidate block.
		let a = s1.candidate("A").unwrap();
		assert!((a.bias_weight - ema(1.2, 0.9, 0.3)).abs() < 1e-3);
		assert!((s1.bias_weight - ema(1.2, 0.9, 0.3)).abs() < 1e-3);
	}

	#[test]
	fn candidate_blocks_only_for_measured_pairs() {
		let polls = [
			poll("S1", "2024-06-01", &[("A", 40.0), ("B", 30.0), ("C", 5.0)]),
			poll("S2", "2024-06-02", &[("B", 33.0)]),
		];
		let report =
			run(&polls, &results(&[("A", 41.0), ("B", 31.0)]), &SourceProfileStore::new()).unwrap();

		let s1 = report.profiles.get("S1").unwrap().candidates.as_ref().unwrap();
		assert_eq!(s1.keys().collect::<Vec<_>>(), vec!["A", "B"]);
		let s2 = report.profiles.get("S2").unwrap().candidates.as_ref().unwrap();
		assert_eq!(s2.keys().collect::<Vec<_>>(), vec!["B"]);
	}

	#[test]
	fn exact_sources_converge_to_the_upper_bonus() {
		let polls = [
			poll("S1", "2024-06-01", &[("A", 40.0), ("B", 30.0)]),
			poll("S2", "2024-05-25", &[("A", 40.0)]),
		];
		let res = results(&[("A", 40.0), ("B", 30.0)]);
		let mut store = SourceProfileStore::new();
		let mut last_bonus = 1.0;

		for _ in 0..30 {
			store = run(&polls, &res, &store).unwrap().profiles;
			let s1 = store.get("S1").unwrap();
			assert_eq!(s1.bias_coefficient, 1.0);
			assert_eq!(s1.candidate("A").unwrap().bias_coefficient, 1.0);
			assert!(s1.bias_weight >= last_bonus);
			last_bonus = s1.bias_weight;
		}

		// Rounding to three decimals settles one step below the bound.
		for (_, profile) in store.iter() {
			assert!(profile.bias_weight >= 1.299 - 1e-9 && profile.bias_weight <= 1.3);
			assert_eq!(profile.mean_error, Some(0.0));
		}
	}

	#[test]
	fn extreme_ratios_are_clamped_and_reported() {
		let report = run(
			&[poll("S1", "2024-06-01", &[("A", 10.0)])],
			&results(&[("A", 60.0)]),
			&SourceProfileStore::new(),
		)
		.unwrap();

		let s1 = report.profiles.get("S1").unwrap();
		assert_eq!(s1.bias_coefficient, 1.4);
		assert_eq!(s1.candidate("A").unwrap().bias_coefficient, 1.6);

		let coefficient_clamps: Vec<_> =
			report.clamps.iter().filter(|c| c.field == ClampField::Coefficient).collect();
		assert_eq!(coefficient_clamps.len(), 2);
		assert!(coefficient_clamps.iter().all(|c| (c.unclamped - 4.5).abs() < 1e-9));
		assert_eq!(coefficient_clamps[0].candidate, None);
		assert_eq!(coefficient_clamps[1].candidate.as_deref(), Some("A"));
	}

	#[test]
	fn duplicate_source_names_are_pooled() {
		let engine = CalibrationEngine::new(
			Heuristics::default(),
			SourceNormalizer::from([("Atlas Intel", "AtlasIntel")]),
		);
		let polls =
			[poll("Atlas Intel", "2024-06-01", &[("A", 38.0)]), poll("AtlasIntel", "2024-06-03", &[("A", 44.0)])];
		let report = engine
			.calibrate(
				&polls,
				&results(&[("A", 40.0)]),
				&SourceProfileStore::new(),
				election(),
				40,
				LearningRates::default(),
			)
			.unwrap();

		assert_eq!(report.profiles.len(), 1);
		assert_eq!(report.profiles.get("AtlasIntel").unwrap().mean_error, Some(3.0));
	}

	#[test]
	fn randomized_outputs_stay_within_bounds() {
		let mut rng = StdRng::seed_from_u64(42);
		let h = Heuristics::default();

		for _ in 0..300 {
			let mut previous = SourceProfileStore::new();
			for i in 0..3 {
				let mut p = SourceProfile {
					bias_weight: rng.gen_range(0.01..5.0),
					mean_error: Some(rng.gen_range(0.0..50.0)),
					bias_coefficient: rng.gen_range(0.01..5.0),
					candidates: None,
				};
				if rng.gen_bool(0.5) {
					p.candidates = Some(BTreeMap::from([(
						"A".to_string(),
						CandidateProfile {
							bias_weight: rng.gen_range(0.01..5.0),
							mean_error: None,
							bias_coefficient: rng.gen_range(0.01..5.0),
						},
					)]));
				}
				previous.insert(format!("S{i}"), p);
			}

			let polls: Vec<PollRecord> = (0..rng.gen_range(1..10))
				.map(|_| {
					let source = format!("S{}", rng.gen_range(0..4));
					let a = if rng.gen_bool(0.1) { 0.0 } else { rng.gen_range(0.0..100.0) };
					let b = rng.gen_range(0.0..100.0);
					poll(&source, "2024-06-01", &[("A", a), ("B", b)])
				})
				.collect();
			let res = results(&[
				("A", if rng.gen_bool(0.1) { 0.0 } else { rng.gen_range(0.0..100.0) }),
				("B", rng.gen_range(0.0..100.0)),
			]);
			let rates = LearningRates {
				bonus: rng.gen_range(0.0..=1.0),
				coefficient_global: rng.gen_range(0.0..=1.0),
				coefficient_candidate: rng.gen_range(0.0..=1.0),
			};

			let report = CalibrationEngine::default()
				.calibrate(&polls, &res, &previous, election(), 40, rates)
				.unwrap();

			for (_, p) in report.profiles.iter() {
				assert!(h.bonus_bounds.contains(p.bias_weight), "{p:?}");
				assert!(h.source_coefficient_bounds.contains(p.bias_coefficient), "{p:?}");
				for c in p.candidates.as_ref().unwrap().values() {
					assert!(h.bonus_bounds.contains(c.bias_weight), "{c:?}");
					assert!(h.candidate_coefficient_bounds.contains(c.bias_coefficient), "{c:?}");
				}
			}
		}
	}
}
