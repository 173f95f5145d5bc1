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

//! The convergence loop: fetch, estimate, calibrate and check until the estimates land within a
//! tolerance of the final results or the iteration cap is hit.
//!
//! Each iteration estimates with the store produced by the previous calibration (or the
//! initial store on the first iteration) and then replaces that store wholesale. Iterations are
//! strictly sequential.

use crate::{
	calibration::CalibrationEngine,
	error::Error,
	estimator::Estimator,
	fetch::PollSource,
	opt::{EstimationWindow, LearningRates},
	prelude::*,
	prometheus,
	types::{PollRecord, SkippedRecord, Snapshot, SourceProfileStore},
	utils::{TimedFuture, write_data_to_json_file},
};
use chrono::NaiveDate;
use serde::Serialize;
use std::{collections::BTreeMap, path::PathBuf, time::Instant};

/// States of the loop. `Converged` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
	Fetching,
	Estimating,
	Calibrating,
	Checking,
	Converged,
	Exhausted,
}

/// How the loop ended. Running out of iterations is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
	Converged,
	Exhausted,
}

#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
	pub final_results: FinalResults,
	/// Candidates to estimate. All candidates of the final results when empty.
	pub candidates: Vec<CandidateName>,
	/// Reference date of the estimates.
	pub as_of: NaiveDate,
	/// Reference date of the calibration window.
	pub election_date: NaiveDate,
	pub window: EstimationWindow,
	pub calibration_max_age_days: i64,
	pub rates: LearningRates,
	pub tolerance: f64,
	pub max_iterations: u32,
	/// Where to write one snapshot per iteration, if anywhere.
	pub history_dir: Option<PathBuf>,
}

impl ConvergenceConfig {
	pub fn new(final_results: FinalResults, as_of: NaiveDate, election_date: NaiveDate) -> Self {
		Self {
			final_results,
			candidates: Vec::new(),
			as_of,
			election_date,
			window: EstimationWindow::default(),
			calibration_max_age_days: DEFAULT_CALIBRATION_MAX_AGE_DAYS,
			rates: LearningRates::default(),
			tolerance: DEFAULT_TOLERANCE,
			max_iterations: DEFAULT_MAX_ITERATIONS,
			history_dir: None,
		}
	}

	fn tracked_candidates(&self) -> Vec<CandidateName> {
		if self.candidates.is_empty() {
			self.final_results.keys().cloned().collect()
		} else {
			self.candidates.clone()
		}
	}
}

/// Summary of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
	pub iteration: u32,
	pub polls: usize,
	/// Records of this fetch dropped as malformed.
	pub skipped: Vec<SkippedRecord>,
	pub estimates: BTreeMap<CandidateName, f64>,
	pub max_diff: Option<f64>,
	/// Whether the calibration pass produced a new store.
	pub calibrated: bool,
	pub clamps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceReport {
	pub outcome: Outcome,
	pub iterations: u32,
	pub max_diff: Option<f64>,
	/// The store produced by the last successful calibration.
	pub profiles: SourceProfileStore,
	pub history: Vec<IterationRecord>,
}

/// Decide where the loop goes after `Checking`.
pub fn check(max_diff: Option<f64>, tolerance: f64, iteration: u32, max_iterations: u32) -> LoopState {
	match max_diff {
		Some(diff) if diff <= tolerance => LoopState::Converged,
		_ if iteration >= max_iterations => LoopState::Exhausted,
		_ => LoopState::Fetching,
	}
}

pub struct ConvergenceLoop {
	estimator: Estimator,
	engine: CalibrationEngine,
	config: ConvergenceConfig,
}

impl ConvergenceLoop {
	pub fn new(estimator: Estimator, engine: CalibrationEngine, config: ConvergenceConfig) -> Self {
		Self { estimator, engine, config }
	}

	/// Run the loop from `initial` profiles, refreshing polls through `source`.
	///
	/// A failing fetch aborts the loop with that error. A calibration pass refused for lack of
	/// data keeps the current store for the next iteration.
	pub async fn run<S>(
		&self,
		source: &mut S,
		initial: SourceProfileStore,
	) -> Result<ConvergenceReport, Error>
	where
		S: PollSource + ?Sized,
	{
		let cfg = &self.config;
		let candidates = cfg.tracked_candidates();
		let mut state = LoopState::Fetching;
		let mut iteration = 1u32;
		let mut profiles = initial;
		let mut polls: Vec<PollRecord> = Vec::new();
		let mut skipped: Vec<SkippedRecord> = Vec::new();
		let mut snapshot: Option<Snapshot> = None;
		let mut calibrated = (false, 0usize);
		let mut history = Vec::new();
		let mut started = Instant::now();

		loop {
			let next = match state {
				LoopState::Fetching => {
					started = Instant::now();
					prometheus::set_iteration(iteration);
					log::info!(target: LOG_TARGET, "iteration #{iteration}: fetching polls");

					let (fetched, elapsed) = source.fetch().timed().await;
					let fetched = fetched?;
					log::debug!(target: LOG_TARGET, "fetch took {}ms", elapsed.as_millis());
					prometheus::on_skipped_records(fetched.skipped.len());
					polls = fetched.polls;
					skipped = fetched.skipped;
					LoopState::Estimating
				},
				LoopState::Estimating => {
					let estimates = candidates
						.iter()
						.map(|c| {
							let result =
								self.estimator.estimate(&polls, c, &profiles, cfg.as_of, cfg.window);
							result.log();
							prometheus::on_estimate(result.poll_count);
							(c.clone(), result)
						})
						.collect();
					let snap = Snapshot::new(iteration, estimates, cfg.final_results.clone());
					if let Some(dir) = &cfg.history_dir {
						let path = dir.join(format!("snapshot_{iteration:03}.json"));
						write_data_to_json_file(&snap, &path).await?;
					}
					snapshot = Some(snap);
					LoopState::Calibrating
				},
				LoopState::Calibrating => {
					let final_results =
						snapshot.as_ref().map(|s| &s.final_results).unwrap_or(&cfg.final_results);
					match self.engine.calibrate(
						&polls,
						final_results,
						&profiles,
						cfg.election_date,
						cfg.calibration_max_age_days,
						cfg.rates,
					) {
						Ok(report) => {
							prometheus::on_calibration(report.clamps.len());
							calibrated = (true, report.clamps.len());
							profiles = report.profiles;
						},
						Err(Error::InsufficientData(reason)) => {
							log::warn!(
								target: LOG_TARGET,
								"iteration #{iteration}: cannot calibrate this round, keeping current profiles: {reason}"
							);
							prometheus::on_calibration_failure();
							calibrated = (false, 0);
						},
						Err(e) => return Err(e),
					}
					LoopState::Checking
				},
				LoopState::Checking => {
					let max_diff = snapshot.as_ref().and_then(Snapshot::max_diff);
					let estimates =
						snapshot.as_ref().map(Snapshot::estimated_percentages).unwrap_or_default();

					match max_diff {
						Some(diff) => {
							prometheus::set_max_diff(diff);
							log::info!(
								target: LOG_TARGET,
								"iteration #{iteration}: max difference {diff:.2} (tolerance {:.2})",
								cfg.tolerance
							);
						},
						None => log::warn!(
							target: LOG_TARGET,
							"iteration #{iteration}: no candidate could be compared with the final results"
						),
					}
					prometheus::observe_iteration_duration(started.elapsed().as_millis() as f64);

					history.push(IterationRecord {
						iteration,
						polls: polls.len(),
						skipped: std::mem::take(&mut skipped),
						estimates,
						max_diff,
						calibrated: calibrated.0,
						clamps: calibrated.1,
					});

					let next = check(max_diff, cfg.tolerance, iteration, cfg.max_iterations);
					if next == LoopState::Fetching {
						iteration += 1;
					}
					next
				},
				LoopState::Converged | LoopState::Exhausted => {
					let outcome = if state == LoopState::Converged {
						Outcome::Converged
					} else {
						Outcome::Exhausted
					};
					prometheus::set_converged(outcome == Outcome::Converged);
					let max_diff = history.last().and_then(|r: &IterationRecord| r.max_diff);
					return Ok(ConvergenceReport {
						outcome,
						iterations: iteration,
						max_diff,
						profiles,
						history,
					});
				},
			};

			log::trace!(target: LOG_TARGET, "{state:?} -> {next:?}");
			state = next;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fetch::FetchedPolls;
	use futures::future::{BoxFuture, FutureExt};

	fn date(s: &str) -> NaiveDate {
		NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
	}

	struct FixedSource {
		polls: Vec<PollRecord>,
		fetches: usize,
	}

	impl PollSource for FixedSource {
		fn fetch(&mut self) -> BoxFuture<'_, Result<FetchedPolls, Error>> {
			self.fetches += 1;
			let polls = self.polls.clone();
			async move { Ok(FetchedPolls { polls, skipped: Vec::new() }) }.boxed()
		}
	}

	struct BrokenSource;

	impl PollSource for BrokenSource {
		fn fetch(&mut self) -> BoxFuture<'_, Result<FetchedPolls, Error>> {
			async { Err::<FetchedPolls, _>(Error::Fetch("search service unavailable".into())) }.boxed()
		}
	}

	fn biased_polls() -> Vec<PollRecord> {
		["2024-05-28", "2024-05-30", "2024-06-01"]
			.into_iter()
			.map(|d| PollRecord {
				source: "S1".to_string(),
				date: date(d),
				sample_size: 1000,
				method: "CATI".to_string(),
				percentages: BTreeMap::from([("A".to_string(), 44.0), ("B".to_string(), 33.0)]),
				margin_of_error: 3.0,
			})
			.collect()
	}

	fn config(tolerance: f64, max_iterations: u32) -> ConvergenceConfig {
		let results = BTreeMap::from([("A".to_string(), 40.0), ("B".to_string(), 30.0)]);
		let mut cfg = ConvergenceConfig::new(results, date("2024-06-01"), date("2024-06-09"));
		cfg.tolerance = tolerance;
		cfg.max_iterations = max_iterations;
		cfg
	}

	fn new_loop(cfg: ConvergenceConfig) -> ConvergenceLoop {
		ConvergenceLoop::new(Estimator::default(), CalibrationEngine::default(), cfg)
	}

	#[test]
	fn check_transitions() {
		assert_eq!(check(Some(1.0), 1.0, 1, 5), LoopState::Converged);
		assert_eq!(check(Some(1.5), 1.0, 1, 5), LoopState::Fetching);
		assert_eq!(check(Some(1.5), 1.0, 5, 5), LoopState::Exhausted);
		assert_eq!(check(None, 1.0, 2, 5), LoopState::Fetching);
		assert_eq!(check(None, 1.0, 5, 5), LoopState::Exhausted);
		assert_eq!(check(Some(0.2), 1.0, 5, 5), LoopState::Converged);
	}

	#[tokio::test]
	async fn biased_source_is_corrected_until_convergence() {
		let mut source = FixedSource { polls: biased_polls(), fetches: 0 };
		let report =
			new_loop(config(1.0, 10)).run(&mut source, SourceProfileStore::new()).await.unwrap();

		assert_eq!(report.outcome, Outcome::Converged);
		assert!(report.iterations > 1 && report.iterations <= 5, "{report:?}");
		assert_eq!(source.fetches as u32, report.iterations);
		assert!(report.max_diff.unwrap() <= 1.0);

		// The first iteration ran with neutral profiles.
		assert!((report.history[0].estimates["A"] - 44.0).abs() < 1e-9);
		assert!(report.history.windows(2).all(|w| w[1].max_diff < w[0].max_diff));
		assert!(report.profiles.get("S1").unwrap().bias_coefficient < 1.0);
	}

	#[tokio::test]
	async fn first_iteration_uses_the_initial_profiles() {
		let coefficient = 40.0 / 44.0;
		let initial: SourceProfileStore = serde_json::from_value(serde_json::json!({
			"S1": {
				"bias_coefficient": coefficient,
				"candidates": {
					"A": { "bias_coefficient": coefficient },
					"B": { "bias_coefficient": coefficient }
				}
			}
		}))
		.unwrap();
		let mut source = FixedSource { polls: biased_polls(), fetches: 0 };
		let report = new_loop(config(0.5, 10)).run(&mut source, initial).await.unwrap();

		assert_eq!(report.outcome, Outcome::Converged);
		assert_eq!(report.iterations, 1);
		assert!((report.history[0].estimates["A"] - 40.0).abs() < 1e-9);
	}

	#[tokio::test]
	async fn gives_up_after_the_cap() {
		// Polls report nobody that has a final result: nothing to estimate or calibrate.
		let polls = biased_polls()
			.into_iter()
			.map(|mut p| {
				p.percentages = BTreeMap::from([("Z".to_string(), 10.0)]);
				p
			})
			.collect();
		let mut source = FixedSource { polls, fetches: 0 };
		let report =
			new_loop(config(1.0, 3)).run(&mut source, SourceProfileStore::new()).await.unwrap();

		assert_eq!(report.outcome, Outcome::Exhausted);
		assert_eq!(report.iterations, 3);
		assert_eq!(report.history.len(), 3);
		assert!(report.history.iter().all(|r| !r.calibrated && r.max_diff.is_none()));
		assert!(report.profiles.is_empty());
	}

	#[tokio::test]
	async fn fetch_failure_aborts() {
		let err = new_loop(config(1.0, 3))
			.run(&mut BrokenSource, SourceProfileStore::new())
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Fetch(_)));
	}

	#[tokio::test]
	async fn snapshots_are_written_per_iteration() {
		let dir = tempfile::tempdir().unwrap();
		let mut cfg = config(0.0, 2);
		cfg.history_dir = Some(dir.path().to_path_buf());
		let mut source = FixedSource { polls: biased_polls(), fetches: 0 };

		let report = new_loop(cfg).run(&mut source, SourceProfileStore::new()).await.unwrap();
		assert_eq!(report.outcome, Outcome::Exhausted);

		for i in 1..=2 {
			let path = dir.path().join(format!("snapshot_{i:03}.json"));
			let snap: serde_json::Value =
				serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
			assert_eq!(snap["iteration"], i);
			assert_eq!(snap["final_results"]["A"], 40.0);
			assert!(snap["estimates"]["A"]["contributions"].is_array());
		}
	}

	struct SourceWithMalformedRecord;

	impl PollSource for SourceWithMalformedRecord {
		fn fetch(&mut self) -> BoxFuture<'_, Result<FetchedPolls, Error>> {
			let skipped =
				vec![SkippedRecord { index: 3, reason: "invalid date: `sometime in May`".into() }];
			async move { Ok(FetchedPolls { polls: biased_polls(), skipped }) }.boxed()
		}
	}

	#[tokio::test]
	async fn malformed_records_are_kept_in_the_history() {
		let report = new_loop(config(0.0, 2))
			.run(&mut SourceWithMalformedRecord, SourceProfileStore::new())
			.await
			.unwrap();

		assert_eq!(report.history.len(), 2);
		for record in &report.history {
			assert_eq!(record.skipped.len(), 1);
			assert_eq!(record.skipped[0].index, 3);
		}
		let json = serde_json::to_value(&report).unwrap();
		assert_eq!(json["history"][0]["skipped"][0]["reason"], "invalid date: `sometime in May`");
	}
}
