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

//! Tunable parameters of the estimator and the calibration engine.
//!
//! The blend exponents, bonus formula and clamp bounds are heuristic constants. They are kept
//! here as named values that can be overridden from a JSON file, the defaults being the values
//! the rest of the crate is tested against.

use crate::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a source-level and a candidate-level factor are blended:
/// `source ^ source_exp * candidate ^ candidate_exp`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blend {
	pub source: f64,
	pub candidate: f64,
}

impl Blend {
	pub fn apply(&self, source_value: f64, candidate_value: f64) -> f64 {
		source_value.powf(self.source) * candidate_value.powf(self.candidate)
	}
}

impl Default for Blend {
	fn default() -> Self {
		Self { source: 0.7, candidate: 0.3 }
	}
}

/// Inclusive bounds a calibrated value is clamped into.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClampBounds {
	pub min: f64,
	pub max: f64,
}

/// Outcome of [`ClampBounds::apply`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Clamped {
	pub value: f64,
	pub unclamped: f64,
}

impl Clamped {
	pub fn fired(&self) -> bool {
		self.value != self.unclamped
	}
}

impl ClampBounds {
	pub const fn new(min: f64, max: f64) -> Self {
		Self { min, max }
	}

	/// Clamp `value` into the bounds. `NaN` lands on the lower bound.
	pub fn apply(&self, value: f64) -> Clamped {
		let clamped = if value.is_nan() { self.min } else { value.clamp(self.min, self.max) };
		Clamped { value: clamped, unclamped: value }
	}

	pub fn contains(&self, value: f64) -> bool {
		value >= self.min && value <= self.max
	}
}

impl fmt::Display for ClampBounds {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}, {}]", self.min, self.max)
	}
}

/// Raw reliability bonus of a source: `base - slope * (mean_error / max_error)`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusCurve {
	pub base: f64,
	pub slope: f64,
}

impl Default for BonusCurve {
	fn default() -> Self {
		Self { base: 1.2, slope: 0.3 }
	}
}

/// All heuristic constants in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
	/// Blend of the bias coefficients.
	pub coefficient_blend: Blend,
	/// Blend of the reliability bonuses.
	pub bonus_blend: Blend,
	pub bonus_curve: BonusCurve,
	/// Bounds of both the source and the candidate reliability bonus.
	pub bonus_bounds: ClampBounds,
	pub source_coefficient_bounds: ClampBounds,
	pub candidate_coefficient_bounds: ClampBounds,
	/// Two-sided z-value the reported margins of error are assumed to use.
	pub z_value: f64,
}

impl Default for Heuristics {
	fn default() -> Self {
		Self {
			coefficient_blend: Blend::default(),
			bonus_blend: Blend::default(),
			bonus_curve: BonusCurve::default(),
			bonus_bounds: ClampBounds::new(0.7, 1.3),
			source_coefficient_bounds: ClampBounds::new(0.6, 1.4),
			candidate_coefficient_bounds: ClampBounds::new(0.5, 1.6),
			z_value: 1.96,
		}
	}
}

/// Window and decay applied by the estimator.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EstimationWindow {
	pub max_age_days: i64,
	pub decay_rate: f64,
}

impl Default for EstimationWindow {
	fn default() -> Self {
		Self { max_age_days: DEFAULT_MAX_AGE_DAYS, decay_rate: DEFAULT_DECAY_RATE }
	}
}

/// Learning rates of the exponential moving averages used by the calibration engine.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRates {
	pub bonus: f64,
	pub coefficient_global: f64,
	pub coefficient_candidate: f64,
}

impl Default for LearningRates {
	fn default() -> Self {
		Self {
			bonus: DEFAULT_LR_BONUS,
			coefficient_global: DEFAULT_LR_COEF_GLOBAL,
			coefficient_candidate: DEFAULT_LR_COEF_CANDIDATE,
		}
	}
}

/// `(1 - rate) * previous + rate * target`.
pub fn ema(previous: f64, target: f64, rate: f64) -> f64 {
	(1.0 - rate) * previous + rate * target
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clamp_reports_when_it_fires() {
		let bounds = ClampBounds::new(0.7, 1.3);
		assert!(!bounds.apply(1.0).fired());
		let high = bounds.apply(2.0);
		assert!(high.fired());
		assert_eq!(high.value, 1.3);
		assert_eq!(high.unclamped, 2.0);
		assert_eq!(bounds.apply(f64::NAN).value, 0.7);
	}

	#[test]
	fn blend_of_neutral_factors_is_neutral() {
		let blend = Blend::default();
		assert_eq!(blend.apply(1.0, 1.0), 1.0);
		assert!((blend.apply(1.1, 1.0) - 1.1f64.powf(0.7)).abs() < 1e-12);
	}

	#[test]
	fn partial_heuristics_file_keeps_defaults() {
		let h: Heuristics =
			serde_json::from_str(r#"{ "z_value": 1.645 }"#).expect("valid heuristics; qed");
		assert_eq!(h.z_value, 1.645);
		assert_eq!(h.bonus_bounds, ClampBounds::new(0.7, 1.3));
		assert_eq!(h.coefficient_blend, Blend::default());
	}

	#[test]
	fn ema_interpolates() {
		assert_eq!(ema(1.0, 2.0, 0.0), 1.0);
		assert_eq!(ema(1.0, 2.0, 1.0), 2.0);
		assert!((ema(1.0, 2.0, 0.3) - 1.3).abs() < 1e-12);
	}
}
