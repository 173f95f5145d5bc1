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

//! Canonicalization of source identifiers.
//!
//! The same institute is often published under several names. The lookup table is injected as
//! configuration; nothing here holds global state.

use crate::{
	prelude::*,
	types::{CandidateProfile, SourceProfile, SourceProfileStore},
};
use std::collections::BTreeMap;

/// Maps raw source identifiers to their canonical form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceNormalizer {
	aliases: BTreeMap<String, SourceId>,
}

impl SourceNormalizer {
	pub fn new(aliases: BTreeMap<String, SourceId>) -> Self {
		let aliases = aliases.into_iter().map(|(k, v)| (k.trim().to_string(), v)).collect();
		Self { aliases }
	}

	/// The canonical identifier of `raw`: the alias target when known, else `raw` trimmed.
	pub fn canonical(&self, raw: &str) -> SourceId {
		let trimmed = raw.trim();
		if trimmed.is_empty() {
			return UNKNOWN_SOURCE.to_string();
		}
		self.aliases.get(trimmed).cloned().unwrap_or_else(|| trimmed.to_string())
	}
}

impl<const N: usize> From<[(&str, &str); N]> for SourceNormalizer {
	fn from(pairs: [(&str, &str); N]) -> Self {
		Self::new(pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
	}
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
	let (sum, n) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
	(n > 0).then(|| sum / n as f64)
}

fn merge_candidates(profiles: &[&CandidateProfile]) -> CandidateProfile {
	CandidateProfile {
		bias_weight: mean(profiles.iter().map(|p| p.bias_weight)).unwrap_or(1.0),
		mean_error: mean(profiles.iter().filter_map(|p| p.mean_error)),
		bias_coefficient: mean(profiles.iter().map(|p| p.bias_coefficient)).unwrap_or(1.0),
	}
}

/// Merge profiles describing the same source by arithmetic mean of every numeric field.
///
/// Candidate blocks are merged per candidate over the profiles that have one for that candidate.
pub fn merge_profiles(profiles: &[&SourceProfile]) -> SourceProfile {
	if let [single] = profiles {
		return (*single).clone();
	}

	let mut per_candidate: BTreeMap<&str, Vec<&CandidateProfile>> = BTreeMap::new();
	for block in profiles.iter().filter_map(|p| p.candidates.as_ref()) {
		for (name, cand) in block {
			per_candidate.entry(name.as_str()).or_default().push(cand);
		}
	}
	let candidates = (!per_candidate.is_empty()).then(|| {
		per_candidate
			.into_iter()
			.map(|(name, group)| (name.to_string(), merge_candidates(&group)))
			.collect()
	});

	SourceProfile {
		bias_weight: mean(profiles.iter().map(|p| p.bias_weight)).unwrap_or(1.0),
		mean_error: mean(profiles.iter().filter_map(|p| p.mean_error)),
		bias_coefficient: mean(profiles.iter().map(|p| p.bias_coefficient)).unwrap_or(1.0),
		candidates,
	}
}

impl SourceProfileStore {
	/// Re-key the store by canonical source, merging entries that collapse onto the same key.
	pub fn canonicalize(&self, normalizer: &SourceNormalizer) -> SourceProfileStore {
		let mut groups: BTreeMap<SourceId, Vec<&SourceProfile>> = BTreeMap::new();
		for (raw, profile) in self.iter() {
			groups.entry(normalizer.canonical(raw)).or_default().push(profile);
		}

		groups
			.into_iter()
			.map(|(source, group)| {
				if group.len() > 1 {
					log::debug!(
						target: LOG_TARGET,
						"merging {} profiles onto canonical source `{source}`",
						group.len()
					);
				}
				(source, merge_profiles(&group))
			})
			.collect()
	}
}
