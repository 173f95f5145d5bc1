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

//! Command implementations of the CLI, one module per subcommand.

pub mod calibrate;
pub mod converge;
pub mod estimate;
pub mod types;

pub use calibrate::calibrate_cmd;
pub use converge::converge_cmd;
pub use estimate::estimate_cmd;
pub use types::{CalibrateConfig, ConvergeConfig, EstimateConfig};

use crate::{
	error::Error,
	normalize::SourceNormalizer,
	opt::Heuristics,
	prelude::*,
	utils::read_optional_json_file,
};
use std::collections::BTreeMap;
use types::SharedConfig;

impl SharedConfig {
	/// Load the heuristics and the source lookup table, defaulting both when not provided.
	pub async fn load(&self) -> Result<(Heuristics, SourceNormalizer), Error> {
		let heuristics: Heuristics = read_optional_json_file(self.heuristics.as_deref()).await?;
		let aliases: BTreeMap<String, SourceId> =
			read_optional_json_file(self.aliases.as_deref()).await?;
		if !aliases.is_empty() {
			log::debug!(target: LOG_TARGET, "loaded {} source alias(es)", aliases.len());
		}
		Ok((heuristics, SourceNormalizer::new(aliases)))
	}
}
