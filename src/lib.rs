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

//! Poll aggregation and source calibration.
//!
//! The [`estimator`] turns polls into per-candidate estimates, weighting each poll by age,
//! sample size and the calibration state of its source. The [`calibration`] engine updates that
//! state from the errors of past polls against final results, and the [`convergence`] loop
//! alternates both until the estimates land within a tolerance.

pub mod calibration;
pub mod commands;
pub mod convergence;
pub mod error;
pub mod estimator;
pub mod fetch;
pub mod normalize;
pub mod opt;
pub mod prelude;
pub mod prometheus;
pub mod types;
pub mod utils;
