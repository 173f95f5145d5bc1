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

//! # Poll Calibrator.
//!
//! Aggregates opinion polls into per-candidate estimates and calibrates polling sources against
//! final election results. See `help` for more information.
//!
//! # Implementation Notes:
//!
//! Every command reads its inputs from JSON files and writes its outputs to JSON files. The
//! `converge` command re-reads the polls file on every iteration, so an external agent can keep
//! it up to date while the loop runs.
#![cfg_attr(docsrs, feature(doc_cfg))]

use clap::Parser;
use futures::future::{BoxFuture, FutureExt};
use poll_calibrator::{
	commands,
	error::Error,
	prelude::{DEFAULT_PROMETHEUS_PORT, LOG_TARGET},
	prometheus,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Parser)]
#[cfg_attr(test, derive(PartialEq))]
#[clap(author, version, about)]
pub struct Opt {
	#[clap(subcommand)]
	pub command: Command,

	/// The prometheus endpoint TCP port.
	#[clap(long, short, env = "PROMETHEUS_PORT", default_value_t = DEFAULT_PROMETHEUS_PORT)]
	pub prometheus_port: u16,

	/// Sets a custom logging filter. Syntax is `<target>=<level>`, e.g.
	/// -lpoll-calibrator=debug.
	///
	/// Log levels (least to most verbose) are error, warn, info, debug, and trace.
	/// By default, all targets log `info`. The global log level can be set with `-l<level>`.
	#[clap(long, short, default_value = "info")]
	pub log: String,
}

#[derive(Debug, Clone, Parser)]
#[cfg_attr(test, derive(PartialEq))]
pub enum Command {
	/// Estimate candidate support from a set of polls.
	Estimate(commands::EstimateConfig),
	/// Run one calibration pass of the polling sources against final results.
	Calibrate(commands::CalibrateConfig),
	/// Estimate and calibrate repeatedly until the estimates match the final results.
	Converge(commands::ConvergeConfig),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
	let Opt { command, prometheus_port, log } = Opt::parse();
	let filter = EnvFilter::from_default_env().add_directive(log.parse()?);
	tracing_subscriber::fmt().with_env_filter(filter).init();

	if let Err(e) = prometheus::run(prometheus_port).await {
		log::warn!(target: LOG_TARGET, "Failed to start prometheus endpoint: {e}");
	}

	let fut = match command {
		Command::Estimate(cfg) => commands::estimate_cmd(cfg).boxed(),
		Command::Calibrate(cfg) => commands::calibrate_cmd(cfg).boxed(),
		Command::Converge(cfg) => commands::converge_cmd(cfg).boxed(),
	};

	let res = run_command(fut).await;

	log::debug!(target: LOG_TARGET, "execution finished. outcome = {res:?}");
	res
}

#[cfg(target_family = "unix")]
async fn run_command(fut: BoxFuture<'_, Result<(), Error>>) -> Result<(), Error> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut stream_int = signal(SignalKind::interrupt()).map_err(Error::Io)?;
	let mut stream_term = signal(SignalKind::terminate()).map_err(Error::Io)?;

	tokio::select! {
		_ = stream_int.recv() => {
			log::warn!(target: LOG_TARGET, "interrupted, outputs of the current command may be missing");
			Ok(())
		}
		_ = stream_term.recv() => {
			log::warn!(target: LOG_TARGET, "terminated, outputs of the current command may be missing");
			Ok(())
		}
		res = fut => res,
	}
}

#[cfg(not(unix))]
async fn run_command(fut: BoxFuture<'_, Result<(), Error>>) -> Result<(), Error> {
	use tokio::signal::ctrl_c;

	tokio::select! {
		_ = ctrl_c() => {
			log::warn!(target: LOG_TARGET, "interrupted, outputs of the current command may be missing");
			Ok(())
		},
		res = fut => res,
	}
}
