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

use super::prelude::LOG_TARGET;
use http_body_util::Full;
use hyper::{
	Method, Request, Response, StatusCode,
	body::Bytes,
	header::{CONTENT_TYPE, HeaderValue},
	service::service_fn,
};
use hyper_util::{
	rt::{TokioExecutor, TokioIo},
	server::conn::auto::Builder,
};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub use hidden::*;

type Body = Full<Bytes>;

fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Body> {
	let mut res = Response::new(Body::new(body.into()));
	*res.status_mut() = status;
	res
}

async fn serve_req(req: Request<hyper::body::Incoming>) -> Result<Response<Body>, hyper::Error> {
	let res = match (req.method(), req.uri().path()) {
		(&Method::GET, "/metrics") => {
			let mut buffer = vec![];
			let encoder = TextEncoder::new();
			let metric_families = prometheus::gather();
			match encoder.encode(&metric_families, &mut buffer) {
				Ok(()) => {
					let mut res = response(StatusCode::OK, buffer);
					if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
						res.headers_mut().insert(CONTENT_TYPE, content_type);
					}
					res
				},
				Err(e) => response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
			}
		},
		(&Method::GET, "/") => response(StatusCode::OK, ""),
		_ => response(StatusCode::NOT_FOUND, ""),
	};

	Ok(res)
}

/// Start the prometheus endpoint on `port`. The server runs in the background until the process
/// exits.
pub async fn run(port: u16) -> Result<(), String> {
	let addr = SocketAddr::from(([0, 0, 0, 0], port));
	let listener = TcpListener::bind(&addr)
		.await
		.map_err(|e| format!("Failed bind socket on port {port} {e:?}"))?;

	log::info!(target: LOG_TARGET, "Started prometheus endpoint on http://{addr}");

	tokio::spawn(async move {
		loop {
			let (stream, _) = match listener.accept().await {
				Ok(conn) => conn,
				Err(e) => {
					log::warn!(target: LOG_TARGET, "Failed to accept prometheus connection: {e}");
					continue;
				},
			};

			let io = TokioIo::new(stream);
			let builder = Builder::new(TokioExecutor::new());
			let conn = builder.serve_connection_with_upgrades(io, service_fn(serve_req)).into_owned();

			tokio::spawn(async move {
				if let Err(e) = conn.await {
					log::debug!(target: LOG_TARGET, "prometheus connection error: {e}");
				}
			});
		}
	});

	Ok(())
}

mod hidden {
	use once_cell::sync::Lazy;
	use prometheus::{Counter, Gauge, opts, register_counter, register_gauge};

	static ESTIMATES: Lazy<Counter> = Lazy::new(|| {
		register_counter!(opts!("poll_calibrator_estimates", "Number of candidate estimates computed"))
			.expect("metric registered once; qed")
	});
	static INSUFFICIENT_ESTIMATES: Lazy<Counter> = Lazy::new(|| {
		register_counter!(opts!(
			"poll_calibrator_insufficient_estimates",
			"Number of candidate estimates without any usable poll",
		))
		.expect("metric registered once; qed")
	});
	static POLLS_USED: Lazy<Gauge> = Lazy::new(|| {
		register_gauge!(opts!(
			"poll_calibrator_polls_used",
			"Number of polls retained by the last estimate",
		))
		.expect("metric registered once; qed")
	});
	static SKIPPED_RECORDS: Lazy<Counter> = Lazy::new(|| {
		register_counter!(opts!(
			"poll_calibrator_skipped_records",
			"Number of malformed poll records skipped during ingestion",
		))
		.expect("metric registered once; qed")
	});
	static CALIBRATIONS: Lazy<Counter> = Lazy::new(|| {
		register_counter!(opts!("poll_calibrator_calibrations", "Number of successful calibration passes"))
			.expect("metric registered once; qed")
	});
	static CALIBRATION_FAILURES: Lazy<Counter> = Lazy::new(|| {
		register_counter!(opts!(
			"poll_calibrator_calibration_failures",
			"Number of calibration passes refused for lack of data",
		))
		.expect("metric registered once; qed")
	});
	static CLAMPS: Lazy<Counter> = Lazy::new(|| {
		register_counter!(opts!(
			"poll_calibrator_clamps",
			"Number of calibrated values clamped into their bounds",
		))
		.expect("metric registered once; qed")
	});
	static ITERATION: Lazy<Gauge> = Lazy::new(|| {
		register_gauge!(opts!("poll_calibrator_iteration", "Current convergence iteration"))
			.expect("metric registered once; qed")
	});
	static MAX_DIFF: Lazy<Gauge> = Lazy::new(|| {
		register_gauge!(opts!(
			"poll_calibrator_max_diff",
			"Largest gap between an estimate and the final result in the last iteration",
		))
		.expect("metric registered once; qed")
	});
	static ITERATION_DURATION: Lazy<Gauge> = Lazy::new(|| {
		register_gauge!(opts!(
			"poll_calibrator_iteration_duration_ms",
			"Time in milliseconds the last convergence iteration took",
		))
		.expect("metric registered once; qed")
	});
	static CONVERGED: Lazy<Gauge> = Lazy::new(|| {
		register_gauge!(opts!(
			"poll_calibrator_converged",
			"1 if the last convergence loop reached the tolerance, 0 otherwise",
		))
		.expect("metric registered once; qed")
	});

	pub fn on_estimate(poll_count: usize) {
		ESTIMATES.inc();
		if poll_count == 0 {
			INSUFFICIENT_ESTIMATES.inc();
		}
		POLLS_USED.set(poll_count as f64);
	}

	pub fn on_skipped_records(n: usize) {
		SKIPPED_RECORDS.inc_by(n as f64);
	}

	pub fn on_calibration(clamps: usize) {
		CALIBRATIONS.inc();
		CLAMPS.inc_by(clamps as f64);
	}

	pub fn on_calibration_failure() {
		CALIBRATION_FAILURES.inc();
	}

	pub fn set_iteration(iteration: u32) {
		ITERATION.set(iteration as f64);
	}

	pub fn set_max_diff(max_diff: f64) {
		MAX_DIFF.set(max_diff);
	}

	pub fn observe_iteration_duration(time: f64) {
		ITERATION_DURATION.set(time);
	}

	pub fn set_converged(converged: bool) {
		CONVERGED.set(if converged { 1.0 } else { 0.0 });
	}
}
