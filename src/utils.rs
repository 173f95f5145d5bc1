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

use crate::prelude::LOG_TARGET;
use anyhow::Context;
use pin_project_lite::pin_project;
use serde::{Serialize, de::DeserializeOwned};
use std::{
	fs::{self, File},
	future::Future,
	io::{BufWriter, Read, Write},
	path::Path,
	pin::Pin,
	task::{Context as TaskContext, Poll},
	time::{Duration, Instant},
};

pin_project! {
	pub struct Timed<Fut>
		where
		Fut: Future,
	{
		#[pin]
		inner: Fut,
		start: Option<Instant>,
	}
}

impl<Fut> Future for Timed<Fut>
where
	Fut: Future,
{
	type Output = (Fut::Output, Duration);

	fn poll(self: Pin<&mut Self>, cx: &mut TaskContext) -> Poll<Self::Output> {
		let this = self.project();
		let start = this.start.get_or_insert_with(Instant::now);

		match this.inner.poll(cx) {
			Poll::Pending => Poll::Pending,
			Poll::Ready(v) => {
				let elapsed = start.elapsed();
				Poll::Ready((v, elapsed))
			},
		}
	}
}

pub trait TimedFuture: Sized + Future {
	fn timed(self) -> Timed<Self> {
		Timed { inner: self, start: None }
	}
}

impl<F: Future> TimedFuture for F {}

/// Write data to a JSON file, creating the parent directories if needed.
pub async fn write_data_to_json_file<T>(data: &T, file_path: impl AsRef<Path>) -> anyhow::Result<()>
where
	T: Serialize,
{
	let path = file_path.as_ref();
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)
				.with_context(|| format!("create directory {}", parent.display()))?;
		}
	}

	let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
	let mut writer = BufWriter::new(file);
	let json = serde_json::to_string_pretty(data)
		.with_context(|| format!("serialize {}", path.display()))?;
	writer.write_all(json.as_bytes()).with_context(|| format!("write {}", path.display()))?;
	writer.flush().with_context(|| format!("flush {}", path.display()))?;

	log::debug!(target: LOG_TARGET, "Wrote JSON data to {}", path.display());
	Ok(())
}

/// Read data from a JSON file
pub async fn read_data_from_json_file<T>(file_path: impl AsRef<Path>) -> anyhow::Result<T>
where
	T: DeserializeOwned,
{
	let path = file_path.as_ref();
	log::debug!(target: LOG_TARGET, "Reading data from file: {}", path.display());

	let mut file =
		File::open(path).with_context(|| format!("file not found at {}", path.display()))?;
	let mut content = String::new();
	file.read_to_string(&mut content)
		.with_context(|| format!("failed to read {}", path.display()))?;

	serde_json::from_str(&content).with_context(|| format!("failed to deserialize {}", path.display()))
}

/// Read an optional JSON file, falling back to `T::default()` when no path is given.
pub async fn read_optional_json_file<T>(file_path: Option<&Path>) -> anyhow::Result<T>
where
	T: DeserializeOwned + Default,
{
	match file_path {
		Some(path) => read_data_from_json_file(path).await,
		None => Ok(T::default()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	#[tokio::test]
	async fn json_files_round_trip_through_nested_dirs() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a/b/data.json");
		let data = BTreeMap::from([("x".to_string(), 1.5f64)]);

		write_data_to_json_file(&data, &path).await.unwrap();
		let back: BTreeMap<String, f64> = read_data_from_json_file(&path).await.unwrap();
		assert_eq!(back, data);

		let missing = read_data_from_json_file::<BTreeMap<String, f64>>(dir.path().join("nope.json"))
			.await
			.unwrap_err();
		assert!(format!("{missing:#}").contains("file not found"));

		let fallback: BTreeMap<String, f64> = read_optional_json_file(None).await.unwrap();
		assert!(fallback.is_empty());
	}

	#[tokio::test]
	async fn timed_reports_elapsed() {
		let (value, elapsed) = async { 7 }.timed().await;
		assert_eq!(value, 7);
		assert!(elapsed <= Duration::from_secs(5));
	}
}
