#![allow(dead_code)]

use assert_cmd::cargo::cargo_bin;
use serde_json::{Value, json};
use std::{
	fs,
	path::{Path, PathBuf},
};

/// The binary, with a quiet environment and a throwaway prometheus port.
pub fn poll_calibrator() -> assert_cmd::Command {
	let mut cmd = assert_cmd::Command::new(cargo_bin(env!("CARGO_PKG_NAME")));
	cmd.env_remove("RUST_LOG").env("NO_COLOR", "1").args(["--prometheus-port", "0"]);
	cmd
}

pub fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
	let path = dir.join(name);
	fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
	path
}

pub fn read_json(path: &Path) -> Value {
	serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

/// Three polls of one source overstating both A and B by 10%, plus one malformed record.
pub fn biased_polls() -> Value {
	let poll = |date: &str| {
		json!({
			"source": "Sondaj Unu",
			"date": date,
			"sample_size": 1000,
			"method": "CATI",
			"percentages": { "A": 44.0, "B": 33.0 },
			"margin_of_error": 3.0
		})
	};
	json!([
		poll("2024-05-28"),
		poll("2024-05-30"),
		poll("2024-06-01"),
		{ "source": "Broken", "date": "sometime in May", "sample_size": 900,
		  "percentages": { "A": 41.0 }, "margin_of_error": 3.2 }
	])
}

/// Final results as raw vote counts: A 40%, B 30%, C 30%.
pub fn vote_counts() -> Value {
	json!({ "A": 400000, "B": 300000, "C": 300000 })
}

pub fn aliases() -> Value {
	json!({ "Sondaj Unu": "S1", "S1 Research": "S1" })
}
