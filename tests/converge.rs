//! Tests for the converge command

mod common;

use common::*;
use regex::Regex;
use tempfile::TempDir;

#[test]
fn converge_corrects_a_biased_source() {
	let dir = TempDir::new().unwrap();
	let polls = write_json(dir.path(), "polls.json", &biased_polls());
	let results = write_json(dir.path(), "results.json", &vote_counts());
	let aliases = write_json(dir.path(), "aliases.json", &aliases());
	let history = dir.path().join("history");
	let out = dir.path().join("profiles.json");
	let report = dir.path().join("report.json");

	let output = poll_calibrator()
		.args(["converge", "--election-date", "2024-06-09", "--tolerance", "1.0", "--polls"])
		.arg(&polls)
		.arg("--results")
		.arg(&results)
		.arg("--aliases")
		.arg(&aliases)
		.arg("--history-dir")
		.arg(&history)
		.arg("--output")
		.arg(&out)
		.arg("--report")
		.arg(&report)
		.output()
		.unwrap();
	assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

	let stdout = String::from_utf8_lossy(&output.stdout);
	let converged = Regex::new(r"converged after (\d+) iteration\(s\), max difference \d+\.\d{2}")
		.unwrap();
	let iterations: u64 = converged
		.captures(&stdout)
		.unwrap_or_else(|| panic!("no convergence line in:\n{stdout}"))[1]
		.parse()
		.unwrap();

	let report = read_json(&report);
	assert_eq!(report["outcome"], "converged");
	assert_eq!(report["iterations"], iterations);
	assert!(report["max_diff"].as_f64().unwrap() <= 1.0);
	assert_eq!(report["history"].as_array().unwrap().len() as u64, iterations);
	// C was never polled, so it never took part in the check.
	assert!(report["history"][0]["estimates"]["C"].is_null());

	let profiles = read_json(&out);
	assert!(profiles["S1"]["bias_coefficient"].as_f64().unwrap() < 1.0);

	for i in 1..=iterations {
		assert!(history.join(format!("snapshot_{i:03}.json")).exists());
	}
}

#[test]
fn converge_reports_exhaustion_as_success() {
	let dir = TempDir::new().unwrap();
	let polls = write_json(dir.path(), "polls.json", &biased_polls());
	let results = write_json(dir.path(), "results.json", &vote_counts());
	let out = dir.path().join("profiles.json");
	let report = dir.path().join("report.json");

	let output = poll_calibrator()
		.args(["converge", "--election-date", "2024-06-09", "--tolerance", "0"])
		.args(["--max-iterations", "2", "--polls"])
		.arg(&polls)
		.arg("--results")
		.arg(&results)
		.arg("--output")
		.arg(&out)
		.arg("--report")
		.arg(&report)
		.output()
		.unwrap();
	assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
	assert!(String::from_utf8_lossy(&output.stdout).contains("no convergence after 2 iteration(s)"));

	let report = read_json(&report);
	assert_eq!(report["outcome"], "exhausted");
	assert_eq!(report["iterations"], 2);
	assert!(out.exists());
}
