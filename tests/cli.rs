mod common;

use common::poll_calibrator;

#[test]
fn cli_version_works() {
	let crate_name = env!("CARGO_PKG_NAME");
	let output = poll_calibrator().arg("--version").output().unwrap();

	assert!(output.status.success(), "command returned with non-success exit code");
	let version = String::from_utf8_lossy(&output.stdout).trim().to_owned();

	assert_eq!(version, format!("{} {}", crate_name, env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_help_lists_subcommands() {
	let output = poll_calibrator().arg("--help").output().unwrap();
	assert!(output.status.success());

	let help = String::from_utf8_lossy(&output.stdout);
	for cmd in ["estimate", "calibrate", "converge"] {
		assert!(help.contains(cmd), "`{cmd}` missing from help:\n{help}");
	}
}

#[test]
fn cli_subcommand_help_works() {
	for cmd in ["estimate", "calibrate", "converge"] {
		poll_calibrator().args([cmd, "--help"]).assert().success();
	}
}

#[test]
fn cli_rejects_bad_log_directive() {
	let output = poll_calibrator()
		.args(["--log", "poll-calibrator=loud", "estimate", "--polls", "p.json"])
		.args(["--as-of", "2024-06-01", "--candidate", "A"])
		.output()
		.unwrap();
	assert!(!output.status.success());
}
