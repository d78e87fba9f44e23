mod common;

use std::path::Path;

use clap::Parser;
use docmacro_cli::Commands;
use docmacro_cli::DocmacroCli;
use docmacro_core::AnyEmptyResult;
use docmacro_core::DEFAULT_METADATA_FILE;

fn exec(root: &Path, code: &str) -> assert_cmd::assert::Assert {
	common::docmacro_cmd()
		.arg("exec")
		.arg(code)
		.arg("--path")
		.arg(root)
		.assert()
}

#[test]
fn ping_without_server_exits_with_code_one() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;

	common::docmacro_cmd()
		.arg("ping")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.failure()
		.code(1)
		.stdout(predicates::str::contains("no active server"));

	Ok(())
}

#[test]
fn exec_without_server_needs_start() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;

	exec(tmp.path(), "print(1)")
		.failure()
		.code(2)
		.stderr(predicates::str::contains("no active server"));

	Ok(())
}

#[test]
fn stop_without_server_removes_stale_metadata() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let metadata = tmp.path().join(DEFAULT_METADATA_FILE);
	std::fs::write(&metadata, "{\"port\": 9, \"format\": \"html\"}")?;

	common::docmacro_cmd()
		.arg("stop")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("no active server"));

	assert!(!metadata.exists());

	Ok(())
}

#[test]
fn server_lifecycle() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let root = tmp.path();
	std::fs::write(root.join("docmacro.toml"), "format = \"latex\"\n\n[server]\nidle_timeout_secs = 20\n")?;

	let started = common::docmacro_cmd()
		.arg("exec")
		.arg("x = 41")
		.arg("--start")
		.arg("--path")
		.arg(root)
		.assert();

	let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
		started.success().stdout(predicates::str::is_empty());
		assert!(root.join(DEFAULT_METADATA_FILE).is_file());

		exec(root, "print(x + 1)")
			.success()
			.stdout(predicates::str::diff("42\n"));
		exec(root, "print(doc.target_format)")
			.success()
			.stdout(predicates::str::diff("latex\n"));
		exec(root, "error('boom')")
			.failure()
			.code(2)
			.stderr(predicates::str::contains("boom"));

		common::docmacro_cmd()
			.arg("exec")
			.arg("doc.fragment('*hi*')")
			.arg("--expr")
			.arg("--path")
			.arg(root)
			.assert()
			.success()
			.stdout(predicates::str::contains("\"RawBlock\""));

		common::docmacro_cmd()
			.arg("ping")
			.arg("--path")
			.arg(root)
			.assert()
			.success()
			.stdout(predicates::str::diff("pong\n"));
	}));

	common::docmacro_cmd()
		.arg("stop")
		.arg("--path")
		.arg(root)
		.assert()
		.success()
		.stdout(predicates::str::contains("Shutting down server."));

	if let Err(panic) = result {
		std::panic::resume_unwind(panic);
	}

	assert!(!root.join(DEFAULT_METADATA_FILE).exists());
	assert!(root.join("docmacro.server.log").is_file());

	Ok(())
}

#[test]
fn exec_arguments_parse() {
	let cli = DocmacroCli::parse_from(["docmacro", "exec", "print(1)", "--start"]);
	match cli.command {
		Some(Commands::Exec { code, expr, start }) => {
			assert_eq!(code, "print(1)");
			assert!(!expr);
			assert!(start);
		}
		_ => panic!("expected Exec command"),
	}

	let cli = DocmacroCli::parse_from(["docmacro", "serve", "--format", "epub"]);
	match cli.command {
		Some(Commands::Serve { format }) => assert_eq!(format.as_deref(), Some("epub")),
		_ => panic!("expected Serve command"),
	}
}
