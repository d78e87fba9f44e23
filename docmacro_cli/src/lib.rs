use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Expand executable macros in markdown and run them through a persistent Lua server.",
	long_about = "docmacro rewrites `%macro` directives in markdown into tagged code spans and runs \
	              a local execution server that evaluates those spans in one persistent Lua \
	              namespace.\n\nQuick start:\n  docmacro preprocess doc.md --to html  Expand \
	              macros\n  docmacro exec 'print(1 + 1)' --start    Run code on the server\n  \
	              docmacro stop                           Stop the server"
)]
pub struct DocmacroCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Working directory for the config file and the server metadata file.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Expand the macros of a markdown file.
	///
	/// Markdown includes are resolved relative to the input file. The result
	/// is written to `--output` or printed to stdout.
	Preprocess {
		/// The markdown file to preprocess.
		input: PathBuf,

		/// Target format, substituted for `{format}` in paths and matched by
		/// `%%%mdifformat` clauses. Defaults to the `format` from
		/// `docmacro.toml`.
		#[arg(long)]
		to: Option<String>,

		/// Write the result to this file instead of stdout.
		#[arg(long, short)]
		output: Option<PathBuf>,
	},
	/// Run the execution server in the foreground.
	///
	/// The server records its port in the metadata file and exits after a
	/// `shutdown` request or once it has been idle for the configured time.
	/// Logs are appended to `docmacro.server.log`.
	Serve {
		/// Target format exposed to code as `doc.target_format`.
		#[arg(long)]
		format: Option<String>,
	},
	/// Send code to the running server and print the response.
	Exec {
		/// Lua statements, or an expression with `--expr`.
		code: String,

		/// Evaluate the code as an expression yielding a document fragment and
		/// print its JSON form.
		#[arg(long, default_value_t = false)]
		expr: bool,

		/// Start a server when none is running.
		#[arg(long, default_value_t = false)]
		start: bool,
	},
	/// Check whether a server is running.
	Ping,
	/// Stop the running server and remove its metadata file.
	Stop,
}
