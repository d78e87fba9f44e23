use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use clap::Parser;
use docmacro_cli::Commands;
use docmacro_cli::DocmacroCli;
use docmacro_core::DocmacroConfig;
use docmacro_core::ServerMetadata;
use docmacro_core::preprocess_file;
use docmacro_server::Client;
use docmacro_server::Message;
use docmacro_server::Server;
use docmacro_server::ServerOptions;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

/// Appended to by `docmacro serve`, relative to the working directory.
const SERVER_LOG_FILE: &str = "docmacro.server.log";

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,yellow) => {
		if color_enabled() {
			format!("{}", $text.yellow())
		} else {
			format!("{}", $text)
		}
	};
}

fn main() {
	let args = DocmacroCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	let result = match &args.command {
		Some(Commands::Preprocess { input, to, output }) => {
			run_preprocess(&args, input, to.as_deref(), output.as_deref())
		}
		Some(Commands::Serve { format }) => run_serve(&args, format.as_deref()),
		Some(Commands::Exec { code, expr, start }) => run_exec(&args, code, *expr, *start),
		Some(Commands::Ping) => run_ping(&args),
		Some(Commands::Stop) => run_stop(&args),
		None => {
			eprintln!("No subcommand specified. Run `docmacro --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		let e = match e.downcast::<docmacro_core::DocmacroError>() {
			Ok(error) => {
				eprintln!("{:?}", error.into_report());
				process::exit(2);
			}
			Err(e) => e,
		};

		match e.downcast::<docmacro_server::ServerError>() {
			Ok(error) => {
				let report: miette::Report = (*error).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

fn resolve_root(args: &DocmacroCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Install the global subscriber. `RUST_LOG` wins over the default level.
fn init_logging(default_level: &str, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

	match log_file {
		Some(path) => {
			let file = OpenOptions::new().create(true).append(true).open(path)?;
			let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
			let _ = tracing::subscriber::set_global_default(subscriber);
		}
		None => {
			let subscriber = builder
				.with_ansi(color_enabled())
				.with_writer(std::io::stderr)
				.finish();
			let _ = tracing::subscriber::set_global_default(subscriber);
		}
	}

	Ok(())
}

fn client_level(args: &DocmacroCli) -> &'static str {
	if args.verbose { "debug" } else { "warn" }
}

fn run_preprocess(
	args: &DocmacroCli,
	input: &Path,
	to: Option<&str>,
	output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
	init_logging(client_level(args), None)?;

	let root = resolve_root(args);
	let config = DocmacroConfig::load_or_default(&root)?;
	let format = to.unwrap_or(&config.format);
	let expanded = preprocess_file(&root.join(input), format)?;

	match output {
		Some(output) => {
			let output = root.join(output);
			std::fs::write(&output, expanded)?;

			if args.verbose {
				eprintln!("{} {}", colored!("wrote", green), output.display());
			}
		}
		None => print!("{expanded}"),
	}

	Ok(())
}

fn run_serve(args: &DocmacroCli, format: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
	let root = resolve_root(args);
	let level = if args.verbose { "debug" } else { "info" };
	init_logging(level, Some(&root.join(SERVER_LOG_FILE)))?;

	let config = DocmacroConfig::load_or_default(&root)?;
	let format = format.unwrap_or(&config.format);
	let options = ServerOptions::from_config(&config, Some(&root), format);

	let runtime = tokio::runtime::Runtime::new()?;
	runtime.block_on(async move {
		let server = Server::bind(options).await?;
		let shutdown = server.shutdown_sender();

		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				tracing::info!("interrupted, shutting down");
				shutdown.send_replace(true);
			}
		});

		server.run().await
	})?;

	Ok(())
}

fn run_exec(args: &DocmacroCli, code: &str, expr: bool, start: bool) -> Result<(), Box<dyn std::error::Error>> {
	init_logging(client_level(args), None)?;

	let root = resolve_root(args);
	let config = DocmacroConfig::load_or_default(&root)?;
	let client = Client::new(&root, &config);
	let request = if expr { Message::object(code) } else { Message::string(code) };

	let runtime = tokio::runtime::Runtime::new()?;
	let server = runtime.block_on(find_server(&client, &config.format, start))?;
	let response = runtime.block_on(client.send(server.port, &request))?;

	if response.is_error() {
		return Err(response.text().unwrap_or("the server reported an error").into());
	}

	match response.text() {
		Some(text) if !expr => {
			if !text.is_empty() {
				println!("{text}");
			}
		}
		_ => println!("{}", serde_json::to_string(&response.message)?),
	}

	Ok(())
}

async fn find_server(
	client: &Client,
	format: &str,
	start: bool,
) -> Result<ServerMetadata, Box<dyn std::error::Error>> {
	if start {
		return Ok(client.get_or_start_server(format).await?);
	}

	match client.active_server().await? {
		Some(server) => Ok(server),
		None => Err("no active server; run `docmacro serve` or pass `--start`".into()),
	}
}

fn run_ping(args: &DocmacroCli) -> Result<(), Box<dyn std::error::Error>> {
	init_logging(client_level(args), None)?;

	let root = resolve_root(args);
	let config = DocmacroConfig::load_or_default(&root)?;
	let client = Client::new(&root, &config);

	let runtime = tokio::runtime::Runtime::new()?;
	match runtime.block_on(client.active_server())? {
		Some(server) => {
			println!("pong");

			if args.verbose {
				eprintln!("port {} format {}", server.port, server.format);
			}
		}
		None => {
			println!("{}", colored!("no active server", yellow));
			process::exit(1);
		}
	}

	Ok(())
}

fn run_stop(args: &DocmacroCli) -> Result<(), Box<dyn std::error::Error>> {
	init_logging(client_level(args), None)?;

	let root = resolve_root(args);
	let config = DocmacroConfig::load_or_default(&root)?;
	let client = Client::new(&root, &config);

	let runtime = tokio::runtime::Runtime::new()?;
	match runtime.block_on(client.active_server())? {
		Some(server) => {
			let response = runtime.block_on(client.stop_server(server.port))?;
			println!("{}", response.text().unwrap_or_default());
		}
		None => println!("no active server"),
	}

	if client.remove_metadata()? && args.verbose {
		eprintln!("removed {}", client.metadata_path().display());
	}

	Ok(())
}
