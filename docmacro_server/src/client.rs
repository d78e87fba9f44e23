use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::time::Duration;

use docmacro_core::DocmacroConfig;
use docmacro_core::ServerMetadata;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::Message;
use crate::MessageType;
use crate::ServerError;
use crate::ServerResult;
use crate::read_frame;
use crate::write_message;

/// Number of times [`Client::start_server`] looks for the new server.
pub const START_ATTEMPTS: u32 = 50;
const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Finds, starts, talks to and stops the execution server of one working
/// directory.
#[derive(Debug, Clone)]
pub struct Client {
	root: PathBuf,
	metadata_path: PathBuf,
	timeout: Duration,
	max_message_bytes: usize,
	executable: Option<PathBuf>,
}

impl Client {
	pub fn new(root: impl Into<PathBuf>, config: &DocmacroConfig) -> Self {
		let root = root.into();

		Self {
			metadata_path: config.server.metadata_path(&root),
			timeout: config.server.request_timeout(),
			max_message_bytes: config.server.max_message_bytes,
			executable: None,
			root,
		}
	}

	/// The binary started by [`start_server`](Self::start_server). Defaults to
	/// the current executable.
	#[must_use]
	pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
		self.executable = Some(executable.into());
		self
	}

	#[must_use]
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn metadata_path(&self) -> &Path {
		&self.metadata_path
	}

	/// Send one request to the server on `port` and wait for its answer.
	pub async fn send(&self, port: u16, message: &Message) -> ServerResult<Message> {
		let stream = timeout(self.timeout, TcpStream::connect((Ipv4Addr::LOCALHOST, port)))
			.await
			.map_err(|_| ServerError::Timeout)??;
		let (reader, mut writer) = stream.into_split();

		write_message(&mut writer, message).await?;

		let frame = timeout(self.timeout, read_frame(reader, self.max_message_bytes))
			.await
			.map_err(|_| ServerError::Timeout)??;

		if frame.is_empty() {
			return Err(ServerError::Protocol("the server closed the connection without answering".into()));
		}

		Ok(serde_json::from_slice(&frame)?)
	}

	/// Whether a server answers `pong` on `port`.
	pub async fn ping(&self, port: u16) -> bool {
		match self.send(port, &Message::ping()).await {
			Ok(response) => response.kind == MessageType::Ping && response.text() == Some("pong"),
			Err(error) => {
				tracing::debug!(port, %error, "ping failed");
				false
			}
		}
	}

	/// The server recorded in the metadata file, if it is still answering.
	pub async fn active_server(&self) -> ServerResult<Option<ServerMetadata>> {
		let Some(metadata) = ServerMetadata::read(&self.metadata_path)? else {
			return Ok(None);
		};

		if self.ping(metadata.port).await {
			return Ok(Some(metadata));
		}

		tracing::warn!(port = metadata.port, "metadata file exists, but the server is not responding");
		Ok(None)
	}

	/// Spawn `<executable> serve --format <format>` in the background and
	/// wait for it to record its port.
	pub async fn start_server(&self, format: &str) -> ServerResult<ServerMetadata> {
		let executable = match &self.executable {
			Some(executable) => executable.clone(),
			None => std::env::current_exe()?,
		};

		Command::new(&executable)
			.args(["serve", "--format", format])
			.current_dir(&self.root)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.spawn()?;

		tracing::debug!(executable = %executable.display(), format, "spawned server");

		let mut delay = FIRST_BACKOFF;

		for attempt in 1..=START_ATTEMPTS {
			tokio::time::sleep(delay).await;

			match self.active_server().await {
				Ok(Some(metadata)) => return Ok(metadata),
				Ok(None) => {}
				Err(error) => tracing::debug!(%error, "server metadata not readable yet"),
			}

			tracing::debug!(attempt, "waiting for server to start");
			delay = (delay * 2).min(MAX_BACKOFF);
		}

		Err(ServerError::StartFailed {
			attempts: START_ATTEMPTS,
		})
	}

	/// The running server, starting one for `format` when none answers.
	pub async fn get_or_start_server(&self, format: &str) -> ServerResult<ServerMetadata> {
		if let Some(metadata) = self.active_server().await? {
			return Ok(metadata);
		}

		self.start_server(format).await
	}

	/// Ask the server on `port` to shut down.
	pub async fn stop_server(&self, port: u16) -> ServerResult<Message> {
		self.send(port, &Message::shutdown()).await
	}

	/// Delete the metadata file. Returns whether one existed.
	pub fn remove_metadata(&self) -> ServerResult<bool> {
		Ok(ServerMetadata::remove(&self.metadata_path)?)
	}
}
