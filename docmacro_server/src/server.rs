use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use docmacro_core::DocmacroConfig;
use docmacro_core::ServerMetadata;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::LuaEnvironment;
use crate::Message;
use crate::MessageType;
use crate::ServerError;
use crate::ServerResult;
use crate::read_frame;
use crate::write_message;

/// Settings for one server lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
	pub target_format: String,
	pub idle_timeout: Duration,
	pub poll_interval: Duration,
	/// Longest a single execution may run before it is aborted.
	pub execution_timeout: Option<Duration>,
	pub max_message_bytes: usize,
	/// Where to record the port. `None` keeps the server anonymous.
	pub metadata_path: Option<PathBuf>,
}

impl ServerOptions {
	pub fn new(target_format: impl Into<String>) -> Self {
		Self::from_config(&DocmacroConfig::default(), None, target_format)
	}

	/// Options from the `[server]` table, with the metadata file resolved
	/// against `root`.
	pub fn from_config(config: &DocmacroConfig, root: Option<&Path>, target_format: impl Into<String>) -> Self {
		let server = &config.server;

		Self {
			target_format: target_format.into(),
			idle_timeout: server.idle_timeout(),
			poll_interval: server.poll_interval(),
			execution_timeout: server.execution_timeout(),
			max_message_bytes: server.max_message_bytes,
			metadata_path: root.map(|root| server.metadata_path(root)),
		}
	}

	#[must_use]
	pub fn with_idle_timeout(mut self, idle_timeout: Duration, poll_interval: Duration) -> Self {
		self.idle_timeout = idle_timeout;
		self.poll_interval = poll_interval;
		self
	}

	#[must_use]
	pub fn with_execution_timeout(mut self, execution_timeout: Duration) -> Self {
		self.execution_timeout = Some(execution_timeout);
		self
	}

	#[must_use]
	pub fn with_metadata_path(mut self, metadata_path: impl Into<PathBuf>) -> Self {
		self.metadata_path = Some(metadata_path.into());
		self
	}

	/// Consecutive empty polling intervals after which the server exits.
	pub fn idle_polls(&self) -> u32 {
		let poll = self.poll_interval.as_millis().max(1);
		let polls = self.idle_timeout.as_millis().div_ceil(poll);

		u32::try_from(polls).unwrap_or(u32::MAX).max(1)
	}
}

/// What every connection task needs.
struct Shared {
	environment: Mutex<LuaEnvironment>,
	shutdown: watch::Sender<bool>,
	max_message_bytes: usize,
}

/// A loopback execution server bound to an OS-assigned port.
pub struct Server {
	listener: TcpListener,
	options: ServerOptions,
	shared: Arc<Shared>,
}

impl Server {
	/// Bind `127.0.0.1:0`, create the execution environment and record the
	/// port in the metadata file.
	pub async fn bind(options: ServerOptions) -> ServerResult<Self> {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
		let mut environment = LuaEnvironment::new(options.target_format.clone())?;
		if let Some(limit) = options.execution_timeout {
			environment = environment.with_time_limit(limit);
		}
		let (shutdown, _) = watch::channel(false);
		let address = listener.local_addr()?;

		if let Some(path) = &options.metadata_path {
			ServerMetadata::new(address.port(), options.target_format.clone()).write(path)?;
		}

		tracing::info!(%address, format = %options.target_format, "server listening");

		Ok(Self {
			listener,
			shared: Arc::new(Shared {
				environment: Mutex::new(environment),
				shutdown,
				max_message_bytes: options.max_message_bytes,
			}),
			options,
		})
	}

	pub fn local_addr(&self) -> ServerResult<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	pub fn port(&self) -> ServerResult<u16> {
		Ok(self.local_addr()?.port())
	}

	/// Signals the accept loop to stop, as a `shutdown` request does.
	pub fn shutdown_sender(&self) -> watch::Sender<bool> {
		self.shared.shutdown.clone()
	}

	/// Accept connections until a `shutdown` request arrives or no connection
	/// is accepted for the idle timeout.
	pub async fn run(self) -> ServerResult<()> {
		let mut shutdown = self.shared.shutdown.subscribe();
		let idle_limit = self.options.idle_polls();
		let mut idle_polls = 0;

		while !*shutdown.borrow_and_update() {
			tokio::select! {
				accepted = tokio::time::timeout(self.options.poll_interval, self.listener.accept()) => {
					match accepted {
						Err(_) => {
							idle_polls += 1;
							if idle_polls >= idle_limit {
								tracing::info!(idle_polls, "idle timeout reached, shutting down");
								break;
							}
						}
						Ok(Ok((stream, peer))) => {
							idle_polls = 0;

							if !peer.ip().is_loopback() {
								tracing::warn!(%peer, "refusing non-loopback connection");
								continue;
							}

							let shared = Arc::clone(&self.shared);
							tokio::spawn(async move {
								if let Err(error) = handle_connection(stream, shared).await {
									tracing::warn!(%peer, %error, "connection failed");
								}
							});
						}
						Ok(Err(error)) => tracing::warn!(%error, "failed to accept connection"),
					}
				}
				changed = shutdown.changed() => {
					if changed.is_err() {
						break;
					}
				}
			}
		}

		tracing::info!("server stopped");

		self.forget_metadata();
		Ok(())
	}

	/// Remove the metadata file if it still points at this server.
	fn forget_metadata(&self) {
		let (Some(path), Ok(port)) = (&self.options.metadata_path, self.port()) else {
			return;
		};

		match ServerMetadata::read(path) {
			Ok(Some(metadata)) if metadata.port == port => {
				if let Err(error) = ServerMetadata::remove(path) {
					tracing::warn!(%error, "failed to remove server metadata");
				}
			}
			Ok(_) => {}
			Err(error) => tracing::warn!(%error, "failed to read server metadata"),
		}
	}
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) -> ServerResult<()> {
	let (reader, mut writer) = stream.into_split();

	let response = match read_frame(reader, shared.max_message_bytes).await {
		Ok(frame) => respond(&frame, &shared).await,
		Err(error) => Message::error(error.to_string()),
	};

	write_message(&mut writer, &response).await?;

	if response.kind == MessageType::Shutdown {
		shared.shutdown.send_replace(true);
	}

	Ok(())
}

async fn respond(frame: &[u8], shared: &Arc<Shared>) -> Message {
	let request: Message = match serde_json::from_slice(frame) {
		Ok(request) => request,
		Err(error) => {
			tracing::warn!(%error, "invalid request");
			return Message::error(format!("invalid request: {error}"));
		}
	};

	tracing::debug!(kind = ?request.kind, "received request");

	match request.kind {
		MessageType::Ping => Message::new(MessageType::Ping, "pong"),
		MessageType::Shutdown => Message::new(MessageType::Shutdown, "Shutting down server."),
		MessageType::String | MessageType::Object | MessageType::File => {
			let Some(payload) = request.text().map(str::to_string) else {
				return Message::error(format!("`{}` requests need a string payload", request.kind.as_str()));
			};

			match execute(request.kind, payload, Arc::clone(shared)).await {
				Ok(response) => response,
				Err(error) => {
					tracing::warn!(%error, "execution failed");
					Message::error(error.to_string())
				}
			}
		}
		MessageType::Error => Message::error("unexpected request type: error"),
	}
}

/// Run a request on the blocking pool, one at a time.
async fn execute(kind: MessageType, payload: String, shared: Arc<Shared>) -> ServerResult<Message> {
	tokio::task::spawn_blocking(move || {
		let environment = shared
			.environment
			.lock()
			.map_err(|e| ServerError::Environment(e.to_string()))?;

		match kind {
			MessageType::Object => Ok(Message::new(kind, environment.evaluate(&payload)?)),
			MessageType::File => {
				let code = std::fs::read_to_string(&payload)?;
				Ok(Message::new(kind, environment.execute(&code, &payload)?))
			}
			_ => Ok(Message::new(kind, environment.execute(&payload, "string")?)),
		}
	})
	.await
	.map_err(|e| ServerError::Environment(e.to_string()))?
}
