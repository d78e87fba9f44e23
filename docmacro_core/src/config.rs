use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::DocmacroError;
use crate::DocmacroResult;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["docmacro.toml", ".docmacro.toml", ".config/docmacro.toml"];

/// Target format used when neither the command line nor the config names one.
pub const DEFAULT_FORMAT: &str = "html";

/// Where the running server records its port, relative to the working
/// directory.
pub const DEFAULT_METADATA_FILE: &str = ".docmacro.json";

/// Largest request or response accepted on a connection (16 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Configuration loaded from a `docmacro.toml` file.
///
/// ```toml
/// format = "html"
///
/// [server]
/// idle_timeout_secs = 60
/// poll_interval_ms = 1000
/// request_timeout_secs = 30
/// execution_timeout_secs = 20
/// max_message_bytes = 16777216
/// metadata_file = ".docmacro.json"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DocmacroConfig {
	/// Default target format for `preprocess` and `serve`.
	#[serde(default = "default_format")]
	pub format: String,
	#[serde(default)]
	pub server: ServerConfig,
}

/// The `[server]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
	/// The server exits after this long without a connection.
	pub idle_timeout_secs: u64,
	/// How often the accept loop wakes to check the idle budget.
	pub poll_interval_ms: u64,
	/// Client connect/read timeout for a single request.
	pub request_timeout_secs: u64,
	/// Longest a single execution may run. `0` removes the limit.
	pub execution_timeout_secs: u64,
	pub max_message_bytes: usize,
	pub metadata_file: PathBuf,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			idle_timeout_secs: 60,
			poll_interval_ms: 1000,
			request_timeout_secs: 30,
			execution_timeout_secs: 20,
			max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
			metadata_file: PathBuf::from(DEFAULT_METADATA_FILE),
		}
	}
}

impl ServerConfig {
	pub fn idle_timeout(&self) -> Duration {
		Duration::from_secs(self.idle_timeout_secs)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms.max(1))
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn execution_timeout(&self) -> Option<Duration> {
		(self.execution_timeout_secs > 0).then(|| Duration::from_secs(self.execution_timeout_secs))
	}

	/// The metadata path, resolved against `root` when relative.
	pub fn metadata_path(&self, root: &Path) -> PathBuf {
		root.join(&self.metadata_file)
	}
}

impl Default for DocmacroConfig {
	fn default() -> Self {
		Self {
			format: default_format(),
			server: ServerConfig::default(),
		}
	}
}

fn default_format() -> String {
	DEFAULT_FORMAT.to_string()
}

impl DocmacroConfig {
	/// Find the first config file that exists at `root`.
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if the file does not exist.
	pub fn load(root: &Path) -> DocmacroResult<Option<DocmacroConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)?;
		let config: DocmacroConfig =
			toml::from_str(&content).map_err(|e| DocmacroError::ConfigParse(e.to_string()))?;

		tracing::debug!(path = %config_path.display(), "loaded config");

		Ok(Some(config))
	}

	/// [`load`](Self::load), falling back to the defaults.
	pub fn load_or_default(root: &Path) -> DocmacroResult<DocmacroConfig> {
		Ok(Self::load(root)?.unwrap_or_default())
	}
}

/// The record a running server leaves behind so clients can find it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerMetadata {
	pub port: u16,
	#[serde(default = "default_format")]
	pub format: String,
}

impl ServerMetadata {
	pub fn new(port: u16, format: impl Into<String>) -> Self {
		Self {
			port,
			format: format.into(),
		}
	}

	/// Read the record at `path`. A missing file is `None`.
	pub fn read(path: &Path) -> DocmacroResult<Option<ServerMetadata>> {
		let bytes = match std::fs::read(path) {
			Ok(bytes) => bytes,
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(error) => return Err(error.into()),
		};

		serde_json::from_slice(&bytes).map(Some).map_err(|e| {
			DocmacroError::Metadata {
				path: path.display().to_string(),
				reason: e.to_string(),
			}
		})
	}

	/// Write the record as pretty JSON. The file is replaced atomically so a
	/// concurrent reader never sees a partial record.
	pub fn write(&self, path: &Path) -> DocmacroResult<()> {
		if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			std::fs::create_dir_all(parent)?;
		}

		let payload = serde_json::to_vec_pretty(self).map_err(|e| {
			DocmacroError::Metadata {
				path: path.display().to_string(),
				reason: e.to_string(),
			}
		})?;
		let temp_path = path.with_extension(format!(
			"json.tmp-{}-{}",
			std::process::id(),
			std::time::SystemTime::now()
				.duration_since(UNIX_EPOCH)
				.map_or(0, |duration| duration.as_nanos())
		));

		std::fs::write(&temp_path, payload)?;

		if let Err(error) = std::fs::rename(&temp_path, path) {
			let _ = std::fs::remove_file(&temp_path);
			return Err(error.into());
		}

		Ok(())
	}

	/// Delete the record at `path`. Returns whether a file was removed.
	pub fn remove(path: &Path) -> DocmacroResult<bool> {
		match std::fs::remove_file(path) {
			Ok(()) => Ok(true),
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(error) => Err(error.into()),
		}
	}
}
