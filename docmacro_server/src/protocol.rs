use serde::Deserialize;
use serde::Serialize;
use serde::de::IgnoredAny;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::ServerError;
use crate::ServerResult;

/// Request and response kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
	Ping,
	Shutdown,
	/// Run the code as statements and return what it printed.
	String,
	/// Evaluate the code as an expression and return the fragment as JSON.
	Object,
	/// Run the script at the given path and return what it printed.
	File,
	Error,
}

impl MessageType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Ping => "ping",
			Self::Shutdown => "shutdown",
			Self::String => "string",
			Self::Object => "object",
			Self::File => "file",
			Self::Error => "error",
		}
	}
}

/// A single request or response: `{"message": ..., "type": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	#[serde(default)]
	pub message: serde_json::Value,
	#[serde(rename = "type")]
	pub kind: MessageType,
}

impl Message {
	pub fn new(kind: MessageType, message: impl Into<serde_json::Value>) -> Self {
		Self {
			message: message.into(),
			kind,
		}
	}

	pub fn ping() -> Self {
		Self::new(MessageType::Ping, "ping")
	}

	pub fn shutdown() -> Self {
		Self::new(MessageType::Shutdown, "shutdown")
	}

	pub fn string(code: impl Into<String>) -> Self {
		Self::new(MessageType::String, code.into())
	}

	pub fn object(code: impl Into<String>) -> Self {
		Self::new(MessageType::Object, code.into())
	}

	pub fn file(path: impl Into<String>) -> Self {
		Self::new(MessageType::File, path.into())
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self::new(MessageType::Error, message.into())
	}

	/// The payload when it is a string.
	pub fn text(&self) -> Option<&str> {
		self.message.as_str()
	}

	pub fn is_error(&self) -> bool {
		self.kind == MessageType::Error
	}
}

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 8 * 1024;

/// Read one message. The frame ends as soon as the bytes received hold a
/// complete JSON value, so a request needs neither a trailing newline nor a
/// half-close. Bytes that can never become JSON end the frame early, and so
/// does the end of the stream.
pub async fn read_frame<R>(mut reader: R, limit: usize) -> ServerResult<Vec<u8>>
where
	R: AsyncRead + Unpin,
{
	let mut frame = Vec::new();
	let mut chunk = vec![0; READ_CHUNK];

	loop {
		let read = reader.read(&mut chunk).await?;
		if read == 0 {
			break;
		}

		let first_read = frame.is_empty();
		frame.extend_from_slice(&chunk[..read]);

		// A request object can only be complete once its closing bracket arrived.
		let may_be_complete = first_read
			|| frame
				.trim_ascii_end()
				.last()
				.is_some_and(|byte| matches!(byte, b'}' | b']'));

		if may_be_complete {
			match frame_state(&frame) {
				FrameState::Complete(end) => {
					frame.truncate(end);
					break;
				}
				FrameState::Invalid => break,
				FrameState::Partial => {}
			}
		}

		if frame.len() > limit {
			return Err(ServerError::MessageTooLarge { limit });
		}
	}

	let end = frame.trim_ascii_end().len();
	frame.truncate(end);

	if frame.len() > limit {
		return Err(ServerError::MessageTooLarge { limit });
	}

	Ok(frame)
}

enum FrameState {
	/// A whole JSON value ends at this offset.
	Complete(usize),
	Partial,
	Invalid,
}

fn frame_state(bytes: &[u8]) -> FrameState {
	let mut values = serde_json::Deserializer::from_slice(bytes).into_iter::<IgnoredAny>();

	match values.next() {
		Some(Ok(_)) => FrameState::Complete(values.byte_offset()),
		Some(Err(error)) if !error.is_eof() => FrameState::Invalid,
		_ => FrameState::Partial,
	}
}

/// Write `message` as one JSON line and close the write half. Readers that
/// stop at the end of the JSON value ignore the newline.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> ServerResult<()>
where
	W: AsyncWrite + Unpin,
{
	let mut payload = serde_json::to_vec(message)?;
	payload.push(b'\n');

	writer.write_all(&payload).await?;
	writer.flush().await?;
	writer.shutdown().await?;

	Ok(())
}
