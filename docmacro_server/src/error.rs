use docmacro_core::DocmacroError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ServerError {
	#[error(transparent)]
	#[diagnostic(code(docmacro_server::io_error))]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	#[diagnostic(code(docmacro_server::core))]
	Core(#[from] DocmacroError),

	#[error("invalid message: {0}")]
	#[diagnostic(code(docmacro_server::json))]
	Json(#[from] serde_json::Error),

	#[error("{0}")]
	#[diagnostic(code(docmacro_server::execution))]
	Lua(#[from] mlua::Error),

	#[error("unsupported object type: {0}")]
	#[diagnostic(
		code(docmacro_server::unsupported_object),
		help("`object` requests must evaluate to a document fragment such as `doc.fragment(\"text\")`")
	)]
	UnsupportedObject(&'static str),

	#[error("message exceeds the limit of {limit} bytes")]
	#[diagnostic(code(docmacro_server::message_too_large))]
	MessageTooLarge { limit: usize },

	#[error("protocol error: {0}")]
	#[diagnostic(code(docmacro_server::protocol))]
	Protocol(String),

	#[error("the server did not answer in time")]
	#[diagnostic(code(docmacro_server::timeout))]
	Timeout,

	#[error("the server did not come up after {attempts} attempts")]
	#[diagnostic(
		code(docmacro_server::start_failed),
		help("see docmacro.server.log in the working directory for the server's output")
	)]
	StartFailed { attempts: u32 },

	#[error("execution environment is unavailable: {0}")]
	#[diagnostic(code(docmacro_server::environment))]
	Environment(String),
}

pub type ServerResult<T> = Result<T, ServerError>;
