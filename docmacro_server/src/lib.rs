//! `docmacro_server` executes the code spans produced by `docmacro_core`. A
//! server process owns one persistent Lua environment and answers JSON
//! requests on a loopback TCP port; the [`Client`] finds a running server
//! through the metadata file, starts one when needed and stops it at the end
//! of a build.
//!
//! ## Protocol
//!
//! Each connection carries one request and one response, each a single JSON
//! object. The server answers as soon as the request object is complete; a
//! trailing newline is allowed but not required:
//!
//! ```text
//! -> {"message": "x = 40 + 2", "type": "string"}
//! <- {"message": "", "type": "string"}
//! -> {"message": "print(x)", "type": "string"}
//! <- {"message": "42", "type": "string"}
//! ```
//!
//! | Request    | Response                                                   |
//! | ---------- | ---------------------------------------------------------- |
//! | `ping`     | `pong`                                                     |
//! | `shutdown` | `Shutting down server.`, then the server exits             |
//! | `string`   | the printed output of the statements                      |
//! | `object`   | the JSON form of the document fragment the expression yields |
//! | `file`     | the printed output of the script at the given path        |
//!
//! Failures of any kind are answered with `{"type": "error"}` and a message,
//! including executions that run past the configured time limit.
//!
//! ## Lifecycle
//!
//! The server binds an OS-assigned port, records `{"port", "format"}` in
//! `.docmacro.json` and exits after a `shutdown` request or once no
//! connection has arrived for the idle timeout.

pub use client::*;
pub use environment::*;
pub use error::*;
pub use protocol::*;
pub use server::*;

mod client;
mod environment;
#[allow(unused_assignments)]
mod error;
mod protocol;
mod server;

#[cfg(test)]
mod __tests;
