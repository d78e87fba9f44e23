use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use thiserror::Error;

use crate::position::line_and_column;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum DocmacroError {
	#[error(transparent)]
	#[diagnostic(code(docmacro::io_error))]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	#[diagnostic(code(docmacro::parse))]
	Parse(#[from] Box<ParseError>),

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(docmacro::config_parse),
		help("check that docmacro.toml is valid TOML with an optional [server] section")
	)]
	ConfigParse(String),

	#[error("failed to read server metadata `{path}`: {reason}")]
	#[diagnostic(
		code(docmacro::metadata),
		help("the file is written by `docmacro serve`; delete it if the server is gone")
	)]
	Metadata { path: String, reason: String },
}

impl DocmacroError {
	/// Convert into a [`miette::Report`], keeping the source snippet and label
	/// of parse errors.
	pub fn into_report(self) -> miette::Report {
		match self {
			Self::Parse(error) => miette::Report::new(*error),
			other => miette::Report::new(other),
		}
	}
}

impl From<ParseError> for DocmacroError {
	fn from(error: ParseError) -> Self {
		Self::Parse(Box::new(error))
	}
}

/// A fatal scanning error. Carries the document it was raised in so the
/// rendered report shows the lines around the offending position.
#[derive(Debug, Diagnostic, Error)]
#[error("preprocessor parsing error at line {line}, column {column}: {message}")]
#[diagnostic(code(docmacro::parse))]
pub struct ParseError {
	pub message: String,
	/// 1-based line of the offending position.
	pub line: usize,
	/// 1-based column (in characters) of the offending position.
	pub column: usize,
	#[source_code]
	pub source_code: NamedSource<String>,
	#[label("here")]
	pub span: SourceSpan,
}

impl ParseError {
	pub fn new(
		name: &str,
		contents: &str,
		offset: usize,
		length: usize,
		message: impl Into<String>,
	) -> Self {
		let (line, column) = line_and_column(contents, offset);
		let length = length.min(contents.len().saturating_sub(offset)).max(1);

		Self {
			message: message.into(),
			line,
			column,
			source_code: NamedSource::new(name, contents.to_string()),
			span: (offset, length).into(),
		}
	}
}

pub type DocmacroResult<T> = Result<T, DocmacroError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
