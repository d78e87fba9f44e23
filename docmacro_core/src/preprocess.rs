use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::DocmacroResult;
use crate::position::Source;
use crate::spans::Span;
use crate::spans::read_code;
use crate::spans::read_math;

/// Bytes at which a reader other than the verbatim copy may apply. `i` and `b`
/// only matter directly before a `%` and are picked up by backing off one byte.
const TRIGGERS: [u8; 6] = [b'<', b'\\', b'`', b'~', b'$', b'%'];

static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"\n{3,}").unwrap_or_else(|e| panic!("invalid blank line pattern: {e}"))
});

static IDENTIFIER_MACRO: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[ib]?%{1,2}\w").unwrap_or_else(|e| panic!("invalid identifier macro pattern: {e}"))
});

static EXPRESSION_MACRO: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[ib]?%{1,2}\(").unwrap_or_else(|e| panic!("invalid expression macro pattern: {e}"))
});

/// Settings for one preprocessing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessOptions {
	/// Output format name, substituted for `{format}` in script paths and
	/// matched by `%%%mdifformat` clauses.
	pub target_format: String,
	/// Directory markdown include paths are resolved against.
	pub base_dir: PathBuf,
	/// Name of the document in diagnostics.
	pub source_name: String,
}

impl PreprocessOptions {
	pub fn new(target_format: impl Into<String>) -> Self {
		Self {
			target_format: target_format.into(),
			base_dir: PathBuf::from("."),
			source_name: "<input>".to_string(),
		}
	}

	#[must_use]
	pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
		self.base_dir = base_dir.into();
		self
	}

	#[must_use]
	pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
		self.source_name = source_name.into();
		self
	}
}

/// Rewrite every macro in `contents` into a tagged code span and splice in
/// markdown includes. Runs of three or more newlines in the result are
/// collapsed to two.
#[tracing::instrument(level = "debug", skip_all, fields(source = %options.source_name, format = %options.target_format))]
pub fn preprocess(contents: &str, options: &PreprocessOptions) -> DocmacroResult<String> {
	let source = Source::new(&options.source_name, contents);
	Scanner::new(source, options, Vec::new()).run()
}

/// Preprocess the file at `path`. Includes are resolved against the file's
/// directory and diagnostics name the file.
pub fn preprocess_file(path: &Path, target_format: &str) -> DocmacroResult<String> {
	let contents = std::fs::read_to_string(path)?;
	let base_dir = path
		.parent()
		.filter(|parent| !parent.as_os_str().is_empty())
		.unwrap_or(Path::new("."));
	let options = PreprocessOptions::new(target_format)
		.with_base_dir(base_dir)
		.with_source_name(path.display().to_string());
	let includes = path.canonicalize().map(|path| vec![path]).unwrap_or_default();
	let source = Source::new(&options.source_name, &contents);

	Scanner::new(source, &options, includes).run()
}

/// State of one scan over one document. Markdown includes run a nested
/// scanner whose `includes` stack has the included file pushed.
pub(crate) struct Scanner<'a> {
	pub(crate) source: Source<'a>,
	pub(crate) options: &'a PreprocessOptions,
	/// Canonical paths of the markdown files currently being included.
	pub(crate) includes: Vec<PathBuf>,
}

impl<'a> Scanner<'a> {
	pub(crate) fn new(source: Source<'a>, options: &'a PreprocessOptions, includes: Vec<PathBuf>) -> Self {
		Self {
			source,
			options,
			includes,
		}
	}

	pub(crate) fn run(&self) -> DocmacroResult<String> {
		let text = self.source.text;
		let mut output = String::with_capacity(text.len());
		let mut index = 0;

		while index < text.len() {
			let stop = next_trigger(self.source.bytes(), index);

			if stop > index {
				output.push_str(&text[index..stop]);
				index = stop;
				continue;
			}

			let span = self.read_at(index)?;
			output.push_str(&span.replacement);
			index += span.len;
		}

		Ok(collapse_blank_lines(&output))
	}

	fn read_at(&self, index: usize) -> DocmacroResult<Span> {
		let source = &self.source;
		let rest = &source.text[index..];

		match source.bytes()[index] {
			b'<' if rest.starts_with("<!--") => Ok(read_comment(source, index)),
			b'\\' => {
				let escaped = rest[1..].chars().next().map_or(0, char::len_utf8);
				Ok(Span::verbatim(source, index, index + 1 + escaped))
			}
			b'`' | b'~' => read_code(source, index),
			b'$' => read_math(source, index),
			b'%' | b'i' | b'b' => {
				match self.read_macro(index)? {
					Some(span) => Ok(span),
					None => Ok(copy_char(source, index)),
				}
			}
			_ => Ok(copy_char(source, index)),
		}
	}

	fn read_macro(&self, index: usize) -> DocmacroResult<Option<Span>> {
		let rest = &self.source.text[index..];

		let span = if IDENTIFIER_MACRO.is_match(rest) {
			self.read_identifier_macro(index)?
		} else if EXPRESSION_MACRO.is_match(rest) {
			self.read_expression_macro(index)?
		} else if rest.starts_with("%{") {
			self.read_block_macro(index)?
		} else if rest.starts_with("%%%py{") {
			self.read_script_include(index)?
		} else if rest.starts_with("%%%mdifformat{") {
			self.read_conditional_include(index)?
		} else if rest.starts_with("%%%md{") {
			self.read_markdown_include(index)?
		} else {
			return Ok(None);
		};

		Ok(Some(span))
	}
}

/// The next offset at or after `from` where a reader may apply.
fn next_trigger(bytes: &[u8], from: usize) -> usize {
	let Some(found) = bytes[from..].iter().position(|byte| TRIGGERS.contains(byte)) else {
		return bytes.len();
	};
	let stop = from + found;

	if bytes[stop] == b'%' && stop > from && matches!(bytes[stop - 1], b'i' | b'b') {
		stop - 1
	} else {
		stop
	}
}

fn copy_char(source: &Source<'_>, index: usize) -> Span {
	let len = source.text[index..].chars().next().map_or(1, char::len_utf8);
	Span::verbatim(source, index, index + len)
}

/// HTML comments are dropped from the output. An unterminated comment runs
/// to the end of the document.
fn read_comment(source: &Source<'_>, start: usize) -> Span {
	let end = source.text[start + 2..]
		.find("-->")
		.map_or(source.len(), |index| start + 2 + index + 3);

	Span::new(end - start, "")
}

fn collapse_blank_lines(text: &str) -> String {
	BLANK_LINES.replace_all(text, "\n\n").into_owned()
}
