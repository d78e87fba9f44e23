use std::fmt;

use crate::DocmacroResult;
use crate::position::Source;

/// A lexical unit recognized by one of the readers: how many bytes of the
/// document it covers and the text written in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
	pub len: usize,
	pub replacement: String,
}

impl Span {
	pub fn new(len: usize, replacement: impl Into<String>) -> Self {
		debug_assert!(len >= 1, "a span must consume at least one byte");

		Self {
			len,
			replacement: replacement.into(),
		}
	}

	/// A span that copies `source[start..end]` unchanged.
	pub fn verbatim(source: &Source<'_>, start: usize, end: usize) -> Self {
		Self::new(end - start, &source.text[start..end])
	}
}

/// A line whose indentation is shallower than the reference line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InconsistentIndent {
	/// 0-based index of the offending line.
	pub line: usize,
}

impl fmt::Display for InconsistentIndent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "inconsistent indentation at line {} of the block", self.line + 1)
	}
}

/// Remove the indentation of the first non-blank line from every line.
///
/// Tabs count as four spaces. Blank lines shallower than the reference become
/// empty; any other shallower line is an error.
pub fn deindent(code: &str) -> Result<String, InconsistentIndent> {
	let code = code.replace('\t', "    ");
	let indent = reference_indent(&code);

	strip_indent(&code, indent, 0)
}

fn reference_indent(code: &str) -> usize {
	code.split('\n')
		.find(|line| !line.trim().is_empty())
		.map_or(0, leading_spaces)
}

fn leading_spaces(line: &str) -> usize {
	line.len() - line.trim_start_matches(' ').len()
}

fn strip_indent(code: &str, indent: usize, first_line: usize) -> Result<String, InconsistentIndent> {
	if indent == 0 {
		return Ok(code.to_string());
	}

	let mut lines = Vec::new();

	for (index, line) in code.split('\n').enumerate() {
		if leading_spaces(line) >= indent {
			lines.push(&line[indent..]);
		} else if line.trim().is_empty() {
			lines.push("");
		} else {
			return Err(InconsistentIndent {
				line: first_line + index,
			});
		}
	}

	Ok(lines.join("\n"))
}

/// De-indent a fenced block: the opener line is kept, the content lines lose
/// the indentation of the first non-blank content line and the closing fence
/// line loses at most that much.
fn deindent_fenced(block: &str) -> Result<String, InconsistentIndent> {
	let block = block.replace('\t', "    ");
	let Some((opener, rest)) = block.split_once('\n') else {
		return Ok(block);
	};
	let (content, closer) = rest.rsplit_once('\n').unwrap_or(("", rest));
	let indent = reference_indent(content);

	if indent == 0 {
		return Ok(block);
	}

	let closer = &closer[leading_spaces(closer).min(indent)..];
	let content = strip_indent(content, indent, 1)?;
	Ok(format!("{opener}\n{content}\n{closer}"))
}

/// Byte offset of the start of line `line` (0-based) within `text`.
pub fn line_offset(text: &str, line: usize) -> usize {
	text.split_inclusive('\n').take(line).map(str::len).sum()
}

/// Read inline code, double-backtick code or a fenced block starting at a
/// `` ` `` or `~`.
pub fn read_code(source: &Source<'_>, start: usize) -> DocmacroResult<Span> {
	let bytes = source.bytes();
	let delimiter = bytes[start];

	if start + 1 >= bytes.len() {
		return Ok(Span::verbatim(source, start, start + 1));
	}

	let run = bytes[start..]
		.iter()
		.take_while(|byte| **byte == delimiter)
		.count();

	if delimiter == b'~' && run < 3 {
		return Ok(Span::verbatim(source, start, start + run));
	}

	match run {
		1 => {
			let mut index = start + 1;
			while index < bytes.len() {
				match bytes[index] {
					b'\\' => index += 1,
					byte if byte == delimiter => {
						return Ok(Span::verbatim(source, start, index + 1));
					}
					_ => {}
				}
				index += 1;
			}

			Err(source.error(start, 1, "unterminated inline code"))
		}
		2 => {
			let mut index = start + 2;
			while index < bytes.len() {
				match bytes[index] {
					b'\\' => index += 1,
					byte if byte == delimiter && source.byte(index + 1) == Some(delimiter) => {
						return Ok(Span::verbatim(source, start, index + 2));
					}
					_ => {}
				}
				index += 1;
			}

			Err(source.error(start, 2, "unterminated inline code"))
		}
		_ => {
			let mut index = start + run;
			while index < bytes.len() {
				match bytes[index] {
					b'\\' => index += 2,
					byte if byte == delimiter => {
						let closing = bytes[index..]
							.iter()
							.take_while(|byte| **byte == delimiter)
							.count();
						if closing >= run {
							let end = index + closing;
							let block = &source.text[start..end];
							let replacement = deindent_fenced(block).map_err(|error| {
								let offset = start + line_offset(block, error.line);
								source.error(offset, 1, "inconsistent indentation in code block")
							})?;
							return Ok(Span::new(end - start, replacement));
						}
						index += closing;
					}
					_ => index += 1,
				}
			}

			Err(source.error(start, run, "unterminated code block"))
		}
	}
}

/// Read inline math (`$...$`) or display math (`$$...$$`).
pub fn read_math(source: &Source<'_>, start: usize) -> DocmacroResult<Span> {
	let bytes = source.bytes();

	if start + 1 >= bytes.len() {
		return Ok(Span::verbatim(source, start, start + 1));
	}

	if bytes[start + 1] != b'$' {
		let mut index = start + 1;
		while index < bytes.len() {
			match bytes[index] {
				b'\\' => index += 1,
				b'$' => return Ok(Span::verbatim(source, start, index + 1)),
				_ => {}
			}
			index += 1;
		}

		return Err(source.error(start, 1, "unterminated inline math"));
	}

	let mut index = start + 2;
	while index < bytes.len() {
		match bytes[index] {
			b'\\' => index += 1,
			b'$' if source.byte(index + 1) == Some(b'$') => {
				return Ok(Span::verbatim(source, start, index + 2));
			}
			_ => {}
		}
		index += 1;
	}

	Err(source.error(start, 2, "unterminated math block"))
}
