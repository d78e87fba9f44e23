use crate::DocmacroError;
use crate::ParseError;

/// Returns the 1-based line and column (in characters) of a byte offset.
pub fn line_and_column(contents: &str, offset: usize) -> (usize, usize) {
	let offset = floor_char_boundary(contents, offset);
	let before = &contents[..offset];
	let line = before.matches('\n').count() + 1;
	let line_start = before.rfind('\n').map_or(0, |index| index + 1);
	let column = contents[line_start..offset].chars().count() + 1;

	(line, column)
}

/// Byte range of the line containing `offset`, excluding the newline.
pub fn line_bounds(contents: &str, offset: usize) -> (usize, usize) {
	let offset = floor_char_boundary(contents, offset);
	let start = contents[..offset].rfind('\n').map_or(0, |index| index + 1);
	let end = contents[offset..]
		.find('\n')
		.map_or(contents.len(), |index| offset + index);

	(start, end)
}

/// True when the text on the line before `start` and the text on the line
/// from `end` (exclusive end of the macro) onwards are both blank.
pub fn is_only_text_on_line(contents: &str, start: usize, end: usize) -> bool {
	let (line_start, _) = line_bounds(contents, start);
	let end = end.min(contents.len());
	let line_end = contents[end..]
		.find('\n')
		.map_or(contents.len(), |index| end + index);

	contents[line_start..start].trim().is_empty() && contents[end..line_end].trim().is_empty()
}

fn floor_char_boundary(contents: &str, offset: usize) -> usize {
	let mut offset = offset.min(contents.len());
	while !contents.is_char_boundary(offset) {
		offset -= 1;
	}

	offset
}

/// A document being scanned together with the name used in diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
	pub name: &'a str,
	pub text: &'a str,
}

impl<'a> Source<'a> {
	pub fn new(name: &'a str, text: &'a str) -> Self {
		Self { name, text }
	}

	pub fn bytes(&self) -> &'a [u8] {
		self.text.as_bytes()
	}

	pub fn len(&self) -> usize {
		self.text.len()
	}

	pub fn is_empty(&self) -> bool {
		self.text.is_empty()
	}

	/// The byte at `index`, or `None` past the end.
	pub fn byte(&self, index: usize) -> Option<u8> {
		self.text.as_bytes().get(index).copied()
	}

	/// Build a parse error anchored at `offset`.
	pub fn error(&self, offset: usize, length: usize, message: impl Into<String>) -> DocmacroError {
		ParseError::new(self.name, self.text, offset, length, message).into()
	}
}
