use crate::DocmacroResult;
use crate::position::Source;

/// The closing partner of a supported opening bracket.
pub fn closing_bracket(opening: u8) -> Option<u8> {
	match opening {
		b'(' => Some(b')'),
		b'{' => Some(b'}'),
		b'[' => Some(b']'),
		b'<' => Some(b'>'),
		_ => None,
	}
}

/// Find the offset of the bracket closing the one at `start`.
///
/// - A backslash skips the character after it.
/// - Unless `strict`, `'` and `"` open string literals whose contents are
///   ignored (see [`find_string_end`]).
/// - With `is_double`, the opening bracket must be doubled (`{{`) and only
///   doubled runs open or close; the returned offset is the second character
///   of the closing pair.
///
/// Unterminated brackets are a parse error anchored at `start`.
pub fn find_matching_bracket(
	source: &Source<'_>,
	start: usize,
	strict: bool,
	is_double: bool,
) -> DocmacroResult<usize> {
	let bytes = source.bytes();
	let Some(opening) = source.byte(start) else {
		return Err(source.error(
			start.min(source.len().saturating_sub(1)),
			1,
			"expected an opening bracket, found the end of the document",
		));
	};
	let Some(closing) = closing_bracket(opening) else {
		let found = source.text[start..].chars().next().unwrap_or_default();
		return Err(source.error(
			start,
			1,
			format!("expected an opening bracket, found `{found}`"),
		));
	};

	let mut index = start + 1;

	if is_double {
		if source.byte(index) != Some(opening) {
			let found = source.text[index.min(source.len())..]
				.chars()
				.next()
				.map_or_else(String::new, String::from);
			let opening = opening as char;
			return Err(source.error(
				start,
				2,
				format!("invalid double bracket, expected `{opening}{opening}`, found `{opening}{found}`"),
			));
		}

		index += 1;
	}

	let mut depth = 1_usize;

	while index < bytes.len() {
		let byte = bytes[index];

		if byte == b'\\' {
			index += 2;
			continue;
		}

		if !strict && matches!(byte, b'\'' | b'"') {
			index = find_string_end(source, index)? + 1;
			continue;
		}

		if byte == opening {
			if !is_double {
				depth += 1;
			} else if source.byte(index + 1) == Some(opening) {
				index += 1;
				depth += 1;
			}
		} else if byte == closing {
			if !is_double {
				depth -= 1;
			} else if source.byte(index + 1) == Some(closing) {
				index += 1;
				depth -= 1;
			}

			if depth == 0 {
				return Ok(index);
			}
		}

		index += 1;
	}

	Err(source.error(
		start,
		if is_double { 2 } else { 1 },
		"unterminated bracket",
	))
}

/// Find the offset of the last character of the string literal opened at
/// `start`. Triple-delimited literals close on a tripled delimiter and the
/// returned offset is the last of the three.
pub fn find_string_end(source: &Source<'_>, start: usize) -> DocmacroResult<usize> {
	let bytes = source.bytes();
	let Some(delimiter) = source.byte(start) else {
		return Ok(start);
	};
	let is_triple =
		source.byte(start + 1) == Some(delimiter) && source.byte(start + 2) == Some(delimiter);
	let mut index = if is_triple { start + 3 } else { start + 1 };

	while index < bytes.len() {
		let byte = bytes[index];

		if byte == b'\\' {
			index += 2;
			continue;
		}

		if byte == delimiter {
			if !is_triple {
				return Ok(index);
			}

			if source.byte(index + 1) == Some(delimiter) && source.byte(index + 2) == Some(delimiter) {
				return Ok(index + 2);
			}
		}

		index += 1;
	}

	Err(source.error(
		start,
		if is_triple { 3 } else { 1 },
		"unterminated string",
	))
}
