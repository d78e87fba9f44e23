use std::sync::LazyLock;

use regex::Regex;

use crate::DocmacroResult;
use crate::emit::MacroDescriptor;
use crate::emit::MacroKind;
use crate::emit::lua_long_string;
use crate::format_spec::FormatSpec;
use crate::matcher::find_matching_bracket;
use crate::position::is_only_text_on_line;
use crate::preprocess::Scanner;
use crate::spans::Span;
use crate::spans::deindent;
use crate::spans::line_offset;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^\w[\w.]*").unwrap_or_else(|e| panic!("invalid identifier pattern: {e}"))
});

/// The leading part shared by identifier and expression macros.
struct Prefix {
	/// Offset just past the `%` or `%%`.
	end: usize,
	is_inline: Option<bool>,
	is_double: bool,
}

/// What follows a macro: an optional format specifier and an optional `;`.
struct Suffix {
	end: usize,
	format_spec: Option<FormatSpec>,
	is_quiet: bool,
}

/// An identifier at `offset`, without trailing dots.
fn identifier_at(text: &str, offset: usize) -> Option<&str> {
	let matched = IDENTIFIER.find(text.get(offset..)?)?;
	Some(matched.as_str().trim_end_matches('.'))
}

impl Scanner<'_> {
	fn read_prefix(&self, start: usize) -> Prefix {
		let (mut end, is_inline) = match self.source.byte(start) {
			Some(b'i') => (start + 1, Some(true)),
			Some(b'b') => (start + 1, Some(false)),
			_ => (start, None),
		};
		let is_double = self.source.byte(end + 1) == Some(b'%');
		end += if is_double { 2 } else { 1 };

		Prefix {
			end,
			is_inline,
			is_double,
		}
	}

	fn read_suffix(&self, mut end: usize) -> Suffix {
		let mut format_spec = None;

		if self.source.byte(end) == Some(b':') {
			if let Some((len, spec)) = FormatSpec::parse_at(self.source.text, end) {
				end += len;
				format_spec = Some(spec);
			}
		}

		let is_quiet = self.source.byte(end) == Some(b';');
		if is_quiet {
			end += 1;
		}

		Suffix {
			end,
			format_spec,
			is_quiet,
		}
	}

	fn finish(&self, start: usize, prefix: &Prefix, body: String, suffix: Suffix) -> Span {
		let descriptor = MacroDescriptor {
			kind: MacroKind::Value,
			is_double: prefix.is_double,
			is_quiet: suffix.is_quiet,
			is_inline: prefix.is_inline,
			is_solo: is_only_text_on_line(self.source.text, start, suffix.end),
			format_spec: suffix.format_spec,
			body,
		};
		tracing::trace!(start, code = %descriptor.code(), "expanded macro");

		Span::new(suffix.end - start, descriptor.render())
	}

	/// `%name`, `%name(args)[index].field`, optionally followed by a format
	/// specifier and `;`. A `{` straight after the name makes it a raw macro.
	pub(crate) fn read_identifier_macro(&self, start: usize) -> DocmacroResult<Span> {
		let text = self.source.text;
		let prefix = self.read_prefix(start);
		let Some(name) = identifier_at(text, prefix.end) else {
			return Err(self.source.error(prefix.end, 1, "expected a macro name"));
		};
		let mut index = prefix.end + name.len();

		if self.source.byte(index) == Some(b'{') {
			return self.read_raw_macro(start, &prefix, name, index);
		}

		let mut body = name.to_string();

		loop {
			match self.source.byte(index) {
				Some(b'(' | b'[') => {
					let end = find_matching_bracket(&self.source, index, false, false)?;
					body.push_str(&text[index..=end]);
					index = end + 1;
				}
				Some(b'.') => {
					let Some(field) = identifier_at(text, index + 1) else {
						break;
					};
					body.push('.');
					body.push_str(field);
					index += 1 + field.len();
				}
				_ => break,
			}
		}

		let suffix = self.read_suffix(index);
		Ok(self.finish(start, &prefix, body, suffix))
	}

	/// `%(expression)` with optional format specifier and `;`.
	pub(crate) fn read_expression_macro(&self, start: usize) -> DocmacroResult<Span> {
		let prefix = self.read_prefix(start);
		let end = find_matching_bracket(&self.source, prefix.end, false, false)?;
		let body = self.source.text[prefix.end + 1..end].trim().to_string();
		let suffix = self.read_suffix(end + 1);

		Ok(self.finish(start, &prefix, body, suffix))
	}

	/// `name{arg}{{raw}}...`: a call whose arguments are literal text. Single
	/// braces pass a document fragment, double braces pass the raw string.
	fn read_raw_macro(&self, start: usize, prefix: &Prefix, name: &str, mut index: usize) -> DocmacroResult<Span> {
		let text = self.source.text;
		let mut arguments = Vec::new();

		while self.source.byte(index) == Some(b'{') {
			let is_raw = self.source.byte(index + 1) == Some(b'{');
			let end = find_matching_bracket(&self.source, index, true, is_raw)?;

			arguments.push(if is_raw {
				lua_long_string(&text[index + 2..end - 1])
			} else {
				format!("doc.fragment({})", lua_long_string(&text[index + 1..end]))
			});

			index = end + 1;
		}

		let body = format!("{name}({})", arguments.join(", "));
		let suffix = self.read_suffix(index);

		Ok(self.finish(start, prefix, body, suffix))
	}

	/// `%{ statements }`, de-indented, optionally followed by `;`.
	pub(crate) fn read_block_macro(&self, start: usize) -> DocmacroResult<Span> {
		let text = self.source.text;
		let open = start + 1;
		let close = find_matching_bracket(&self.source, open, false, false)?;
		let inner = &text[open + 1..close];
		let body = inner.trim_matches('\n');
		let body_start = open + 1 + (inner.len() - inner.trim_start_matches('\n').len());

		let code = deindent(body).map_err(|error| {
			self.source.error(
				body_start + line_offset(body, error.line),
				1,
				"inconsistent indentation in code block",
			)
		})?;

		let mut end = close + 1;
		let is_quiet = self.source.byte(end) == Some(b';');
		if is_quiet {
			end += 1;
		}

		let mut descriptor = MacroDescriptor::new(MacroKind::Statements, code);
		descriptor.is_quiet = is_quiet;
		descriptor.is_solo = is_only_text_on_line(text, start, end);

		Ok(Span::new(end - start, descriptor.render()))
	}

	/// `%%%py{path}`: a script run by the filter. `{format}` in the path is
	/// replaced with the target format.
	pub(crate) fn read_script_include(&self, start: usize) -> DocmacroResult<Span> {
		let text = self.source.text;
		let open = start + "%%%py".len();
		let close = find_matching_bracket(&self.source, open, true, false)?;
		let path = text[open + 1..close]
			.trim()
			.replace("{format}", &self.options.target_format);

		let mut end = close + 1;
		let is_quiet = self.source.byte(end) == Some(b';');
		if is_quiet {
			end += 1;
		}

		let mut descriptor = MacroDescriptor::new(MacroKind::File, path);
		descriptor.is_quiet = is_quiet;
		descriptor.is_solo = is_only_text_on_line(text, start, end);

		Ok(Span::new(end - start, descriptor.render()))
	}
}
