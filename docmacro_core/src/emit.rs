use crate::format_spec::FormatSpec;

/// What the emitted code does when the filter runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
	/// An expression whose value is rendered (`%name`, `%(expr)`, raw macros).
	Value,
	/// A block of statements whose printed output is rendered (`%{...}`).
	Statements,
	/// A path to a script whose printed output is rendered (`%%%py{...}`).
	File,
}

/// Everything a macro reader learned about one macro occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDescriptor {
	pub kind: MacroKind,
	/// `%%`: the value is a document fragment rather than text.
	pub is_double: bool,
	/// Trailing `;`: the result is not rendered.
	pub is_quiet: bool,
	/// Explicit `i`/`b` prefix.
	pub is_inline: Option<bool>,
	/// Alone on its line, so it may expand to a fenced block.
	pub is_solo: bool,
	pub format_spec: Option<FormatSpec>,
	pub body: String,
}

impl MacroDescriptor {
	pub fn new(kind: MacroKind, body: impl Into<String>) -> Self {
		Self {
			kind,
			is_double: false,
			is_quiet: false,
			is_inline: None,
			is_solo: false,
			format_spec: None,
			body: body.into(),
		}
	}

	/// The code placed inside the span. Loud, single `%` value macros are
	/// wrapped in `print(...)`, through `doc.format` when a specifier is given.
	pub fn code(&self) -> String {
		if self.kind != MacroKind::Value || self.is_double || self.is_quiet {
			return self.body.clone();
		}

		let value = strip_print_call(&self.body);

		match &self.format_spec {
			Some(spec) => format!("print(doc.format({value}, {}))", lua_string(&spec.raw)),
			None => format!("print({value})"),
		}
	}

	/// The attribute classes, e.g. `.py .quiet .inline`.
	pub fn classes(&self) -> String {
		let mut classes = vec![match self.kind {
			MacroKind::File => ".py-file",
			_ if self.is_double => ".py-md",
			_ => ".py",
		}];

		if self.is_quiet {
			classes.push(".quiet");
		}

		match self.is_inline {
			Some(true) => classes.push(".inline"),
			Some(false) => classes.push(".block"),
			None => {}
		}

		classes.join(" ")
	}

	/// Render as a fenced block when solo, otherwise as a double-backtick
	/// inline span.
	pub fn render(&self) -> String {
		let code = self.code();
		let classes = self.classes();

		if self.is_solo {
			format!("\n```{{{classes}}}\n{code}\n```\n")
		} else {
			format!("`` {code} ``{{{classes}}}")
		}
	}
}

fn strip_print_call(body: &str) -> &str {
	body.strip_prefix("print(")
		.and_then(|inner| inner.strip_suffix(')'))
		.unwrap_or(body)
}

/// A double-quoted Lua string literal.
pub fn lua_string(text: &str) -> String {
	let mut literal = String::with_capacity(text.len() + 2);
	literal.push('"');

	for character in text.chars() {
		match character {
			'\\' => literal.push_str("\\\\"),
			'"' => literal.push_str("\\\""),
			'\n' => literal.push_str("\\n"),
			'\r' => literal.push_str("\\r"),
			'\0' => literal.push_str("\\0"),
			other => literal.push(other),
		}
	}

	literal.push('"');
	literal
}

/// A Lua long-bracket literal holding `text` byte for byte.
///
/// The level is raised until no closing bracket of that level occurs in the
/// text (or is formed by the text's tail). The newline after the opening
/// bracket is dropped by Lua, so a leading newline in `text` survives.
///
/// Lua normalises `\r\n`, `\n\r` and a lone `\r` inside long brackets to
/// `\n`, so text containing a carriage return is written as a quoted
/// [`lua_string`] instead.
pub fn lua_long_string(text: &str) -> String {
	if text.contains('\r') {
		return lua_string(text);
	}

	let mut level = 0;

	loop {
		let equals = "=".repeat(level);
		let closing = format!("]{equals}]");
		let tail = format!("]{equals}");

		if !text.contains(&closing) && !text.ends_with(&tail) {
			return format!("[{equals}[\n{text}{closing}");
		}

		level += 1;
	}
}
