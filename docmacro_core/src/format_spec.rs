use std::fmt::Write;
use std::sync::LazyLock;

use regex::Captures;
use regex::Regex;
use thiserror::Error;

static FORMAT_SPEC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"^(?:(?P<fill>.)?(?P<align>[<>=^]))?(?P<sign>[+\- ])?(?P<coerce>z)?(?P<alternate>#)?(?P<zero>0)?(?P<width>\d+)?(?P<grouping>[_,])?(?P<precision>\.\d+)?(?P<kind>[bcdeEfFgGnosxX%])?",
	)
	.unwrap_or_else(|e| panic!("invalid format spec pattern: {e}"))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
	/// `<`
	Left,
	/// `>`
	Right,
	/// `^`
	Center,
	/// `=`, padding goes between the sign and the digits.
	AfterSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
	/// `+`
	Always,
	/// `-`
	NegativeOnly,
	/// ` `
	Space,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FormatSpecError {
	#[error("invalid format specifier `{0}`")]
	Invalid(String),
	#[error("unknown format code '{code}' for value of type {value_type}")]
	UnknownCode { code: char, value_type: &'static str },
	#[error("{0} is not a valid character code")]
	InvalidCharacter(i64),
}

/// A value a [`FormatSpec`] can be applied to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormatValue<'a> {
	Int(i64),
	Float(f64),
	Bool(bool),
	Str(&'a str),
}

/// A trailing format specifier such as `:>8.2f`, using the Python format
/// mini-language: `[[fill]align][sign][z][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSpec {
	/// The specifier as written, without the leading `:`.
	pub raw: String,
	pub fill: Option<char>,
	pub align: Option<Align>,
	pub sign: Option<Sign>,
	pub coerce_zero: bool,
	pub alternate: bool,
	pub zero_pad: bool,
	pub width: Option<usize>,
	pub grouping: Option<char>,
	pub precision: Option<usize>,
	pub kind: Option<char>,
}

impl FormatSpec {
	/// Parse a specifier starting with `:` at `offset`. Returns the number of
	/// bytes consumed, including the colon.
	///
	/// A colon followed by nothing that forms a specifier (`:` or `: `) is not
	/// a specifier and yields `None`.
	pub fn parse_at(contents: &str, offset: usize) -> Option<(usize, Self)> {
		let rest = contents.get(offset..)?.strip_prefix(':')?;
		let captures = FORMAT_SPEC_PATTERN.captures(rest)?;
		let matched = captures.get(0)?.as_str();

		if matched.trim_end().is_empty() {
			return None;
		}

		Some((matched.len() + 1, Self::from_captures(&captures)))
	}

	/// Parse a complete specifier written without the leading colon. The empty
	/// string is the default specifier.
	pub fn parse(spec: &str) -> Result<Self, FormatSpecError> {
		let captures = FORMAT_SPEC_PATTERN
			.captures(spec)
			.ok_or_else(|| FormatSpecError::Invalid(spec.to_string()))?;

		if captures.get(0).map_or(0, |m| m.len()) != spec.len() {
			return Err(FormatSpecError::Invalid(spec.to_string()));
		}

		Ok(Self::from_captures(&captures))
	}

	fn from_captures(captures: &Captures<'_>) -> Self {
		let text = |name: &str| captures.name(name).map(|m| m.as_str());

		Self {
			raw: captures.get(0).map_or("", |m| m.as_str()).to_string(),
			fill: text("fill").and_then(|fill| fill.chars().next()),
			align: text("align").map(|align| {
				match align {
					"<" => Align::Left,
					">" => Align::Right,
					"^" => Align::Center,
					_ => Align::AfterSign,
				}
			}),
			sign: text("sign").map(|sign| {
				match sign {
					"+" => Sign::Always,
					" " => Sign::Space,
					_ => Sign::NegativeOnly,
				}
			}),
			coerce_zero: text("coerce").is_some(),
			alternate: text("alternate").is_some(),
			zero_pad: text("zero").is_some(),
			width: text("width").and_then(|width| width.parse().ok()),
			grouping: text("grouping").and_then(|grouping| grouping.chars().next()),
			precision: text("precision").and_then(|precision| precision[1..].parse().ok()),
			kind: text("kind").and_then(|kind| kind.chars().next()),
		}
	}

	/// Format `value` according to this specifier.
	pub fn apply(&self, value: FormatValue<'_>) -> Result<String, FormatSpecError> {
		let (prefix, body, numeric) = match value {
			FormatValue::Str(text) => (String::new(), self.format_text(text, "string")?, false),
			FormatValue::Bool(flag) if matches!(self.kind, None | Some('s')) => {
				(
					String::new(),
					self.format_text(if flag { "true" } else { "false" }, "boolean")?,
					false,
				)
			}
			FormatValue::Bool(flag) => self.format_int(i64::from(flag))?,
			FormatValue::Int(number) => self.format_int(number)?,
			FormatValue::Float(number) => self.format_float(number)?,
		};

		Ok(self.pad(&prefix, &body, numeric))
	}

	fn format_text(&self, text: &str, value_type: &'static str) -> Result<String, FormatSpecError> {
		match self.kind {
			None | Some('s') => {
				Ok(match self.precision {
					Some(precision) => text.chars().take(precision).collect(),
					None => text.to_string(),
				})
			}
			Some(code) => Err(FormatSpecError::UnknownCode { code, value_type }),
		}
	}

	fn sign_prefix(&self, negative: bool) -> &'static str {
		match (negative, self.sign) {
			(true, _) => "-",
			(false, Some(Sign::Always)) => "+",
			(false, Some(Sign::Space)) => " ",
			(false, _) => "",
		}
	}

	fn format_int(&self, number: i64) -> Result<(String, String, bool), FormatSpecError> {
		let magnitude = number.unsigned_abs();
		let sign = self.sign_prefix(number < 0);
		let (base_prefix, digits) = match self.kind {
			None | Some('d' | 'n') => ("", group_digits(&magnitude.to_string(), self.grouping, 3)),
			Some('b') => ("0b", group_digits(&format!("{magnitude:b}"), self.grouping, 4)),
			Some('o') => ("0o", group_digits(&format!("{magnitude:o}"), self.grouping, 4)),
			Some('x') => ("0x", group_digits(&format!("{magnitude:x}"), self.grouping, 4)),
			Some('X') => ("0X", group_digits(&format!("{magnitude:X}"), self.grouping, 4)),
			Some('c') => {
				let character = u32::try_from(number)
					.ok()
					.and_then(char::from_u32)
					.ok_or(FormatSpecError::InvalidCharacter(number))?;
				return Ok((String::new(), character.to_string(), false));
			}
			Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => return self.format_float(number as f64),
			Some(code) => {
				return Err(FormatSpecError::UnknownCode {
					code,
					value_type: "integer",
				});
			}
		};
		let base_prefix = if self.alternate { base_prefix } else { "" };

		Ok((format!("{sign}{base_prefix}"), digits, true))
	}

	fn format_float(&self, number: f64) -> Result<(String, String, bool), FormatSpecError> {
		let upper = matches!(self.kind, Some('E' | 'F' | 'G'));

		if number.is_nan() || number.is_infinite() {
			let text = if number.is_nan() { "nan" } else { "inf" };
			let text = if upper { text.to_uppercase() } else { text.to_string() };
			let sign = self.sign_prefix(number.is_infinite() && number < 0.0);
			return Ok((sign.to_string(), text, true));
		}

		let magnitude = number.abs();
		let body = match self.kind {
			None => {
				match self.precision {
					Some(precision) => general(magnitude, precision, false, self.alternate),
					None => shortest(magnitude),
				}
			}
			Some('e' | 'E') => exponent(magnitude, self.precision.unwrap_or(6), upper, self.alternate),
			Some('f' | 'F') => fixed(magnitude, self.precision.unwrap_or(6), self.alternate),
			Some('g' | 'G' | 'n') => general(magnitude, self.precision.unwrap_or(6), upper, self.alternate),
			Some('%') => format!("{}%", fixed(magnitude * 100.0, self.precision.unwrap_or(6), self.alternate)),
			Some(code) => {
				return Err(FormatSpecError::UnknownCode {
					code,
					value_type: "float",
				});
			}
		};

		let is_zero = body.chars().all(|c| !c.is_ascii_digit() || c == '0');
		let negative = number.is_sign_negative() && !(self.coerce_zero && is_zero);
		let body = group_integer_part(&body, self.grouping);

		Ok((self.sign_prefix(negative).to_string(), body, true))
	}

	fn pad(&self, prefix: &str, body: &str, numeric: bool) -> String {
		let length = prefix.chars().count() + body.chars().count();
		let width = self.width.unwrap_or(0);

		if width <= length {
			return format!("{prefix}{body}");
		}

		let fill = self.fill.unwrap_or(if self.zero_pad { '0' } else { ' ' });
		let align = self.align.unwrap_or(match (numeric, self.zero_pad) {
			(true, true) => Align::AfterSign,
			(true, false) => Align::Right,
			(false, _) => Align::Left,
		});
		let padding = width - length;
		let repeat = |count: usize| fill.to_string().repeat(count);

		match align {
			Align::Left => format!("{prefix}{body}{}", repeat(padding)),
			Align::Right => format!("{}{prefix}{body}", repeat(padding)),
			Align::Center => {
				let left = padding / 2;
				format!("{}{prefix}{body}{}", repeat(left), repeat(padding - left))
			}
			Align::AfterSign if numeric => format!("{prefix}{}{body}", repeat(padding)),
			Align::AfterSign => format!("{prefix}{body}{}", repeat(padding)),
		}
	}
}

/// Insert `separator` every `size` digits from the right.
fn group_digits(digits: &str, separator: Option<char>, size: usize) -> String {
	let Some(separator) = separator else {
		return digits.to_string();
	};
	let mut grouped = String::with_capacity(digits.len() + digits.len() / size);

	for (index, digit) in digits.chars().enumerate() {
		if index > 0 && (digits.len() - index) % size == 0 {
			grouped.push(separator);
		}
		grouped.push(digit);
	}

	grouped
}

fn group_integer_part(body: &str, separator: Option<char>) -> String {
	if separator.is_none() {
		return body.to_string();
	}

	let split = body
		.find(|c: char| !c.is_ascii_digit())
		.unwrap_or(body.len());
	let (integer, rest) = body.split_at(split);

	format!("{}{rest}", group_digits(integer, separator, 3))
}

fn fixed(number: f64, precision: usize, alternate: bool) -> String {
	let mut text = format!("{number:.precision$}");
	if alternate && precision == 0 {
		text.push('.');
	}

	text
}

/// Scientific notation with a signed exponent of at least two digits.
fn exponent(number: f64, precision: usize, upper: bool, alternate: bool) -> String {
	let text = format!("{number:.precision$e}");
	let (mantissa, power) = text.split_once('e').unwrap_or((text.as_str(), "0"));
	let power: i32 = power.parse().unwrap_or(0);
	let mut output = mantissa.to_string();

	if alternate && precision == 0 {
		output.push('.');
	}

	let marker = if upper { 'E' } else { 'e' };
	let sign = if power < 0 { '-' } else { '+' };
	let _ = write!(output, "{marker}{sign}{:02}", power.unsigned_abs());

	output
}

fn general(number: f64, precision: usize, upper: bool, alternate: bool) -> String {
	let precision = precision.max(1);
	let power = if number == 0.0 {
		0
	} else {
		let text = format!("{:.*e}", precision - 1, number);
		text.split_once('e')
			.and_then(|(_, power)| power.parse::<i64>().ok())
			.unwrap_or(0)
	};

	if -4 <= power && power < precision as i64 {
		let decimals = (precision as i64 - 1 - power).max(0) as usize;
		let text = format!("{number:.decimals$}");
		if alternate { text } else { trim_fraction(&text) }
	} else {
		let text = exponent(number, precision - 1, upper, alternate);
		if alternate {
			return text;
		}
		let marker = if upper { 'E' } else { 'e' };
		match text.split_once(marker) {
			Some((mantissa, power)) => format!("{}{marker}{power}", trim_fraction(mantissa)),
			None => text,
		}
	}
}

fn trim_fraction(text: &str) -> String {
	if text.contains('.') {
		text.trim_end_matches('0').trim_end_matches('.').to_string()
	} else {
		text.to_string()
	}
}

/// The shortest representation that round-trips, always showing a fraction
/// or an exponent.
fn shortest(number: f64) -> String {
	if number == 0.0 || (1e-4..1e16).contains(&number) {
		let text = number.to_string();
		if text.contains('.') { text } else { format!("{text}.0") }
	} else {
		let text = format!("{number:e}");
		let (mantissa, power) = text.split_once('e').unwrap_or((text.as_str(), "0"));
		let power: i32 = power.parse().unwrap_or(0);
		let sign = if power < 0 { '-' } else { '+' };
		format!("{mantissa}e{sign}{:02}", power.unsigned_abs())
	}
}
