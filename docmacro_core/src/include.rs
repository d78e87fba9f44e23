use std::fs;
use std::path::Path;

use crate::DocmacroResult;
use crate::matcher::find_matching_bracket;
use crate::position::Source;
use crate::preprocess::Scanner;
use crate::spans::Span;

/// One `formats: path` clause of a conditional include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatClause {
	/// Lowercased format names.
	pub formats: Vec<String>,
	pub path: String,
}

impl FormatClause {
	pub fn matches(&self, target_format: &str) -> bool {
		let target_format = target_format.to_lowercase();
		self.formats.iter().any(|format| *format == target_format)
	}
}

/// Split `html: a.md; latex, pdf: b.md` into clauses. Empty clauses are
/// ignored; a clause without `:` is returned as `Err` holding the clause.
pub fn parse_format_clauses(body: &str) -> Result<Vec<FormatClause>, String> {
	body.split(';')
		.map(str::trim)
		.filter(|clause| !clause.is_empty())
		.map(|clause| {
			let (formats, path) = clause.split_once(':').ok_or_else(|| clause.to_string())?;
			Ok(FormatClause {
				formats: formats
					.split(',')
					.map(|format| format.trim().to_lowercase())
					.filter(|format| !format.is_empty())
					.collect(),
				path: path.trim().to_string(),
			})
		})
		.collect()
}

impl Scanner<'_> {
	/// `%%%md{path}`: the preprocessed contents of another markdown file.
	pub(crate) fn read_markdown_include(&self, start: usize) -> DocmacroResult<Span> {
		let open = start + "%%%md".len();
		let close = find_matching_bracket(&self.source, open, true, false)?;
		let len = close + 1 - start;
		let path = self.source.text[open + 1..close]
			.trim()
			.replace("{format}", &self.options.target_format);

		let contents = self.include(start, len, &path)?;
		Ok(Span::new(len, contents))
	}

	/// `%%%mdifformat{fmt1, fmt2: path; fmt3: path}`: the first clause listing
	/// the target format is included, otherwise nothing.
	pub(crate) fn read_conditional_include(&self, start: usize) -> DocmacroResult<Span> {
		let open = start + "%%%mdifformat".len();
		let close = find_matching_bracket(&self.source, open, true, false)?;
		let len = close + 1 - start;
		let clauses = parse_format_clauses(&self.source.text[open + 1..close]).map_err(|clause| {
			self.source.error(
				start,
				len,
				format!("expected `formats: path` in conditional include, found `{clause}`"),
			)
		})?;

		let Some(clause) = clauses
			.iter()
			.find(|clause| clause.matches(&self.options.target_format))
		else {
			tracing::debug!(format = %self.options.target_format, "no conditional include clause matched");
			return Ok(Span::new(len, ""));
		};

		let contents = self.include(start, len, &clause.path)?;
		Ok(Span::new(len, contents))
	}

	fn include(&self, start: usize, len: usize, relative: &str) -> DocmacroResult<String> {
		let base_dir = &self.options.base_dir;
		let path = base_dir.join(relative);

		if !path.is_file() {
			return Err(self.source.error(start, len, missing_file_message(base_dir, relative)));
		}

		let canonical = path.canonicalize()?;

		if self.includes.contains(&canonical) {
			return Err(self.source.error(
				start,
				len,
				format!("File {relative} includes itself"),
			));
		}

		tracing::debug!(path = %path.display(), "including markdown file");

		let contents = fs::read_to_string(&path)?;
		let name = path.display().to_string();
		let mut includes = self.includes.clone();
		includes.push(canonical);

		Scanner::new(Source::new(&name, &contents), self.options, includes).run()
	}
}

/// Describe a missing include: find the deepest ancestor of `relative` that
/// exists and list its files (when it is the file's own directory) or its
/// subdirectories.
pub fn missing_file_message(base_dir: &Path, relative: &str) -> String {
	let path = Path::new(relative);
	let parent = path.parent();
	let mut ancestor = parent;

	while let Some(directory) = ancestor {
		if base_dir.join(directory).is_dir() {
			break;
		}
		ancestor = directory.parent();
	}

	let Some(directory) = ancestor else {
		return format!("File {relative} does not exist");
	};

	let shown = if directory.as_os_str().is_empty() {
		".".to_string()
	} else {
		directory.display().to_string()
	};
	let want_files = Some(directory) == parent;
	let entries = list_entries(&base_dir.join(directory), want_files);

	if want_files {
		format!("File {relative} does not exist, but its parent directory does. Files in {shown}: {entries}")
	} else {
		format!(
			"File {relative} does not exist. Parent directories down to {shown} exist. Directories in {shown}: {entries}"
		)
	}
}

fn list_entries(directory: &Path, files: bool) -> String {
	let Ok(entries) = fs::read_dir(directory) else {
		return String::new();
	};

	let mut names: Vec<String> = entries
		.filter_map(Result::ok)
		.filter(|entry| {
			entry
				.file_type()
				.is_ok_and(|kind| if files { kind.is_file() } else { kind.is_dir() })
		})
		.map(|entry| entry.file_name().to_string_lossy().into_owned())
		.collect();
	names.sort();

	names.join(", ")
}
