use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use docmacro_core::FormatSpec;
use docmacro_core::FormatValue;
use docmacro_core::PreprocessOptions;
use docmacro_core::preprocess;
use mlua::Function;
use mlua::HookTriggers;
use mlua::Lua;
use mlua::LuaSerdeExt;
use mlua::MultiValue;
use mlua::Table;
use mlua::Value;
use mlua::VmState;

use crate::ServerError;
use crate::ServerResult;

/// VM instructions between two checks of the execution deadline.
const DEADLINE_CHECK_INSTRUCTIONS: u32 = 10_000;

/// When the running chunk must stop, and the limit it was given.
type Deadline = Arc<Mutex<Option<(Instant, Duration)>>>;

/// The persistent interpreter behind a server: one Lua state whose globals
/// survive between requests, a buffer collecting everything `print` writes
/// and the `doc` helper table.
///
/// | Global              | Meaning                                                |
/// | ------------------- | ------------------------------------------------------ |
/// | `print(...)`        | appends the arguments, tab separated, to the output     |
/// | `doc.format(v, s)`  | formats `v` with a Python style specifier such as `>8.2f` |
/// | `doc.fragment(t)`   | preprocesses `t` and wraps it as a markdown fragment    |
/// | `doc.target_format` | the format the document is being rendered to            |
///
/// With a time limit, a chunk that runs longer fails with a Lua error at the
/// next deadline check, so a hung macro cannot hold the environment.
pub struct LuaEnvironment {
	lua: Lua,
	output: Arc<Mutex<String>>,
	target_format: String,
	time_limit: Option<Duration>,
	deadline: Deadline,
}

impl LuaEnvironment {
	pub fn new(target_format: impl Into<String>) -> ServerResult<Self> {
		let target_format = target_format.into();
		let lua = Lua::new();
		let output = Arc::new(Mutex::new(String::new()));
		let deadline: Deadline = Arc::new(Mutex::new(None));

		install_print(&lua, Arc::clone(&output))?;
		install_doc(&lua, &target_format)?;
		install_deadline_hook(&lua, Arc::clone(&deadline));

		Ok(Self {
			lua,
			output,
			target_format,
			time_limit: None,
			deadline,
		})
	}

	/// Stop every chunk that runs longer than `limit`.
	#[must_use]
	pub fn with_time_limit(mut self, limit: Duration) -> Self {
		self.time_limit = Some(limit);
		self
	}

	pub fn time_limit(&self) -> Option<Duration> {
		self.time_limit
	}

	pub fn target_format(&self) -> &str {
		&self.target_format
	}

	/// Run `code` as statements and return what it printed, without the final
	/// newline. Output printed before an error is discarded.
	pub fn execute(&self, code: &str, chunk_name: &str) -> ServerResult<String> {
		self.take_output()?;

		let result = self.with_deadline(|| self.lua.load(code).set_name(format!("={chunk_name}")).exec());
		let mut output = self.take_output()?;
		result?;

		if output.ends_with('\n') {
			output.pop();
		}

		Ok(output)
	}

	/// Evaluate `code` as an expression that yields a document fragment and
	/// return the fragment's JSON form.
	pub fn evaluate(&self, code: &str) -> ServerResult<serde_json::Value> {
		let value: Value = self.with_deadline(|| self.lua.load(code).set_name("=object").eval())?;
		let fragment = as_fragment(&value)?;

		Ok(self.lua.from_value(Value::Table(fragment))?)
	}

	/// Run `chunk` with the deadline armed, disarming it afterwards.
	fn with_deadline<T>(&self, chunk: impl FnOnce() -> mlua::Result<T>) -> ServerResult<T> {
		let armed = self.time_limit.map(|limit| (Instant::now() + limit, limit));
		self.set_deadline(armed)?;
		let result = chunk();
		self.set_deadline(None)?;

		Ok(result?)
	}

	fn set_deadline(&self, deadline: Option<(Instant, Duration)>) -> ServerResult<()> {
		*self
			.deadline
			.lock()
			.map_err(|e| ServerError::Environment(e.to_string()))? = deadline;

		Ok(())
	}

	fn take_output(&self) -> ServerResult<String> {
		let mut output = self
			.output
			.lock()
			.map_err(|e| ServerError::Environment(e.to_string()))?;

		Ok(std::mem::take(&mut *output))
	}
}

/// A fragment, or a one-element list holding one.
fn as_fragment(value: &Value) -> ServerResult<Table> {
	let Value::Table(table) = value else {
		return Err(ServerError::UnsupportedObject(value.type_name()));
	};

	if is_fragment(table) {
		return Ok(table.clone());
	}

	if table.raw_len() == 1 {
		if let Ok(Value::Table(inner)) = table.raw_get::<Value>(1) {
			if is_fragment(&inner) {
				return Ok(inner);
			}
		}
	}

	Err(ServerError::UnsupportedObject("table"))
}

fn is_fragment(table: &Table) -> bool {
	matches!(table.raw_get::<Value>("t"), Ok(Value::String(_)))
}

fn install_deadline_hook(lua: &Lua, deadline: Deadline) {
	let triggers = HookTriggers::new().every_nth_instruction(DEADLINE_CHECK_INSTRUCTIONS);

	lua.set_hook(triggers, move |_, _| {
		let armed = *deadline
			.lock()
			.map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;

		match armed {
			Some((at, limit)) if Instant::now() >= at => {
				Err(mlua::Error::RuntimeError(format!(
					"execution exceeded the time limit of {} ms",
					limit.as_millis()
				)))
			}
			_ => Ok(VmState::Continue),
		}
	});
}

fn install_print(lua: &Lua, output: Arc<Mutex<String>>) -> mlua::Result<()> {
	let print = lua.create_function(move |lua, arguments: MultiValue| {
		let tostring: Function = lua.globals().get("tostring")?;
		let mut parts = Vec::with_capacity(arguments.len());

		for argument in arguments {
			let text: mlua::String = tostring.call(argument)?;
			parts.push(text.to_string_lossy());
		}

		let mut output = output
			.lock()
			.map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
		output.push_str(&parts.join("\t"));
		output.push('\n');

		Ok(())
	})?;

	lua.globals().set("print", print)
}

fn install_doc(lua: &Lua, target_format: &str) -> mlua::Result<()> {
	let doc = lua.create_table()?;
	doc.set("target_format", target_format)?;

	let format = lua.create_function(|lua, (value, spec): (Value, String)| {
		let spec = FormatSpec::parse(&spec).map_err(mlua::Error::external)?;
		let text;
		let value = match &value {
			Value::Integer(number) => FormatValue::Int(*number),
			Value::Number(number) => FormatValue::Float(*number),
			Value::Boolean(flag) => FormatValue::Bool(*flag),
			other => {
				let tostring: Function = lua.globals().get("tostring")?;
				text = tostring.call::<mlua::String>(other.clone())?.to_string_lossy();
				FormatValue::Str(&text)
			}
		};

		spec.apply(value).map_err(mlua::Error::external)
	})?;
	doc.set("format", format)?;

	let fragment_meta = lua.create_table()?;
	fragment_meta.set(
		"__tostring",
		lua.create_function(|_, fragment: Table| {
			let content: Table = fragment.get("c")?;
			content.get::<String>(2)
		})?,
	)?;

	let options = PreprocessOptions::new(target_format).with_source_name("doc.fragment");
	let fragment = lua.create_function(move |lua, text: String| {
		let text = preprocess(&text, &options).map_err(mlua::Error::external)?;
		let fragment = lua.create_table()?;
		fragment.set("t", "RawBlock")?;
		fragment.set("c", lua.create_sequence_from(["markdown".to_string(), text])?)?;
		fragment.set_metatable(Some(fragment_meta.clone()));

		Ok(fragment)
	})?;
	doc.set("fragment", fragment)?;

	lua.globals().set("doc", doc)
}
