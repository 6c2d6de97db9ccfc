use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden::PidFile;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::kind::ServiceKind;
use crate::store;

/// Parsed `--key[=value]` flags. A bare flag maps to an empty string.
pub type Flags = BTreeMap<String, String>;

pub const FORCE: &str = "force";
pub const FOREGROUND: &str = "foreground";
pub const NOW: &str = "now";
pub const MAIN: &str = "main";
pub const AUXILIARY: &str = "auxiliary";

/// Persistent attributes of a running service, mirrored into its lockfile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
	/// Working directory for commands; relative to the service directory.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub workdir: Option<PathBuf>,
	/// `KEY=value` declarations applied to every command.
	pub env: Vec<String>,
	/// The kind's one-time setup has run.
	pub setup: bool,
	/// Every directive has been evaluated.
	pub configured: bool,
	/// The main process is tearing the service down.
	pub stopping: bool,
	/// Attributes set by `set` steps or by custom kinds.
	#[serde(flatten)]
	pub attributes: BTreeMap<String, Value>,
}

/// Lockfile keys owned by [`State`]'s own fields.
pub const RESERVED_KEYS: &[&str] = &["workdir", "env", "setup", "configured", "stopping"];

impl State {
	pub fn is_reserved(key: &str) -> bool {
		RESERVED_KEYS.contains(&key)
	}

	/// Applies one persisted key. Known keys holding the wrong type are
	/// skipped, the rest of the document still loads.
	pub fn apply(&mut self, key: &str, value: Value) {
		let applied = match key {
			"workdir" => from_value(value).map(|v| self.workdir = v),
			"env" => from_value(value).map(|v| self.env = v),
			"setup" => from_value(value).map(|v| self.setup = v),
			"configured" => from_value(value).map(|v| self.configured = v),
			"stopping" => from_value(value).map(|v| self.stopping = v),
			_ => {
				self.attributes.insert(key.to_string(), value);
				Some(())
			}
		};
		if applied.is_none() {
			tracing::debug!(key, "skipping persisted attribute of the wrong type");
		}
	}

	pub fn to_map(&self) -> Map<String, Value> {
		match serde_json::to_value(self) {
			Ok(Value::Object(map)) => map,
			_ => Map::new(),
		}
	}
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Option<T> {
	serde_json::from_value(value).ok()
}

/// Commands run on shutdown, last registered first.
#[derive(Clone, Default)]
pub struct ExitStack(Arc<Mutex<Vec<Box<dyn FnOnce() + Send>>>>);

impl ExitStack {
	pub fn push(&self, f: impl FnOnce() + Send + 'static) {
		if let Ok(mut stack) = self.0.lock() {
			stack.push(Box::new(f));
		}
	}

	pub fn len(&self) -> usize {
		self.0.lock().map(|s| s.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Pops and runs every registered command.
	pub fn unwind(&self) {
		loop {
			// release the lock before running, a command may register another
			let next = match self.0.lock() {
				Ok(mut stack) => stack.pop(),
				Err(_) => None,
			};
			match next {
				Some(f) => f(),
				None => break,
			}
		}
	}
}

/// One service: a directory under the root plus its runtime files.
#[derive(Clone)]
pub struct Service {
	pub name: String,
	pub flags: Flags,
	pub directory: PathBuf,
	pub runtime_dir: PathBuf,
	pub logfile: PathBuf,
	pub lockfile: PathBuf,
	pub pidfile: PathBuf,
	pub state: State,
	/// Lockfile contents as last loaded or saved.
	pub(crate) snapshot: Map<String, Value>,
	pub(crate) exit_commands: ExitStack,
	context: Context,
}

impl Service {
	/// Opens an existing service.
	pub fn open(context: &Context, name: &str, flags: Flags) -> Result<Self> {
		Self::open_with(context, name, flags, true)
	}

	/// Opens a service, optionally accepting a directory that does not exist
	/// yet (for `init`).
	pub fn open_with(context: &Context, name: &str, flags: Flags, require_directory: bool) -> Result<Self> {
		let directory = context.service_dir(name);
		if require_directory && !directory.is_dir() {
			return Err(Error::NotFound {
				kind: context.title(),
				name: name.to_string(),
			});
		}
		let runtime_dir = context.runtime_dir(name);
		if context.detached {
			std::fs::create_dir_all(&runtime_dir)?;
		}
		let mut service = Self {
			name: name.to_string(),
			flags,
			logfile: runtime_dir.join("log"),
			lockfile: runtime_dir.join("lock"),
			pidfile: runtime_dir.join("pid"),
			directory,
			runtime_dir,
			state: State::default(),
			snapshot: Map::new(),
			exit_commands: ExitStack::default(),
			context: context.clone(),
		};
		store::load(&mut service);
		Ok(service)
	}

	pub fn context(&self) -> &Context {
		&self.context
	}

	pub fn kind(&self) -> Arc<dyn ServiceKind> {
		Arc::clone(&self.context.kind)
	}

	pub fn title(&self) -> String {
		self.context.title()
	}

	pub fn detached(&self) -> bool {
		self.context.detached
	}

	pub fn has_flag(&self, flag: &str) -> bool {
		self.flags.contains_key(flag)
	}

	pub fn pid_file(&self) -> PidFile {
		PidFile::new(&self.pidfile)
	}

	/// Where commands run: the service directory joined with the current
	/// `workdir` attribute.
	pub fn workdir(&self) -> PathBuf {
		match &self.state.workdir {
			Some(dir) => self.directory.join(dir),
			None => self.directory.clone(),
		}
	}

	pub fn enabled_config(&self) -> PathBuf {
		self.directory.join(self.context.kind.config_file_name())
	}

	pub fn disabled_config(&self) -> PathBuf {
		self.directory.join(format!(".{}", self.context.kind.config_file_name()))
	}

	/// The config file in whichever form exists.
	pub fn config_file(&self) -> Option<PathBuf> {
		[self.enabled_config(), self.disabled_config()]
			.into_iter()
			.find(|p| p.is_file())
	}

	pub fn is_started(&self) -> bool {
		self.lockfile.exists()
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled_config().is_file()
	}

	/// Registers `f` to run when the main process stops the service.
	pub fn on_exit(&self, f: impl FnOnce() + Send + 'static) {
		self.exit_commands.push(f);
	}

	pub fn exit_command_count(&self) -> usize {
		self.exit_commands.len()
	}
}

impl fmt::Debug for Service {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Service")
			.field("name", &self.name)
			.field("flags", &self.flags)
			.field("directory", &self.directory)
			.field("runtime_dir", &self.runtime_dir)
			.field("state", &self.state)
			.finish_non_exhaustive()
	}
}

pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<()> {
	match std::fs::remove_file(path) {
		Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn apply_skips_wrong_types() {
		let mut state = State::default();
		state.apply("env", json!("PORT=1"));
		state.apply("configured", json!(true));
		state.apply("port", json!(8080));
		assert!(state.env.is_empty());
		assert!(state.configured);
		assert_eq!(state.attributes.get("port"), Some(&json!(8080)));
	}

	#[test]
	fn state_flattens_attributes() {
		let mut state = State::default();
		state.attributes.insert("color".into(), json!("blue"));
		let map = state.to_map();
		assert_eq!(map.get("color"), Some(&json!("blue")));
		assert_eq!(map.get("configured"), Some(&json!(false)));
		assert!(!map.contains_key("workdir"));
	}

	#[test]
	fn exit_stack_unwinds_last_first() {
		let order = Arc::new(Mutex::new(Vec::new()));
		let stack = ExitStack::default();
		for i in 0..3 {
			let order = Arc::clone(&order);
			stack.push(move || order.lock().unwrap().push(i));
		}
		stack.unwind();
		assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
		assert!(stack.is_empty());
	}
}
