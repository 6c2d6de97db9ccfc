use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::dispatch;
use crate::error::{Error, Result};
use crate::exec::RunSpec;
use crate::service::Service;

/// Written by `init`.
pub const TEMPLATE: &str = r#"# Steps run in order each time the service starts.
#
# [[step]]
# workdir = "app"
#
# [[step]]
# env = "PORT=8080"
#
# [[step]]
# run = "./server --port $PORT &"
#
# [[step]]
# loop = "./healthcheck"
# delay = 30
#
# [[step]]
# on_stop = "./cleanup"
"#;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
	#[serde(default, rename = "step")]
	pub steps: Vec<toml::Table>,
}

/// Keys each step accepts, listed under the key that selects the step.
const STEP_KEYS: &[(&str, &[&str])] = &[
	("run", &["run", "pipe", "track", "into"]),
	("loop", &["loop", "delay"]),
	("workdir", &["workdir"]),
	("env", &["env"]),
	("set", &["set"]),
	("on_stop", &["on_stop"]),
];

/// One `[[step]]` of a config file. The variant is picked by which key the
/// table carries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Directive {
	Run {
		run: String,
		#[serde(default)]
		pipe: bool,
		#[serde(default = "default_true")]
		track: bool,
		/// Stores piped output under this attribute.
		#[serde(default)]
		into: Option<String>,
	},
	Loop {
		#[serde(rename = "loop")]
		command: String,
		/// Seconds between runs.
		#[serde(default)]
		delay: Option<u64>,
	},
	Workdir {
		workdir: PathBuf,
	},
	Env {
		env: String,
	},
	Set {
		set: BTreeMap<String, Value>,
	},
	OnStop {
		on_stop: String,
	},
}

fn default_true() -> bool {
	true
}

impl Directive {
	pub fn run(command: impl Into<String>) -> Self {
		Directive::Run {
			run: command.into(),
			pipe: false,
			track: true,
			into: None,
		}
	}

	pub fn apply(&self, service: &mut Service) -> Result<()> {
		match self {
			Directive::Run { run, pipe, track, into } => {
				let spec = RunSpec {
					command: run.clone(),
					pipe: *pipe || into.is_some(),
					track: *track,
				};
				let output = service.run(&spec)?;
				if let (Some(key), Some(output)) = (into, output) {
					service.set_attribute(key.clone(), Value::String(output.trim_end().to_string()))?;
				}
			}
			Directive::Loop { command, delay } => {
				let secs = delay.unwrap_or(service.context().settings.loop_delay_secs);
				service.repeat(command, Duration::from_secs(secs))?;
			}
			Directive::Workdir { workdir } => service.change_workdir(workdir),
			Directive::Env { env } => service.declare_env(env.clone()),
			Directive::Set { set } => {
				for (key, value) in set {
					service.set_attribute(key.clone(), value.clone())?;
				}
			}
			Directive::OnStop { on_stop } => service.on_stop_command(on_stop.clone()),
		}
		Ok(())
	}
}

impl fmt::Display for Directive {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Directive::Run { run, .. } => write!(f, "run `{}`", run),
			Directive::Loop { command, .. } => write!(f, "loop `{}`", command),
			Directive::Workdir { workdir } => write!(f, "workdir {}", workdir.display()),
			Directive::Env { env } => write!(f, "env {}", env),
			Directive::Set { set } => {
				let keys: Vec<&str> = set.keys().map(String::as_str).collect();
				write!(f, "set {}", keys.join(", "))
			}
			Directive::OnStop { on_stop } => write!(f, "on_stop `{}`", on_stop),
		}
	}
}

pub fn parse(content: &str, path: &Path) -> Result<Vec<Directive>> {
	let invalid = |source| Error::InvalidConfig {
		path: path.to_path_buf(),
		source,
	};
	let file: ConfigFile = toml::from_str(content).map_err(invalid)?;
	file.steps
		.into_iter()
		.map(|table| -> Result<Directive> {
			check_keys(&table, path)?;
			toml::Value::Table(table).try_into().map_err(invalid)
		})
		.collect()
}

/// Rejects keys the selected step does not know. A table with no selecting
/// key is left for deserialization to reject.
fn check_keys(table: &toml::Table, path: &Path) -> Result<()> {
	let Some((step, allowed)) = STEP_KEYS.iter().find(|(step, _)| table.contains_key(*step)) else {
		return Ok(());
	};
	match table.keys().find(|key| !allowed.contains(&key.as_str())) {
		Some(key) => Err(Error::UnknownStepKey {
			path: path.to_path_buf(),
			step: step.to_string(),
			key: key.clone(),
		}),
		None => Ok(()),
	}
}

/// Directives from the service's config file, enabled or not. No file, no
/// directives.
pub fn load_directives(service: &Service) -> Result<Vec<Directive>> {
	let Some(path) = service.config_file() else {
		return Ok(Vec::new());
	};
	let content = std::fs::read_to_string(&path)?;
	parse(&content, &path)
}

/// Evaluates the kind's directives in order, each under the usual
/// working-directory and persistence handling.
pub fn evaluate(service: &mut Service) -> Result<()> {
	let directives = service.kind().configuration(service)?;
	for directive in &directives {
		tracing::debug!(service = %service.name, %directive, "applying");
		dispatch::scoped(service, |service| directive.apply(service))
			.map_err(|e| Error::Config(format!("{}: {}", directive, e)))?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn parses_every_step_kind() {
		let content = r#"
[[step]]
workdir = "app"

[[step]]
env = "PORT=8080"

[[step]]
run = "git rev-parse HEAD"
into = "revision"

[[step]]
run = "./server &"
track = false

[[step]]
loop = "./check"
delay = 5

[[step]]
set = { port = 8080, name = "web" }

[[step]]
on_stop = "./cleanup"
"#;
		let steps = parse(content, Path::new("service.toml")).unwrap();
		assert_eq!(steps.len(), 7);
		assert_eq!(steps[0], Directive::Workdir { workdir: "app".into() });
		assert_eq!(steps[1], Directive::Env { env: "PORT=8080".into() });
		assert_eq!(
			steps[2],
			Directive::Run {
				run: "git rev-parse HEAD".into(),
				pipe: false,
				track: true,
				into: Some("revision".into()),
			}
		);
		assert!(matches!(steps[3], Directive::Run { track: false, .. }));
		assert_eq!(
			steps[4],
			Directive::Loop {
				command: "./check".into(),
				delay: Some(5),
			}
		);
		match &steps[5] {
			Directive::Set { set } => assert_eq!(set.get("port"), Some(&json!(8080))),
			other => panic!("expected set, got {:?}", other),
		}
		assert_eq!(steps[6], Directive::OnStop { on_stop: "./cleanup".into() });
	}

	#[test]
	fn empty_file_has_no_steps() {
		assert!(parse("", Path::new("service.toml")).unwrap().is_empty());
	}

	#[test]
	fn template_parses() {
		assert!(parse(TEMPLATE, Path::new("service.toml")).unwrap().is_empty());
	}

	#[test]
	fn unknown_step_is_invalid() {
		let err = parse("[[step]]\nfrobnicate = 1\n", Path::new("service.toml")).unwrap_err();
		assert!(matches!(err, Error::InvalidConfig { .. }));
	}

	#[test]
	fn misspelled_key_is_rejected() {
		let err = parse("[[step]]\nrun = \"./server\"\ntrak = false\n", Path::new("service.toml")).unwrap_err();
		assert!(matches!(err, Error::UnknownStepKey { ref step, ref key, .. } if step == "run" && key == "trak"));
		assert!(err.to_string().contains("unknown key `trak`"));
	}

	#[test]
	fn key_of_another_step_is_rejected() {
		let err = parse("[[step]]\nrun = \"x\"\ndelay = 5\n", Path::new("service.toml")).unwrap_err();
		assert!(matches!(err, Error::UnknownStepKey { ref key, .. } if key == "delay"));

		let err = parse("[[step]]\nrun = \"x\"\nloop = \"y\"\n", Path::new("service.toml")).unwrap_err();
		assert!(matches!(err, Error::UnknownStepKey { ref key, .. } if key == "loop"));
	}

	#[test]
	fn unknown_top_level_table_is_invalid() {
		let err = parse("[[steps]]\nrun = \"x\"\n", Path::new("service.toml")).unwrap_err();
		assert!(matches!(err, Error::InvalidConfig { .. }));
	}
}
