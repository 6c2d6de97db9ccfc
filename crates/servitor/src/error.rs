use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// The service directory does not exist.
	#[error("{kind} {name} doesn't exist")]
	NotFound { kind: String, name: String },

	#[error("command {0} doesn't exist")]
	UnknownCommand(String),

	#[error("no command specified")]
	NoCommand,

	#[error("no {0}s specified")]
	NoTargets(String),

	/// A directive failed while the configuration was being evaluated.
	#[error("configuration failed: {0}")]
	Config(String),

	#[error("invalid configuration {}: {source}", path.display())]
	InvalidConfig {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid configuration {}: unknown key `{key}` in {step} step", path.display())]
	UnknownStepKey { path: PathBuf, step: String, key: String },

	#[error("configuration panicked: {0}")]
	Panicked(String),

	#[error("{name} failed to start, see {}", log.display())]
	StartFailed { name: String, log: PathBuf },

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
