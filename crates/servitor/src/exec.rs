use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::service::{Service, State};

/// A shell command plus how to treat its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
	pub command: String,
	/// Capture stdout and hand it back; stderr is discarded.
	pub pipe: bool,
	/// Log a `Command:` marker and keep the output. Off, output is discarded.
	pub track: bool,
}

impl RunSpec {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			pipe: false,
			track: true,
		}
	}

	/// Runs nothing; still triggers the one-time setup.
	pub fn noop() -> Self {
		Self::new("")
	}

	pub fn piped(mut self) -> Self {
		self.pipe = true;
		self
	}

	pub fn untracked(mut self) -> Self {
		self.track = false;
		self
	}
}

/// Everything needed to run commands for a service, detached from the
/// service itself so loops can carry a copy into their own thread.
#[derive(Debug, Clone)]
pub struct Runner {
	pub name: String,
	pub workdir: PathBuf,
	pub env: Vec<String>,
	/// Output destination in detached mode; `None` inherits stdout.
	pub log: Option<PathBuf>,
}

impl Runner {
	/// Runs `spec` to completion. A failing command is logged, not returned
	/// as an error; only failing to launch it is.
	pub fn run(&self, spec: &RunSpec) -> Result<Option<String>> {
		let command = spec.command.trim();
		if command.is_empty() {
			return Ok(None);
		}
		if spec.track {
			self.mark(command)?;
		}

		let mut cmd = Command::new("sh");
		cmd.arg("-c").arg(command).current_dir(&self.workdir).stdin(Stdio::null());
		for declaration in &self.env {
			if let Some((key, value)) = declaration.split_once('=') {
				cmd.env(key.trim(), value);
			}
		}

		if spec.pipe {
			cmd.stdout(Stdio::piped()).stderr(Stdio::null());
			let output = cmd.output()?;
			self.report(command, output.status);
			return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
		}

		if !spec.track {
			cmd.stdout(Stdio::null()).stderr(Stdio::null());
		} else if let Some(log) = &self.log {
			let file = append(log)?;
			cmd.stdout(file.try_clone()?).stderr(file);
		}
		let status = cmd.status()?;
		self.report(command, status);
		Ok(None)
	}

	fn mark(&self, command: &str) -> io::Result<()> {
		let line = format!("Command: {}\n", command);
		match &self.log {
			Some(log) => append(log)?.write_all(line.as_bytes()),
			None => {
				let mut out = io::stdout().lock();
				out.write_all(line.as_bytes())?;
				out.flush()
			}
		}
	}

	fn report(&self, command: &str, status: ExitStatus) {
		if !status.success() {
			tracing::warn!(service = %self.name, command, %status, "command failed");
		}
	}
}

fn append(path: &Path) -> io::Result<File> {
	OpenOptions::new().create(true).append(true).open(path)
}

impl Service {
	pub fn runner(&self) -> Runner {
		Runner {
			name: self.name.clone(),
			workdir: self.workdir(),
			env: self.state.env.clone(),
			log: self.detached().then(|| self.logfile.clone()),
		}
	}

	/// Runs a command in the service's working directory and environment.
	/// The first call of a start runs the kind's setup beforehand.
	pub fn run(&mut self, spec: &RunSpec) -> Result<Option<String>> {
		if !self.state.setup {
			self.kind().setup(self)?;
			self.state.setup = true;
		}
		self.runner().run(spec)
	}

	/// Runs `command` now, then again every `delay` on a background thread
	/// for as long as the process lives. The loop keeps the working
	/// directory and environment in effect at the time of the call.
	pub fn repeat(&mut self, command: &str, delay: Duration) -> Result<()> {
		let spec = RunSpec::new(command);
		self.run(&spec)?;
		let runner = self.runner();
		std::thread::Builder::new()
			.name(format!("loop:{}", self.name))
			.spawn(move || loop {
				std::thread::sleep(delay);
				if let Err(e) = runner.run(&spec) {
					tracing::warn!(service = %runner.name, error = %e, "loop command failed to run");
				}
			})?;
		Ok(())
	}

	/// Moves the working directory. Relative paths resolve against the
	/// current one, absolute paths replace it.
	pub fn change_workdir(&mut self, path: impl AsRef<Path>) {
		let next = self.workdir().join(path);
		let relative = next.strip_prefix(&self.directory).map(Path::to_path_buf).unwrap_or(next);
		self.state.workdir = Some(relative);
	}

	/// Adds a `KEY=value` declaration for subsequent commands.
	pub fn declare_env(&mut self, declaration: impl Into<String>) {
		self.state.env.push(declaration.into());
	}

	/// Declares a persisted attribute. The names of the built-in state
	/// fields are refused.
	pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
		let key = key.into();
		if State::is_reserved(&key) {
			return Err(Error::Config(format!("`{}` is a reserved attribute", key)));
		}
		self.state.attributes.insert(key, value);
		Ok(())
	}

	/// Registers a shell command to run when the main process stops.
	pub fn on_stop_command(&mut self, command: impl Into<String>) {
		let runner = self.runner();
		let spec = RunSpec::new(command);
		self.on_exit(move || {
			if let Err(e) = runner.run(&spec) {
				tracing::warn!(service = %runner.name, error = %e, "stop command failed to run");
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn runner(dir: &Path, log: Option<PathBuf>) -> Runner {
		Runner {
			name: "test".into(),
			workdir: dir.to_path_buf(),
			env: vec!["GREETING=hello there".into()],
			log,
		}
	}

	#[test]
	fn piped_output_is_returned() {
		let tmp = tempfile::tempdir().unwrap();
		let out = runner(tmp.path(), None)
			.run(&RunSpec::new("echo $GREETING").piped())
			.unwrap();
		assert_eq!(out.as_deref(), Some("hello there\n"));
	}

	#[test]
	fn empty_command_runs_nothing() {
		let tmp = tempfile::tempdir().unwrap();
		let log = tmp.path().join("log");
		let out = runner(tmp.path(), Some(log.clone())).run(&RunSpec::noop()).unwrap();
		assert_eq!(out, None);
		assert!(!log.exists());
	}

	#[test]
	fn tracked_output_goes_to_log() {
		let tmp = tempfile::tempdir().unwrap();
		let log = tmp.path().join("log");
		runner(tmp.path(), Some(log.clone()))
			.run(&RunSpec::new("echo out; echo err >&2"))
			.unwrap();
		let content = std::fs::read_to_string(&log).unwrap();
		assert!(content.starts_with("Command: echo out; echo err >&2\n"));
		assert!(content.contains("out\n"));
		assert!(content.contains("err\n"));
	}

	#[test]
	fn untracked_output_is_discarded() {
		let tmp = tempfile::tempdir().unwrap();
		let log = tmp.path().join("log");
		runner(tmp.path(), Some(log.clone()))
			.run(&RunSpec::new("echo quiet").untracked())
			.unwrap();
		assert!(!log.exists());
	}

	#[test]
	fn failing_command_is_not_an_error() {
		let tmp = tempfile::tempdir().unwrap();
		assert!(runner(tmp.path(), None).run(&RunSpec::new("exit 3").untracked()).is_ok());
	}

	#[test]
	fn commands_run_in_workdir() {
		let tmp = tempfile::tempdir().unwrap();
		std::fs::write(tmp.path().join("marker"), "").unwrap();
		let out = runner(tmp.path(), None).run(&RunSpec::new("ls").piped()).unwrap();
		assert_eq!(out.as_deref(), Some("marker\n"));
	}
}
