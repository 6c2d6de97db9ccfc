use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::lifecycle::Status;
use crate::service::Service;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
	Start,
	Stop,
	Restart,
	Status,
	List,
	Log,
	Watch,
	Delete,
	Enable,
	Disable,
	Init,
	Ps,
}

type Handler = fn(&mut Service) -> Result<Outcome>;

const COMMANDS: &[(&str, Command, Handler)] = &[
	("start", Command::Start, Service::start),
	("stop", Command::Stop, Service::stop),
	("restart", Command::Restart, Service::restart),
	("status", Command::Status, Service::report_status),
	("list", Command::List, Service::list),
	("log", Command::Log, Service::log),
	("watch", Command::Watch, Service::watch),
	("delete", Command::Delete, Service::delete),
	("enable", Command::Enable, Service::enable),
	("disable", Command::Disable, Service::disable),
	("init", Command::Init, Service::init),
	("ps", Command::Ps, Service::ps),
];

impl Command {
	/// Case-insensitive lookup by name.
	pub fn lookup(name: &str) -> Result<Command> {
		COMMANDS
			.iter()
			.find(|(n, ..)| n.eq_ignore_ascii_case(name))
			.map(|(_, command, _)| *command)
			.ok_or_else(|| Error::UnknownCommand(name.to_string()))
	}

	pub fn all() -> impl Iterator<Item = Command> {
		COMMANDS.iter().map(|(_, command, _)| *command)
	}

	pub fn name(self) -> &'static str {
		self.entry().0
	}

	/// Commands that may run before the service directory exists.
	pub fn creates_directory(self) -> bool {
		matches!(self, Command::Init)
	}

	fn handler(self) -> Handler {
		self.entry().2
	}

	fn entry(self) -> &'static (&'static str, Command, Handler) {
		COMMANDS
			.iter()
			.find(|(_, command, _)| *command == self)
			.unwrap_or(&COMMANDS[0])
	}
}

impl FromStr for Command {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		Command::lookup(s)
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// What a command produced, for the CLI to print.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
	Done,
	Message(String),
	/// Nothing to do: the service already is where the command would take it.
	AlreadyInState(String),
	Lines(Vec<String>),
	Status { name: String, status: Status },
	Sequence(Vec<Outcome>),
	/// The calling process should exit with this code.
	Exit(i32),
}

impl Outcome {
	pub fn exit_code(&self) -> Option<i32> {
		match self {
			Outcome::Exit(code) => Some(*code),
			Outcome::Sequence(items) => items.iter().find_map(Outcome::exit_code),
			_ => None,
		}
	}
}

/// Runs `command` against `service`.
pub fn dispatch(service: &mut Service, command: Command) -> Result<Outcome> {
	tracing::debug!(service = %service.name, %command, "dispatching");
	scoped(service, command.handler())
}

/// Runs `op` from inside the service directory and saves the state
/// afterwards, whatever the result.
pub fn scoped<T, F>(service: &mut Service, op: F) -> Result<T>
where
	F: FnOnce(&mut Service) -> Result<T>,
{
	let _cwd = WorkingDirectory::enter(&service.directory);
	let result = op(service);
	store::save(service);
	result
}

/// Restores the previous working directory on drop.
struct WorkingDirectory {
	previous: Option<PathBuf>,
}

impl WorkingDirectory {
	fn enter(dir: &Path) -> Self {
		let previous = std::env::current_dir().ok();
		if dir.is_dir() {
			if let Err(e) = std::env::set_current_dir(dir) {
				tracing::debug!(dir = %dir.display(), error = %e, "cannot enter service directory");
			}
		}
		Self { previous }
	}
}

impl Drop for WorkingDirectory {
	fn drop(&mut self) {
		if let Some(previous) = self.previous.take() {
			let _ = std::env::set_current_dir(previous);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lookup_ignores_case() {
		assert_eq!(Command::lookup("START").unwrap(), Command::Start);
		assert_eq!("Ps".parse::<Command>().unwrap(), Command::Ps);
	}

	#[test]
	fn unknown_command_fails_lookup() {
		let err = Command::lookup("frobnicate").unwrap_err();
		assert!(matches!(err, Error::UnknownCommand(name) if name == "frobnicate"));
	}

	#[test]
	fn every_command_has_a_name() {
		for command in Command::all() {
			assert_eq!(Command::lookup(command.name()).unwrap(), command);
		}
		assert_eq!(Command::all().count(), 12);
	}

	#[test]
	fn exit_code_found_in_sequence() {
		let outcome = Outcome::Sequence(vec![Outcome::Done, Outcome::Exit(3)]);
		assert_eq!(outcome.exit_code(), Some(3));
		assert_eq!(Outcome::Done.exit_code(), None);
	}
}
