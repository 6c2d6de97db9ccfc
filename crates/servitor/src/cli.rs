use std::collections::BTreeSet;
use std::process::ExitCode;

use owo_colors::OwoColorize;

use crate::context::Context;
use crate::dispatch::{self, Command, Outcome};
use crate::error::{Error, Result};
use crate::lifecycle::{Phase, Status};
use crate::service::{Flags, Service};

/// A parsed command line: `<command> [--flag[=value]]... [name]...`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
	pub command: String,
	pub flags: Flags,
	pub names: BTreeSet<String>,
}

pub fn parse(args: &[String]) -> Result<Invocation> {
	let (command, rest) = args.split_first().ok_or(Error::NoCommand)?;
	let (flags, names) = parse_arguments(rest);
	Ok(Invocation {
		command: command.clone(),
		flags,
		names,
	})
}

/// Leading `--` tokens are flags, the last occurrence of a key winning.
/// Everything from the first other token on is a name.
pub fn parse_arguments(tokens: &[String]) -> (Flags, BTreeSet<String>) {
	let split = tokens
		.iter()
		.position(|t| !t.starts_with("--"))
		.unwrap_or(tokens.len());
	let flags = tokens[..split].iter().map(|t| parse_flag(t)).collect();
	let names = tokens[split..].iter().cloned().collect();
	(flags, names)
}

pub fn parse_flag(token: &str) -> (String, String) {
	let body = token.strip_prefix("--").unwrap_or(token);
	match body.split_once('=') {
		Some((key, value)) => (key.to_string(), value.to_string()),
		None => (body.to_string(), String::new()),
	}
}

pub fn render_flag(key: &str, value: &str) -> String {
	if value.is_empty() {
		format!("--{}", key)
	} else {
		format!("--{}={}", key, value)
	}
}

/// Flags that select services by status instead of by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
	Started,
	Stopped,
	Enabled,
	Disabled,
	All,
}

impl Filter {
	pub const ALL: [Filter; 5] = [
		Filter::Started,
		Filter::Stopped,
		Filter::Enabled,
		Filter::Disabled,
		Filter::All,
	];

	pub fn flag(self) -> &'static str {
		match self {
			Filter::Started => "started",
			Filter::Stopped => "stopped",
			Filter::Enabled => "enabled",
			Filter::Disabled => "disabled",
			Filter::All => "all",
		}
	}

	pub fn matches(self, status: &Status) -> bool {
		match self {
			Filter::Started => status.started,
			Filter::Stopped => !status.started,
			Filter::Enabled => status.enabled,
			Filter::Disabled => !status.enabled,
			Filter::All => true,
		}
	}
}

/// Takes filter flags out of `flags` and adds every service matching any of
/// them to `names`.
pub fn resolve_targets(context: &Context, flags: &mut Flags, mut names: BTreeSet<String>) -> Result<BTreeSet<String>> {
	let filters: Vec<Filter> = Filter::ALL
		.into_iter()
		.filter(|f| flags.remove(f.flag()).is_some())
		.collect();
	if !filters.is_empty() {
		for name in context.service_names() {
			let service = match Service::open(context, &name, Flags::new()) {
				Ok(service) => service,
				Err(e) => {
					tracing::debug!(service = %name, error = %e, "skipping");
					continue;
				}
			};
			let status = service.status();
			if filters.iter().any(|f| f.matches(&status)) {
				names.insert(name);
			}
		}
	}
	if names.is_empty() {
		return Err(Error::NoTargets(context.type_name().to_lowercase()));
	}
	Ok(names)
}

/// Runs a full command line. Failures for one service are reported and the
/// remaining services still run.
pub fn run(context: &Context, args: &[String]) -> ExitCode {
	match execute(context, args) {
		Ok(true) => ExitCode::SUCCESS,
		Ok(false) => ExitCode::FAILURE,
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			ExitCode::FAILURE
		}
	}
}

fn execute(context: &Context, args: &[String]) -> Result<bool> {
	let invocation = parse(args)?;
	let command = Command::lookup(&invocation.command)?;
	let mut flags = invocation.flags;
	let names = resolve_targets(context, &mut flags, invocation.names)?;
	let width = names.iter().map(|n| n.len()).max().unwrap_or(0);

	let mut ok = true;
	for name in &names {
		let result = Service::open_with(context, name, flags.clone(), !command.creates_directory())
			.and_then(|mut service| dispatch::dispatch(&mut service, command));
		match result {
			Ok(outcome) => {
				print_outcome(&outcome, width);
				if let Some(code) = outcome.exit_code() {
					std::process::exit(code);
				}
			}
			Err(e) => {
				eprintln!("{} {}: {}", "error:".red().bold(), name, e);
				ok = false;
			}
		}
	}
	Ok(ok)
}

pub fn print_outcome(outcome: &Outcome, width: usize) {
	match outcome {
		Outcome::Done | Outcome::Exit(_) => {}
		Outcome::Message(message) => println!("{}", message),
		Outcome::AlreadyInState(message) => println!("{}", message.dimmed()),
		Outcome::Lines(lines) => {
			for line in lines {
				println!("{}", line);
			}
		}
		Outcome::Status { name, status } => print_status_line(name, status, width),
		Outcome::Sequence(items) => {
			for item in items {
				print_outcome(item, width);
			}
		}
	}
}

fn print_status_line(name: &str, status: &Status, width: usize) {
	let [started, enabled] = status.labels();
	let circle = match status.phase {
		Phase::Running => "●".green().to_string(),
		Phase::Starting | Phase::Stopping => "●".yellow().to_string(),
		Phase::Stopped => "●".red().to_string(),
	};
	let started = if status.started { started.green().to_string() } else { started.red().to_string() };
	let enabled = if status.enabled { enabled.to_string() } else { enabled.dimmed().to_string() };
	println!(
		"{} {:<width$} {:<8} {:<8} {}",
		circle,
		name,
		started,
		enabled,
		status.phase.label().dimmed(),
		width = width
	);
}
