use std::any::Any;
use std::fs::{self, File};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process::Command as Process;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use warden::{detach, process};

use crate::cli::render_flag;
use crate::config;
use crate::dispatch::{self, Command, Outcome};
use crate::error::{Error, Result};
use crate::exec::RunSpec;
use crate::service::{remove_if_exists, Service, AUXILIARY, FORCE, FOREGROUND, MAIN, NOW};
use crate::store;
use crate::tracker;

const START_POLL: Duration = Duration::from_millis(100);

/// Where a started service is in its lifecycle, read from the lockfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Stopped,
	Starting,
	Running,
	Stopping,
}

impl Phase {
	pub fn label(self) -> &'static str {
		match self {
			Phase::Stopped => "stopped",
			Phase::Starting => "starting",
			Phase::Running => "running",
			Phase::Stopping => "stopping",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
	pub started: bool,
	pub enabled: bool,
	pub phase: Phase,
}

impl Status {
	/// `["Started" | "Stopped", "Enabled" | "Disabled"]`
	pub fn labels(&self) -> [&'static str; 2] {
		[
			if self.started { "Started" } else { "Stopped" },
			if self.enabled { "Enabled" } else { "Disabled" },
		]
	}
}

impl Service {
	pub fn status(&self) -> Status {
		let started = self.is_started();
		let phase = if !started {
			Phase::Stopped
		} else {
			let map = store::read_map(&self.lockfile).unwrap_or_default();
			let flag = |key: &str| map.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
			if flag("stopping") {
				Phase::Stopping
			} else if flag("configured") {
				Phase::Running
			} else {
				Phase::Starting
			}
		};
		Status {
			started,
			enabled: self.is_enabled(),
			phase,
		}
	}

	pub fn report_status(&mut self) -> Result<Outcome> {
		Ok(Outcome::Status {
			name: self.name.clone(),
			status: self.status(),
		})
	}

	/// Prints the name; used with filters to list services.
	pub fn list(&mut self) -> Result<Outcome> {
		Ok(Outcome::Lines(vec![self.name.clone()]))
	}

	// ── Start ────────────────────────────────────────────────────────────────

	pub fn start(&mut self) -> Result<Outcome> {
		if self.is_started() {
			return Ok(self.already("started"));
		}
		if !self.detached() {
			return self.start_inline();
		}
		if self.has_flag(FOREGROUND) {
			return self.run_worker();
		}
		self.spawn_worker()
	}

	/// Evaluates the configuration, then runs the no-op command so the kind's
	/// setup happens even for configurations without commands.
	pub fn configure(&mut self) -> Result<()> {
		config::evaluate(self)?;
		dispatch::scoped(self, |service| service.run(&RunSpec::noop()).map(|_| ()))?;
		self.state.configured = true;
		store::save(self);
		tracing::info!(service = %self.name, "configuration finished");
		Ok(())
	}

	fn start_inline(&mut self) -> Result<Outcome> {
		if let Err(e) = self.configure() {
			tracing::error!(service = %self.name, error = %e, "configuration failed");
			self.stop()?;
			return Err(e);
		}
		Ok(Outcome::Done)
	}

	/// Re-executes this binary as the service's main process and waits for
	/// it to claim the lockfile.
	fn spawn_worker(&mut self) -> Result<Outcome> {
		fs::create_dir_all(&self.runtime_dir)?;
		let mut args = vec!["start".to_string(), render_flag(FOREGROUND, "")];
		args.extend(
			self.flags
				.iter()
				.filter(|(key, _)| key.as_str() != FOREGROUND)
				.map(|(key, value)| render_flag(key, value)),
		);
		args.push(self.name.clone());

		let mut child = detach::spawn_self(&args, &self.directory, &self.logfile)?;
		tracing::debug!(service = %self.name, pid = child.id(), "spawned worker");

		// the worker claims the lockfile before configuring, so wait for the
		// configuration to finish or the worker to exit
		let attempts = (self.context().settings.start_timeout_ms / START_POLL.as_millis() as u64).max(1) as u32;
		let mut exited = None;
		detach::wait_until(attempts, START_POLL, || {
			if self.status().phase == Phase::Running {
				return true;
			}
			exited = child.try_wait().ok().flatten();
			exited.is_some()
		});

		match (self.status().phase, exited) {
			(Phase::Running, _) => Ok(Outcome::Message(format!("{}: started", self.name))),
			(_, Some(status)) if !status.success() => Err(Error::StartFailed {
				name: self.name.clone(),
				log: self.logfile.clone(),
			}),
			(_, Some(_)) => Ok(Outcome::Message(format!("{}: exited", self.name))),
			(_, None) => Ok(Outcome::Message(format!("{}: starting", self.name))),
		}
	}

	/// Body of the main process: claim the runtime files, configure, then
	/// wait for a termination signal.
	fn run_worker(&mut self) -> Result<Outcome> {
		install_panic_hook();
		let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
		let outcome = runtime.block_on(self.supervise());
		runtime.shutdown_background();
		outcome
	}

	fn claim_runtime_files(&self) -> Result<()> {
		fs::create_dir_all(&self.runtime_dir)?;
		File::create(&self.logfile)?;
		self.pid_file().write_current()?;
		fs::write(&self.lockfile, "{}")?;
		tracing::info!(service = %self.name, pid = std::process::id(), "started");
		Ok(())
	}

	async fn supervise(&mut self) -> Result<Outcome> {
		// handlers exist before the lockfile tells anyone to signal us
		let mut sigterm = signal(SignalKind::terminate())?;
		let mut sigint = signal(SignalKind::interrupt())?;
		self.claim_runtime_files()?;

		let (tx, rx) = oneshot::channel();
		let mut worker = self.clone();
		std::thread::Builder::new()
			.name(format!("configure:{}", self.name))
			.spawn(move || {
				let result = panic::catch_unwind(AssertUnwindSafe(|| worker.configure()))
					.unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))));
				let _ = tx.send((result, worker));
			})?;

		let configured = tokio::select! {
			_ = sigterm.recv() => None,
			_ = sigint.recv() => None,
			received = rx => Some(received),
		};
		match configured {
			Some(Ok((Ok(()), worker))) => {
				self.state = worker.state;
				self.snapshot = worker.snapshot;
				tokio::select! {
					_ = sigterm.recv() => {}
					_ = sigint.recv() => {}
				}
			}
			Some(Ok((Err(e), _))) => {
				tracing::error!(service = %self.name, error = %e, "configuration failed");
				self.stop()?;
				return Ok(Outcome::Exit(1));
			}
			Some(Err(_)) => {
				tracing::error!(service = %self.name, "configuration thread vanished");
				self.stop()?;
				return Ok(Outcome::Exit(1));
			}
			None => {}
		}
		tracing::info!(service = %self.name, "received termination signal");
		self.stop()
	}

	// ── Stop ─────────────────────────────────────────────────────────────────

	pub fn stop(&mut self) -> Result<Outcome> {
		if !self.is_started() {
			return Ok(self.already("stopped"));
		}
		let owner = !self.detached() || tracker::is_main_process(self);
		if !owner {
			let pids = tracker::main_pids(self);
			if pids.is_empty() {
				tracing::debug!(service = %self.name, "no live main process, clearing stale state");
			} else if !self.has_flag(FORCE) {
				for pid in &pids {
					process::signal(*pid, Signal::SIGTERM)?;
				}
				tracing::info!(service = %self.name, ?pids, "asked main process to stop");
				return Ok(Outcome::Message(format!("{}: stopping", self.name)));
			} else {
				for pid in pids {
					tracing::info!(service = %self.name, pid, "terminating main process");
					process::terminate(pid);
				}
			}
		} else if self.detached() {
			self.state.stopping = true;
			store::save(self);
		}

		tracker::drain_auxiliary(self);
		if owner {
			self.exit_commands.unwind();
		}
		for path in [&self.logfile, &self.lockfile, &self.pidfile] {
			remove_if_exists(path)?;
		}

		if owner && self.detached() {
			tracing::info!(service = %self.name, "stopped");
			return Ok(Outcome::Exit(0));
		}
		self.flags.remove(FORCE);
		Ok(Outcome::Message(format!("{}: stopped", self.name)))
	}

	/// Stops, waiting for the old main process, then starts from a fresh
	/// entity so nothing of the old run carries over.
	pub fn restart(&mut self) -> Result<Outcome> {
		let stopped = self.stop_and_wait()?;
		if stopped.exit_code().is_some() {
			return Ok(stopped);
		}
		let mut flags = self.flags.clone();
		flags.remove(FORCE);
		let mut fresh = Service::open(self.context(), &self.name, flags)?;
		let started = dispatch::dispatch(&mut fresh, Command::Start)?;
		Ok(Outcome::Sequence(vec![stopped, started]))
	}

	pub fn delete(&mut self) -> Result<Outcome> {
		let stopped = self.stop_and_wait()?;
		if stopped.exit_code().is_some() {
			return Ok(stopped);
		}
		match fs::remove_dir_all(&self.directory) {
			Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
			_ => {}
		}
		if let Err(e) = fs::remove_dir_all(&self.runtime_dir) {
			tracing::debug!(service = %self.name, error = %e, "cannot remove runtime directory");
		}
		Ok(Outcome::Message(format!("{}: deleted", self.name)))
	}

	fn stop_and_wait(&mut self) -> Result<Outcome> {
		let requested = self.flags.insert(FORCE.to_string(), String::new());
		let outcome = self.stop();
		if let Some(value) = requested {
			self.flags.insert(FORCE.to_string(), value);
		} else {
			self.flags.remove(FORCE);
		}
		outcome
	}

	// ── Enable / disable ─────────────────────────────────────────────────────

	pub fn enable(&mut self) -> Result<Outcome> {
		if self.is_enabled() {
			return Ok(self.already("enabled"));
		}
		fs::rename(self.disabled_config(), self.enabled_config())?;
		let enabled = Outcome::Message(format!("{}: enabled", self.name));
		if !self.has_flag(NOW) {
			return Ok(enabled);
		}
		let started = self.start()?;
		Ok(Outcome::Sequence(vec![enabled, started]))
	}

	pub fn disable(&mut self) -> Result<Outcome> {
		if !self.is_enabled() {
			return Ok(self.already("disabled"));
		}
		fs::rename(self.enabled_config(), self.disabled_config())?;
		let disabled = Outcome::Message(format!("{}: disabled", self.name));
		if !self.has_flag(NOW) {
			return Ok(disabled);
		}
		let stopped = self.stop()?;
		Ok(Outcome::Sequence(vec![disabled, stopped]))
	}

	/// Creates the service directory with a commented config file.
	pub fn init(&mut self) -> Result<Outcome> {
		if self.config_file().is_some() {
			return Ok(self.already("initialized"));
		}
		fs::create_dir_all(&self.directory)?;
		let path = self.enabled_config();
		fs::write(&path, self.kind().template())?;
		Ok(Outcome::Message(format!("{}: created {}", self.name, path.display())))
	}

	// ── Inspection ───────────────────────────────────────────────────────────

	/// Pids of the service, `--main` or `--auxiliary` only when asked.
	pub fn ps(&mut self) -> Result<Outcome> {
		let main = self.has_flag(MAIN);
		let auxiliary = self.has_flag(AUXILIARY);
		let lines = match (main, auxiliary) {
			(true, false) => tracker::main_pids(self).iter().map(u32::to_string).collect(),
			(false, true) => tracker::auxiliary_pids(self).iter().map(u32::to_string).collect(),
			_ => {
				let mut lines: Vec<String> = tracker::main_pids(self)
					.iter()
					.map(|pid| format!("{} main", pid))
					.collect();
				lines.extend(tracker::auxiliary_pids(self).iter().map(|pid| format!("{} auxiliary", pid)));
				lines
			}
		};
		Ok(Outcome::Lines(lines))
	}

	pub fn log(&mut self) -> Result<Outcome> {
		let mut file = match File::open(&self.logfile) {
			Ok(file) => file,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				return Ok(Outcome::AlreadyInState(format!("{}: no log", self.name)))
			}
			Err(e) => return Err(e.into()),
		};
		io::copy(&mut file, &mut io::stdout().lock())?;
		Ok(Outcome::Done)
	}

	/// Follows the log until interrupted.
	pub fn watch(&mut self) -> Result<Outcome> {
		if !self.logfile.exists() {
			return Ok(Outcome::AlreadyInState(format!("{}: no log", self.name)));
		}
		detach::run_interruptible(Process::new("tail").arg("-F").arg(&self.logfile))?;
		Ok(Outcome::Done)
	}

	fn already(&self, state: &str) -> Outcome {
		Outcome::AlreadyInState(format!("{} {} is already {}", self.title(), self.name, state))
	}
}

fn install_panic_hook() {
	panic::set_hook(Box::new(|info| {
		let backtrace = std::backtrace::Backtrace::force_capture();
		tracing::error!("{}\n{}", info, backtrace);
	}));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn panic_message_reads_strings() {
		let payload: Box<dyn Any + Send> = Box::new("boom");
		assert_eq!(panic_message(payload.as_ref()), "boom");
		let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
		assert_eq!(panic_message(payload.as_ref()), "bang");
		let payload: Box<dyn Any + Send> = Box::new(7);
		assert_eq!(panic_message(payload.as_ref()), "unknown panic");
	}

	#[test]
	fn status_labels() {
		let status = Status {
			started: true,
			enabled: false,
			phase: Phase::Running,
		};
		assert_eq!(status.labels(), ["Started", "Disabled"]);
		assert_eq!(status.phase.label(), "running");
	}
}
