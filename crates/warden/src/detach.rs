use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Re-executes the current binary with `args` as a detached worker.
///
/// The worker runs in its own session, so it has no controlling terminal and
/// survives the invoking shell. Its stdin is null and both output streams
/// append to `log`.
pub fn spawn_self<I, S>(args: I, cwd: &Path, log: &Path) -> io::Result<Child>
where
	I: IntoIterator<Item = S>,
	S: AsRef<OsStr>,
{
	let log = OpenOptions::new().create(true).append(true).open(log)?;

	let mut cmd = Command::new(current_binary());
	cmd.args(args)
		.current_dir(cwd)
		.stdin(Stdio::null())
		.stdout(log.try_clone()?)
		.stderr(log);

	// SAFETY: setsid is async-signal-safe and touches no parent state.
	unsafe {
		cmd.pre_exec(|| {
			nix::unistd::setsid().map(|_| ()).map_err(io::Error::from)
		});
	}

	let child = cmd.spawn()?;
	tracing::debug!(pid = child.id(), "spawned detached worker");
	Ok(child)
}

/// Polls `ready` up to `attempts` times, `interval` apart.
pub fn wait_until<F>(attempts: u32, interval: Duration, mut ready: F) -> bool
where
	F: FnMut() -> bool,
{
	for _ in 0..attempts {
		if ready() {
			return true;
		}
		std::thread::sleep(interval);
	}
	ready()
}

/// Runs `cmd` in the foreground until it exits or the user interrupts it.
///
/// SIGINT is ignored by the caller for the duration, so Ctrl-C ends only the
/// child and the caller carries on. The child gets the default disposition
/// back before exec.
pub fn run_interruptible(cmd: &mut Command) -> io::Result<std::process::ExitStatus> {
	use nix::sys::signal::{signal, SigHandler, Signal};

	// SAFETY: installing SIG_IGN/SIG_DFL replaces no Rust-side handler state.
	unsafe {
		cmd.pre_exec(|| {
			signal(Signal::SIGINT, SigHandler::SigDfl)
				.map(|_| ())
				.map_err(io::Error::from)
		});
	}
	let previous = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }.map_err(io::Error::from)?;
	let status = cmd.status();
	unsafe {
		let _ = signal(Signal::SIGINT, previous);
	}
	status
}

/// The running executable, else whatever `argv[0]` named.
fn current_binary() -> PathBuf {
	std::env::current_exe()
		.ok()
		.or_else(|| std::env::args_os().next().map(PathBuf::from))
		.unwrap_or_else(|| PathBuf::from("daemon"))
}
