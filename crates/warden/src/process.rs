use std::process::Command;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

/// How often [`terminate`] checks whether a signalled process has gone.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn to_pid(pid: u32) -> Option<Pid> {
	// 0 and negative values address process groups, never a single process.
	i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

/// True if a process with this id exists, zombies included.
pub fn exists(pid: u32) -> bool {
	let Some(pid) = to_pid(pid) else {
		return false;
	};
	match kill(pid, None) {
		Ok(()) => true,
		Err(Errno::EPERM) => true,
		Err(_) => false,
	}
}

/// True if the process has exited but not yet been reaped by its parent.
pub fn is_zombie(pid: u32) -> bool {
	if let Some(fields) = proc_stat(pid) {
		return fields.first().map(|s| s.as_str()) == Some("Z");
	}
	ps_field(pid, "stat").map(|s| s.starts_with('Z')).unwrap_or(false)
}

/// Running and not a zombie.
pub fn is_alive(pid: u32) -> bool {
	exists(pid) && !is_zombie(pid)
}

/// Opaque token identifying when `pid` was started, used to tell a recycled
/// pid apart from the process that originally owned it.
pub fn start_time(pid: u32) -> Option<String> {
	if let Some(fields) = proc_stat(pid) {
		// field 22 of /proc/<pid>/stat; `fields` starts at field 3
		return fields.get(19).cloned();
	}
	ps_field(pid, "lstart")
}

/// Sends `signal` to `pid`. A vanished process is not an error.
pub fn signal(pid: u32, signal: Signal) -> std::io::Result<()> {
	let Some(target) = to_pid(pid) else {
		return Ok(());
	};
	match kill(target, signal) {
		Ok(()) | Err(Errno::ESRCH) => Ok(()),
		Err(e) => Err(e.into()),
	}
}

/// Gracefully terminates `pid`: SIGTERM, then wait until it is gone.
///
/// Waits without a timeout. Children are reaped along the way and a process
/// that is already a zombie counts as exited, so re-parented or unreaped
/// processes cannot stall the caller. Never signals the calling process.
pub fn terminate(pid: u32) {
	let Some(target) = to_pid(pid) else {
		return;
	};
	if pid == std::process::id() || !exists(pid) {
		return;
	}
	match kill(target, Signal::SIGTERM) {
		Ok(()) => {}
		Err(Errno::ESRCH) => return,
		Err(e) => {
			tracing::warn!(pid, error = %e, "failed to signal process");
			return;
		}
	}
	tracing::debug!(pid, "sent SIGTERM");
	wait_for_exit(pid);
}

/// Blocks until `pid` no longer runs, polling every [`POLL_INTERVAL`].
pub fn wait_for_exit(pid: u32) {
	loop {
		reap(pid);
		if !is_alive(pid) {
			return;
		}
		std::thread::sleep(POLL_INTERVAL);
	}
}

fn reap(pid: u32) {
	let Some(target) = to_pid(pid) else {
		return;
	};
	match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
		Ok(_) | Err(Errno::ECHILD) => {}
		Err(e) => tracing::debug!(pid, error = %e, "waitpid failed"),
	}
}

/// Live processes in session `sid`, excluding the session leader itself.
pub fn session_members(sid: u32) -> Vec<u32> {
	let mut members: Vec<u32> = match std::fs::read_dir("/proc") {
		Ok(entries) => entries
			.flatten()
			.filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
			.filter(|pid| {
				proc_stat(*pid)
					.and_then(|fields| fields.get(3).and_then(|s| s.parse::<u32>().ok()))
					== Some(sid)
			})
			.collect(),
		Err(_) => ps_sessions()
			.into_iter()
			.filter(|(_, sess)| *sess == sid)
			.map(|(pid, _)| pid)
			.collect(),
	};
	members.retain(|pid| *pid != sid && is_alive(*pid));
	members.sort_unstable();
	members
}

fn ps_sessions() -> Vec<(u32, u32)> {
	let output = match Command::new("ps").args(["-A", "-o", "pid=", "-o", "sess="]).output() {
		Ok(o) => o,
		Err(_) => return Vec::new(),
	};
	String::from_utf8_lossy(&output.stdout)
		.lines()
		.filter_map(|line| {
			let mut parts = line.split_whitespace();
			let pid = parts.next()?.parse().ok()?;
			let sess = parts.next()?.parse().ok()?;
			Some((pid, sess))
		})
		.collect()
}

/// Fields of `/proc/<pid>/stat` after the command name, starting with the
/// state letter.
fn proc_stat(pid: u32) -> Option<Vec<String>> {
	let content = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
	let rest = &content[content.rfind(')')? + 1..];
	Some(rest.split_whitespace().map(str::to_string).collect())
}

fn ps_field(pid: u32, field: &str) -> Option<String> {
	let output = Command::new("ps")
		.args(["-o", &format!("{}=", field), "-p", &pid.to_string()])
		.output()
		.ok()?;
	let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
	if value.is_empty() {
		None
	} else {
		Some(value)
	}
}
