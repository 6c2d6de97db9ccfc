use std::io;
use std::path::{Path, PathBuf};

use crate::process;

/// Contents of a pid file: the pid on the first line, the process start
/// time on the second when the platform exposes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
	pub pid: u32,
	pub started: Option<String>,
}

impl PidRecord {
	pub fn current() -> Self {
		let pid = std::process::id();
		Self {
			pid,
			started: process::start_time(pid),
		}
	}

	fn parse(content: &str) -> Option<Self> {
		let mut lines = content.lines();
		let pid = lines.next()?.trim().parse().ok()?;
		let started = lines
			.next()
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string);
		Some(Self { pid, started })
	}

	fn render(&self) -> String {
		match &self.started {
			Some(started) => format!("{}\n{}\n", self.pid, started),
			None => format!("{}\n", self.pid),
		}
	}

	/// The recorded process is still running and is the same process that
	/// wrote the record, not a recycled pid.
	pub fn is_live(&self) -> bool {
		if !process::is_alive(self.pid) {
			return false;
		}
		match (&self.started, process::start_time(self.pid)) {
			(Some(recorded), Some(actual)) => *recorded == actual,
			_ => true,
		}
	}
}

#[derive(Debug, Clone)]
pub struct PidFile {
	path: PathBuf,
}

impl PidFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Records the calling process.
	pub fn write_current(&self) -> io::Result<PidRecord> {
		let record = PidRecord::current();
		self.write(&record)?;
		Ok(record)
	}

	pub fn write(&self, record: &PidRecord) -> io::Result<()> {
		std::fs::write(&self.path, record.render())
	}

	/// `None` when the file is missing or unreadable.
	pub fn read(&self) -> Option<PidRecord> {
		std::fs::read_to_string(&self.path)
			.ok()
			.and_then(|s| PidRecord::parse(&s))
	}

	/// The recorded pid, only if that process is still the one running.
	pub fn live_pid(&self) -> Option<u32> {
		self.read().filter(PidRecord::is_live).map(|r| r.pid)
	}

	pub fn is_current_process(&self) -> bool {
		self.read().map(|r| r.pid == std::process::id()).unwrap_or(false)
	}

	pub fn remove(&self) -> io::Result<()> {
		match std::fs::remove_file(&self.path) {
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			other => other,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_pid_only() {
		let record = PidRecord::parse("4242\n").unwrap();
		assert_eq!(record, PidRecord { pid: 4242, started: None });
	}

	#[test]
	fn parse_pid_and_start_time() {
		let record = PidRecord::parse("17\nMon Oct 19 18:58:00 2026\n").unwrap();
		assert_eq!(record.pid, 17);
		assert_eq!(record.started.as_deref(), Some("Mon Oct 19 18:58:00 2026"));
	}

	#[test]
	fn parse_rejects_garbage() {
		assert_eq!(PidRecord::parse("not-a-number"), None);
		assert_eq!(PidRecord::parse(""), None);
	}

	#[test]
	fn render_then_parse() {
		let record = PidRecord { pid: 99, started: Some("12345".into()) };
		assert_eq!(PidRecord::parse(&record.render()), Some(record));
	}

	#[test]
	fn mismatched_start_time_is_not_live() {
		let mut record = PidRecord::current();
		assert!(record.is_live());
		record.started = Some("definitely-not-a-start-time".into());
		assert!(!record.is_live());
	}
}
