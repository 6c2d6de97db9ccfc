//! Runs the `servitor` binary against a throwaway root, with real detached
//! workers.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;
use warden::{detach, process, PidFile};

const POLL: Duration = Duration::from_millis(100);

/// Services root, runtime directory and settings inside one temp directory.
struct Sandbox {
	tmp: TempDir,
}

impl Sandbox {
	fn new() -> Self {
		let tmp = tempfile::tempdir().unwrap();
		std::fs::create_dir_all(tmp.path().join("Services")).unwrap();
		let config = tmp.path().join("config").join("servitor");
		std::fs::create_dir_all(&config).unwrap();
		let settings = format!(
			"runtime_dir = \"{}\"\nstart_timeout_ms = 10000\n",
			tmp.path().join("run").display()
		);
		std::fs::write(config.join("config.toml"), settings).unwrap();
		Self { tmp }
	}

	fn create(&self, name: &str, config: &str) -> PathBuf {
		let dir = self.tmp.path().join("Services").join(name);
		std::fs::create_dir_all(&dir).unwrap();
		std::fs::write(dir.join("service.toml"), config).unwrap();
		dir
	}

	fn runtime(&self, name: &str) -> PathBuf {
		self.tmp.path().join("run").join("Services").join(name)
	}

	fn main_pid(&self, name: &str) -> u32 {
		PidFile::new(self.runtime(name).join("pid")).read().unwrap().pid
	}

	fn servitor(&self, args: &[&str]) -> Output {
		Command::new(env!("CARGO_BIN_EXE_servitor"))
			.args(args)
			.env("SERVICE_ROOT", self.tmp.path().join("Services"))
			.env("XDG_CONFIG_HOME", self.tmp.path().join("config"))
			.env("HOME", self.tmp.path())
			.env_remove("RUST_LOG")
			.output()
			.unwrap()
	}
}

impl Drop for Sandbox {
	fn drop(&mut self) {
		self.servitor(&["stop", "--force", "--all"]);
	}
}

fn stdout(output: &Output) -> String {
	String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
	String::from_utf8_lossy(&output.stderr).into_owned()
}

// --- Start and stop ---

#[test]
#[serial]
fn start_then_stop_cleans_up_everything() {
	let sandbox = Sandbox::new();
	let dir = sandbox.create(
		"web",
		"[[step]]\nrun = \"sleep 60 & echo $! > sleeper.pid\"\n\n[[step]]\non_stop = \"touch stopped\"\n",
	);

	let out = sandbox.servitor(&["start", "web"]);
	assert!(out.status.success(), "{}", stderr(&out));
	assert!(stdout(&out).contains("web: started"));

	let runtime = sandbox.runtime("web");
	assert!(runtime.join("lock").exists());
	assert!(runtime.join("log").exists());
	let worker = sandbox.main_pid("web");
	assert!(process::is_alive(worker));

	let sleeper: u32 = std::fs::read_to_string(dir.join("sleeper.pid"))
		.unwrap()
		.trim()
		.parse()
		.unwrap();
	assert!(process::is_alive(sleeper));
	let ps = sandbox.servitor(&["ps", "--auxiliary", "web"]);
	assert!(stdout(&ps).lines().any(|line| line.trim() == sleeper.to_string()));

	let out = sandbox.servitor(&["stop", "web"]);
	assert!(out.status.success(), "{}", stderr(&out));
	assert!(stdout(&out).contains("web: stopping"));

	assert!(detach::wait_until(100, POLL, || !runtime.join("lock").exists()));
	assert!(!runtime.join("log").exists());
	assert!(!runtime.join("pid").exists());
	assert!(dir.join("stopped").exists());
	assert!(detach::wait_until(50, POLL, || !process::is_alive(worker)));
	assert!(!process::is_alive(sleeper));
}

#[test]
#[serial]
fn starting_twice_reports_already_started() {
	let sandbox = Sandbox::new();
	sandbox.create("web", "[[step]]\nrun = \"true\"\n");

	assert!(sandbox.servitor(&["start", "web"]).status.success());
	let worker = sandbox.main_pid("web");
	let out = sandbox.servitor(&["start", "web"]);
	assert!(out.status.success());
	assert!(stdout(&out).contains("already started"));
	assert_eq!(sandbox.main_pid("web"), worker);
}

#[test]
#[serial]
fn failing_step_reports_start_failure() {
	let sandbox = Sandbox::new();
	sandbox.create("web", "[[step]]\nworkdir = \"missing\"\n\n[[step]]\nrun = \"true\"\n");

	let out = sandbox.servitor(&["start", "web"]);
	assert_eq!(out.status.code(), Some(1));
	assert!(stderr(&out).contains("web failed to start"), "{}", stderr(&out));
	assert!(!sandbox.runtime("web").join("lock").exists());
	assert!(!sandbox.runtime("web").join("pid").exists());
}

#[test]
#[serial]
fn reserved_attribute_reports_start_failure() {
	let sandbox = Sandbox::new();
	sandbox.create("web", "[[step]]\nset = { configured = \"x\" }\n");

	let out = sandbox.servitor(&["start", "web"]);
	assert_eq!(out.status.code(), Some(1));
	assert!(stderr(&out).contains("web failed to start"), "{}", stderr(&out));
}

// --- Restart ---

#[test]
#[serial]
fn restart_replaces_the_main_process() {
	let sandbox = Sandbox::new();
	sandbox.create("web", "[[step]]\nrun = \"true\"\n");

	assert!(sandbox.servitor(&["start", "web"]).status.success());
	let first = sandbox.main_pid("web");

	let out = sandbox.servitor(&["restart", "web"]);
	assert!(out.status.success(), "{}", stderr(&out));
	let printed = stdout(&out);
	assert!(printed.contains("web: stopped"));
	assert!(printed.contains("web: started"));

	let second = sandbox.main_pid("web");
	assert_ne!(first, second);
	assert!(!process::is_alive(first));
	assert!(process::is_alive(second));

	let out = sandbox.servitor(&["stop", "--force", "web"]);
	assert!(stdout(&out).contains("web: stopped"));
	assert!(!sandbox.runtime("web").join("lock").exists());
	assert!(detach::wait_until(50, POLL, || !process::is_alive(second)));
}
