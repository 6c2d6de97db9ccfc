use std::collections::BTreeSet;

use warden::process;

use crate::service::Service;

/// The live main process, if the service is started.
pub fn main_pids(service: &Service) -> Vec<u32> {
	if !service.is_started() {
		return Vec::new();
	}
	service.pid_file().live_pid().into_iter().collect()
}

pub fn auxiliary_pids(service: &Service) -> Vec<u32> {
	service.kind().auxiliary_pids(service)
}

/// True when the calling process is the one recorded in the pid file.
pub fn is_main_process(service: &Service) -> bool {
	service.pid_file().is_current_process()
}

/// Terminates auxiliary processes until a pass finds none. Helpers may
/// replace themselves while being stopped, hence the loop. Returns how many
/// were terminated.
pub fn drain_auxiliary(service: &Service) -> usize {
	let me = std::process::id();
	let mut attempted = BTreeSet::new();
	loop {
		let pids: Vec<u32> = auxiliary_pids(service)
			.into_iter()
			.filter(|pid| *pid != me)
			.collect();
		if pids.is_empty() {
			return attempted.len();
		}
		if pids.iter().all(|pid| attempted.contains(pid)) {
			tracing::warn!(service = %service.name, ?pids, "auxiliary processes survived termination");
			return attempted.len();
		}
		for pid in pids {
			tracing::info!(service = %service.name, pid, "terminating auxiliary process");
			process::terminate(pid);
			attempted.insert(pid);
		}
	}
}
