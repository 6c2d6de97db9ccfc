use warden::process;

use crate::config::{self, Directive};
use crate::error::Result;
use crate::service::Service;

/// A family of services sharing a root directory, a config file name and a
/// way of turning that config into directives.
///
/// Implementations stay stateless; anything per service belongs in
/// [`Service::state`].
pub trait ServiceKind: Send + Sync {
	/// Lower-case name, e.g. `service`. Drives the root variable
	/// (`SERVICE_ROOT`) and the directory names (`Services`).
	fn type_name(&self) -> &str;

	/// File that marks a service as enabled. Prefixed with a dot, it marks
	/// the service disabled.
	fn config_file_name(&self) -> String {
		format!("{}.toml", self.type_name().to_lowercase())
	}

	/// Directives to evaluate, in order, when the service starts.
	fn configuration(&self, service: &Service) -> Result<Vec<Directive>> {
		config::load_directives(service)
	}

	/// Helper processes that belong to the service but are not its main
	/// process.
	fn auxiliary_pids(&self, _service: &Service) -> Vec<u32> {
		Vec::new()
	}

	/// Runs once, right before the first command of a start.
	fn setup(&self, _service: &mut Service) -> Result<()> {
		Ok(())
	}

	/// Initial contents of the config file written by `init`.
	fn template(&self) -> String {
		config::TEMPLATE.to_string()
	}
}

/// The built-in kind: a directory with a `service.toml` of steps.
///
/// Its auxiliary processes are whatever is left in the worker's session,
/// i.e. anything the steps started in the background.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericService;

impl ServiceKind for GenericService {
	fn type_name(&self) -> &str {
		"service"
	}

	fn auxiliary_pids(&self, service: &Service) -> Vec<u32> {
		let Some(record) = service.pid_file().read() else {
			return Vec::new();
		};
		// a recycled pid leads some unrelated session
		if process::exists(record.pid) && !record.is_live() {
			return Vec::new();
		}
		process::session_members(record.pid)
	}
}
