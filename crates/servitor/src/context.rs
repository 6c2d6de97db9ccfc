use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use warden::paths;

use crate::kind::ServiceKind;
use crate::settings::Settings;

/// Everything a service needs to know about the installation it lives in.
///
/// Built once by the binary and handed to every [`crate::Service`]; tests
/// build their own against temporary directories.
#[derive(Clone)]
pub struct Context {
	pub kind: Arc<dyn ServiceKind>,
	/// Directory holding one subdirectory per service.
	pub root: PathBuf,
	/// Directory holding one runtime directory per service.
	pub runtime_root: PathBuf,
	/// Whether Start hands the work to a background worker. Off, Start
	/// configures in the calling process and nothing is persisted.
	pub detached: bool,
	pub settings: Settings,
}

impl Context {
	pub fn new(kind: Arc<dyn ServiceKind>, root: impl Into<PathBuf>, runtime_root: impl Into<PathBuf>) -> Self {
		Self {
			kind,
			root: root.into(),
			runtime_root: runtime_root.into(),
			detached: true,
			settings: Settings::default(),
		}
	}

	/// Resolves root and runtime directories from the environment, falling
	/// back to `settings`, then to the defaults.
	pub fn from_env(kind: Arc<dyn ServiceKind>, settings: Settings) -> Self {
		let type_name = kind.type_name().to_string();
		let env_root = std::env::var(paths::root_variable(&type_name))
			.ok()
			.filter(|v| !v.is_empty());
		let root = match (env_root, &settings.root) {
			(None, Some(root)) => paths::expand_tilde(root),
			_ => paths::resolve_root(&type_name),
		};
		let runtime_root = match &settings.runtime_dir {
			Some(dir) => paths::expand_tilde(dir).join(paths::plural_dir(&type_name)),
			None => paths::runtime_root(&type_name),
		};
		Self {
			kind,
			root,
			runtime_root,
			detached: true,
			settings,
		}
	}

	pub fn detached(mut self, detached: bool) -> Self {
		self.detached = detached;
		self
	}

	pub fn with_settings(mut self, settings: Settings) -> Self {
		self.settings = settings;
		self
	}

	pub fn type_name(&self) -> &str {
		self.kind.type_name()
	}

	/// `Service`, as used in user-facing messages.
	pub fn title(&self) -> String {
		paths::title_case(self.type_name())
	}

	pub fn service_dir(&self, name: &str) -> PathBuf {
		self.root.join(paths::name_to_filename(name))
	}

	pub fn runtime_dir(&self, name: &str) -> PathBuf {
		self.runtime_root.join(paths::name_to_filename(name))
	}

	/// Names of every service under the root, sorted. Hidden directories and
	/// plain files are skipped.
	pub fn service_names(&self) -> Vec<String> {
		list_dirs(&self.root)
	}
}

fn list_dirs(root: &Path) -> Vec<String> {
	let entries = match std::fs::read_dir(root) {
		Ok(entries) => entries,
		Err(e) => {
			tracing::debug!(root = %root.display(), error = %e, "cannot list services");
			return Vec::new();
		}
	};
	let mut names: Vec<String> = entries
		.flatten()
		.filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
		.filter_map(|e| e.file_name().to_str().map(str::to_string))
		.filter(|name| !name.starts_with('.'))
		.map(|name| paths::filename_to_name(&name))
		.collect();
	names.sort();
	names
}

impl fmt::Debug for Context {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Context")
			.field("kind", &self.kind.type_name())
			.field("root", &self.root)
			.field("runtime_root", &self.runtime_root)
			.field("detached", &self.detached)
			.finish()
	}
}
