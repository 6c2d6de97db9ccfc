use serde::Deserialize;
use std::path::Path;

// ── Global settings (~/.config/servitor/config.toml) ─────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
	/// Services root, used when `<TYPENAME>_ROOT` is not set.
	pub root: Option<String>,
	/// Replaces the temp directory as the parent of runtime files.
	pub runtime_dir: Option<String>,
	#[serde(default = "default_start_timeout_ms")]
	pub start_timeout_ms: u64,
	#[serde(default = "default_loop_delay_secs")]
	pub loop_delay_secs: u64,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			root: None,
			runtime_dir: None,
			start_timeout_ms: default_start_timeout_ms(),
			loop_delay_secs: default_loop_delay_secs(),
		}
	}
}

fn default_start_timeout_ms() -> u64 { 5000 }
fn default_loop_delay_secs() -> u64 { 60 }

pub fn load_settings(app_name: &str) -> Settings {
	let path = warden::paths::config_dir(app_name).join("config.toml");
	load_settings_from(&path)
}

pub fn load_settings_from(path: &Path) -> Settings {
	if path.exists() {
		match std::fs::read_to_string(path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(settings) => return settings,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	Settings::default()
}
