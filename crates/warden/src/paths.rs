use std::path::{Path, PathBuf};

/// Base directory holding every service of `type_name`.
///
/// `$<TYPENAME>_ROOT` wins when set, otherwise `$HOME/<TypeName>s`.
pub fn resolve_root(type_name: &str) -> PathBuf {
	resolve_root_with(type_name, |var| std::env::var(var).ok())
}

/// Same as [`resolve_root`] but reads the environment through `lookup`.
pub fn resolve_root_with<F>(type_name: &str, lookup: F) -> PathBuf
where
	F: Fn(&str) -> Option<String>,
{
	let var = root_variable(type_name);
	if let Some(value) = lookup(&var).filter(|v| !v.is_empty()) {
		return expand_tilde_with(&value, &lookup);
	}
	let home = lookup("HOME")
		.filter(|h| !h.is_empty())
		.map(PathBuf::from)
		.unwrap_or_else(temp_root);
	home.join(plural_dir(type_name))
}

/// Name of the environment variable overriding the root of `type_name`.
pub fn root_variable(type_name: &str) -> String {
	format!("{}_ROOT", type_name.to_uppercase())
}

/// Per-type directory holding runtime files (logs, locks, pids).
pub fn runtime_root(type_name: &str) -> PathBuf {
	temp_root().join(plural_dir(type_name))
}

/// `service` → `Services`, the directory name shared by root and runtime dirs.
pub fn plural_dir(type_name: &str) -> String {
	format!("{}s", title_case(type_name))
}

/// Temp directory used for runtime state. macOS' `$TMPDIR` is per-user and
/// very long, so `/tmp` is used there instead.
pub fn temp_root() -> PathBuf {
	if cfg!(target_os = "macos") {
		PathBuf::from("/tmp")
	} else {
		std::env::temp_dir()
	}
}

pub fn config_dir(app_name: &str) -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join(app_name)
	} else if let Some(home) = home_dir() {
		home.join(".config").join(app_name)
	} else {
		temp_root().join(app_name).join("config")
	}
}

/// Capitalizes the first letter of every alphabetic run, lowercasing the rest.
pub fn title_case(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	let mut prev_alpha = false;
	for c in s.chars() {
		if c.is_alphabetic() {
			if prev_alpha {
				out.extend(c.to_lowercase());
			} else {
				out.extend(c.to_uppercase());
			}
			prev_alpha = true;
		} else {
			out.push(c);
			prev_alpha = false;
		}
	}
	out
}

/// Service names may contain `/`; map it onto the platform separator.
pub fn name_to_filename(name: &str) -> String {
	name.replace('/', std::path::MAIN_SEPARATOR_STR)
}

pub fn filename_to_name(filename: &str) -> String {
	filename.replace(std::path::MAIN_SEPARATOR_STR, "/")
}

pub fn expand_tilde(path: &str) -> PathBuf {
	expand_tilde_with(path, |var| std::env::var(var).ok())
}

fn expand_tilde_with<F>(path: &str, lookup: F) -> PathBuf
where
	F: Fn(&str) -> Option<String>,
{
	if path == "~" {
		if let Some(home) = lookup("HOME") {
			return PathBuf::from(home);
		}
	}
	if let Some(rest) = path.strip_prefix("~/") {
		if let Some(home) = lookup("HOME") {
			return Path::new(&home).join(rest);
		}
	}
	PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> =
			pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
		move |k| map.get(k).cloned()
	}

	#[test]
	fn default_root_under_home() {
		let root = resolve_root_with("service", env(&[("HOME", "/home/op")]));
		assert_eq!(root, PathBuf::from("/home/op/Services"));
	}

	#[test]
	fn env_override_wins() {
		let root = resolve_root_with(
			"container",
			env(&[("HOME", "/home/op"), ("CONTAINER_ROOT", "~/boxes")]),
		);
		assert_eq!(root, PathBuf::from("/home/op/boxes"));
	}

	#[test]
	fn empty_override_is_ignored() {
		let root = resolve_root_with("service", env(&[("HOME", "/h"), ("SERVICE_ROOT", "")]));
		assert_eq!(root, PathBuf::from("/h/Services"));
	}

	#[test]
	fn title_case_matches_word_runs() {
		assert_eq!(title_case("service"), "Service");
		assert_eq!(title_case("my_app"), "My_App");
		assert_eq!(title_case("vm2go"), "Vm2Go");
		assert_eq!(title_case("CONTAINER"), "Container");
	}

	#[test]
	fn runtime_root_is_namespaced_by_type() {
		assert!(runtime_root("service").ends_with("Services"));
	}
}
