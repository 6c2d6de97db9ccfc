//! Lockfile persistence.
//!
//! The lockfile doubles as the "started" marker and as a JSON object holding
//! the service's [`State`](crate::service::State). Only the main process
//! writes to it, and only while it exists.

use std::path::Path;

use serde_json::{Map, Value};

use crate::service::Service;

/// Reads the lockfile as a JSON object. Missing, unreadable or malformed
/// files all read as `None`.
pub fn read_map(path: &Path) -> Option<Map<String, Value>> {
	let content = std::fs::read_to_string(path).ok()?;
	match serde_json::from_str(&content) {
		Ok(Value::Object(map)) => Some(map),
		Ok(_) | Err(_) => {
			tracing::debug!(path = %path.display(), "ignoring malformed lockfile");
			None
		}
	}
}

/// Loads persisted attributes into `service.state`, key by key.
pub fn load(service: &mut Service) {
	if let Some(map) = read_map(&service.lockfile) {
		for (key, value) in map {
			service.state.apply(&key, value);
		}
	}
	service.snapshot = service.state.to_map();
}

/// Writes changed attributes back, merging into whatever the file holds.
///
/// Never fails: persistence problems are logged and the operation that
/// triggered the save carries on. Nothing is written outside detached mode,
/// when the lockfile is gone, or when nothing changed since the last load.
pub fn save(service: &mut Service) {
	if !service.detached() || !service.lockfile.exists() {
		return;
	}
	let current = service.state.to_map();
	if current == service.snapshot {
		return;
	}
	let mut document = read_map(&service.lockfile).unwrap_or_default();
	for (key, value) in &current {
		document.insert(key.clone(), value.clone());
	}
	let result = serde_json::to_string_pretty(&Value::Object(document))
		.map_err(std::io::Error::from)
		.and_then(|json| std::fs::write(&service.lockfile, json));
	match result {
		Ok(()) => service.snapshot = current,
		Err(e) => tracing::debug!(service = %service.name, error = %e, "failed to save state"),
	}
}
