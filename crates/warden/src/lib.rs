//! # warden
//!
//! Daemon lifecycle toolkit for Rust CLIs.
//!
//! Resolves where a family of daemons keeps its state, records the pid of a
//! running daemon, respawns the current binary as a detached worker, and
//! terminates processes gracefully without getting stuck on zombies.

pub mod detach;
pub mod paths;
pub mod pidfile;
pub mod process;

pub use paths::{name_to_filename, filename_to_name, resolve_root, runtime_root, title_case};
pub use pidfile::{PidFile, PidRecord};
