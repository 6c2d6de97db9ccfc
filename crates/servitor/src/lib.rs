//! Directory-backed service supervision.
//!
//! Each service is a directory under a root (`$SERVICE_ROOT`, by default
//! `~/Services`) holding a `service.toml` of steps. Starting one re-executes
//! the binary as a detached main process that evaluates the steps, records
//! itself in a pid file and keeps its state in a JSON lockfile under the
//! temp directory until it is stopped.

pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod kind;
pub mod lifecycle;
pub mod service;
pub mod settings;
pub mod store;
pub mod tracker;

pub use config::Directive;
pub use context::Context;
pub use dispatch::{dispatch, Command, Outcome};
pub use error::{Error, Result};
pub use exec::{RunSpec, Runner};
pub use kind::{GenericService, ServiceKind};
pub use lifecycle::{Phase, Status};
pub use service::{Flags, Service, State};
pub use settings::Settings;
