use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use servitor::service::FOREGROUND;
use servitor::{cli, settings, Context, GenericService};

const APP: &str = "servitor";

fn main() -> ExitCode {
	let args: Vec<String> = std::env::args().skip(1).collect();

	match args.first().map(String::as_str) {
		None => {
			print_usage();
			return ExitCode::FAILURE;
		}
		Some("help" | "--help" | "-h") => {
			print_usage();
			return ExitCode::SUCCESS;
		}
		Some("version" | "--version" | "-V") => {
			println!("{} {}", APP, env!("CARGO_PKG_VERSION"));
			return ExitCode::SUCCESS;
		}
		Some(_) => {}
	}

	init_tracing(&args);
	let settings = settings::load_settings(APP);
	let context = Context::from_env(Arc::new(GenericService), settings);
	tracing::debug!(root = %context.root.display(), runtime = %context.runtime_root.display(), "resolved directories");
	cli::run(&context, &args)
}

/// Workers log at info into their log file; interactive runs only warn.
fn init_tracing(args: &[String]) {
	let worker = cli::parse(args)
		.map(|inv| inv.flags.contains_key(FOREGROUND))
		.unwrap_or(false);
	let default = if worker { "info" } else { "warn" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(std::io::stderr().is_terminal())
		.init();
}

fn print_usage() {
	eprintln!("{} {} - directory-backed service supervisor", APP.bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} <command> [--flag[=value]]... [name]...", APP.bold());
	eprintln!();

	eprintln!("{}", "lifecycle".cyan().bold());
	eprintln!("  {} [--foreground]       Start service(s) in the background", "start".bold());
	eprintln!("  {} [--force]             Stop service(s); --force waits for exit", "stop".bold());
	eprintln!("  {}                    Stop and start again", "restart".bold());
	eprintln!("  {}                     Stop and remove the service directory", "delete".bold());
	eprintln!();

	eprintln!("{}", "inspection".cyan().bold());
	eprintln!("  {}                     Started/enabled state", "status".bold());
	eprintln!("  {}                       Names only, use with a filter", "list".bold());
	eprintln!("  {} [--main|--auxiliary]    Pids of the service", "ps".bold());
	eprintln!("  {}                        Print the log", "log".bold());
	eprintln!("  {}                      Follow the log (tail -F)", "watch".bold());
	eprintln!();

	eprintln!("{}", "config".cyan().bold());
	eprintln!("  {}                       Create the directory and service.toml", "init".bold());
	eprintln!("  {} [--now]             Enable (and start)", "enable".bold());
	eprintln!("  {} [--now]            Disable (and stop)", "disable".bold());
	eprintln!();

	eprintln!("{}", "targeting".cyan().bold());
	eprintln!("  Name services, or select them with a filter flag:");
	eprintln!("    --started --stopped --enabled --disabled --all");
	eprintln!("  Services live under {} (default ~/Services)", "$SERVICE_ROOT".bold());
	eprintln!();

	eprintln!("{}", "examples".cyan().bold());
	eprintln!("    {} init web", APP);
	eprintln!("    {} start web api", APP);
	eprintln!("    {} status --all", APP);
	eprintln!("    {} restart --started", APP);
}
