//! `actbridge` – reverse action bridge command line interface.
//!
//! Serves a new-protocol action and fulfils every goal through a legacy
//! action server.  The binary:
//!
//! 1. Loads `~/.actbridge/config.toml` (writing defaults on first run) and
//!    applies `ACTBRIDGE_*` overrides and command-line flags.
//! 2. Starts a simulated legacy Fibonacci server, the bridge, and the
//!    new-protocol action server, plus the optional WebSocket monitor.
//! 3. Drops the user into an interactive REPL acting as a new-protocol
//!    client (`/send`, `/cancel`, `/status`, `/online`, `/offline`).
//! 4. Intercepts Ctrl-C to abort the active goal and exit.

mod config;
mod fibonacci;
mod repl;
mod session;

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use colored::Colorize;
use tracing::warn;

use crate::config::CliConfig;
use crate::session::Session;

#[derive(Debug, Parser)]
#[command(
    name = "actbridge",
    version,
    about = "Serve a new-protocol action on behalf of a legacy action server"
)]
struct Args {
    /// Action name served on both protocols.
    #[arg(default_value = "fibonacci")]
    action_name: String,

    /// Config file (default: ~/.actbridge/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Abort goals the legacy server has not finished after this many seconds.
    #[arg(long)]
    goal_timeout_secs: Option<u64>,

    /// Serve the WebSocket event monitor on this address.
    #[arg(long)]
    monitor: Option<SocketAddr>,

    /// Start with the simulated legacy server unavailable.
    #[arg(long)]
    legacy_offline: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Hold the guard for the lifetime of the process.
    let _telemetry = actbridge_runtime::init_tracing("actbridge");

    print_banner();

    let cfg = load_config(&args);
    let monitor = args.monitor.or_else(|| {
        let addr = cfg.monitor_addr.as_deref()?;
        addr.parse()
            .map_err(|e| warn!(addr, error = %e, "ignoring invalid monitor address"))
            .ok()
    });

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start Tokio runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    print!("\n  Starting bridge for {} … ", args.action_name.bold());
    io::stdout().flush().ok();
    let session = Arc::new(runtime.block_on(Session::start(
        &args.action_name,
        &cfg,
        !args.legacy_offline,
        monitor,
    )));
    println!("{}", "OK".green());
    if let Some(addr) = monitor {
        println!("  Event monitor on {}", format!("ws://{addr}").bold());
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let session = Arc::clone(&session);
        let handle = runtime.handle().clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – aborting active goal …".yellow().bold());
            shutdown.store(true, Ordering::SeqCst);
            let session = Arc::clone(&session);
            handle.spawn(async move {
                session.shutdown().await;
                println!("{}", "  ✓ Bridge stopped.".green());
                std::process::exit(130);
            });
        }) {
            warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
        }
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(runtime.handle(), &session, &shutdown);

    runtime.block_on(session.shutdown());
    ExitCode::SUCCESS
}

/// File config, then `ACTBRIDGE_*` overrides, then flags.
fn load_config(args: &Args) -> CliConfig {
    let path = args.config.clone().unwrap_or_else(config::config_path);

    let mut cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = CliConfig::default();
            match config::save_to(&cfg, &path) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = CliConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    if let Some(secs) = args.goal_timeout_secs {
        cfg.goal_timeout_secs = Some(secs);
    }
    cfg
}

fn print_banner() {
    println!();
    println!("  {} {}",
        "actbridge".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Reverse action bridge: new-protocol server, legacy client");
    println!();
}
