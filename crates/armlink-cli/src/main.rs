//! `armlink` – operator CLI for the perception-to-robot relay.
//!
//! 1. Installs tracing (see `armlink_runtime::telemetry`).
//! 2. Loads `~/.armlink/config.toml`, running a short first-run wizard when
//!    it is absent.  A config whose calibration does not validate is fatal.
//! 3. Intercepts **Ctrl-C**: the first press stops the relay and publishes a
//!    `Shutdown` event, a second press exits immediately.
//! 4. Runs `armlink serve` / `armlink connect` directly when given, then
//!    drops into the interactive shell.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use armlink_middleware::EventBus;
use armlink_types::RelayEvent;

fn main() {
    let telemetry = armlink_runtime::init_tracing("armlink");

    print_banner();
    if telemetry.is_exporting() {
        println!("  {}", "Exporting spans over OTLP.".dimmed());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let bus = EventBus::default();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown_ctrlc = Arc::clone(&shutdown);
    let bus_ctrlc = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if shutdown_ctrlc.swap(true, Ordering::SeqCst) {
            println!();
            println!("{}", "  Exiting armlink.".red());
            std::process::exit(130);
        }
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the relay …".yellow().bold());
        bus_ctrlc.emit(
            "armlink-cli",
            RelayEvent::Shutdown {
                reason: "operator Ctrl-C".to_string(),
            },
        );
        println!("{}", "  Press Ctrl-C again to exit immediately.".dimmed());
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Config ────────────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            eprintln!(
                "  Fix or remove {} and restart.",
                config::config_path().display().to_string().bold()
            );
            std::process::exit(1);
        }
    };

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let mut shell = repl::Shell::new(cfg, bus, shutdown);
    match std::env::args().nth(1).as_deref() {
        Some("serve") => shell.cmd_serve(),
        Some("connect") => shell.cmd_connect(),
        Some(other) => println!(
            "{} '{}' (expected {} or {})",
            "Unknown argument".red(),
            other.yellow(),
            "serve".bold(),
            "connect".bold()
        ),
        None => {}
    }
    shell.run();
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       armlink First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Press Enter to keep a default.\n");

    let mut cfg = config::Config::default();

    cfg.listen_addr = repl::prompt_str(
        &format!("  Server role: listen address [{}]: ", cfg.listen_addr),
        &cfg.listen_addr,
    );
    cfg.server_addr = repl::prompt_str(
        &format!("  Client role: server address [{}]: ", cfg.server_addr),
        &cfg.server_addr,
    );
    let allow = repl::prompt_str("  Allowed client IPs, comma separated (blank = all) []: ", "");
    match config::parse_allow_list(&allow) {
        Ok(list) => cfg.allow_list = list,
        Err(bad) => println!(
            "  {} '{}' is not an IP address; allowing all clients",
            "Warning:".yellow(),
            bad
        ),
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ _ _ __ _ __ ___ | (_)_ __ | | __"#.bold().cyan());
    println!("{}", r#"  / _` | '__| '_ ` _ \| | | '_ \| |/ /"#.bold().cyan());
    println!("{}", r#" | (_| | |  | | | | | | | | | | |   < "#.bold().cyan());
    println!("{}", r#"  \__,_|_|  |_| |_| |_|_|_|_| |_|_|\_\"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "armlink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Perception-to-robot action relay");
    println!();
}
