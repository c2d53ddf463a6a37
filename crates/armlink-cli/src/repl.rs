//! REPL – the operator shell.
//!
//! Supported slash-commands:
//!   /serve        – run the server role; typed lines become turns
//!   /connect      – run the client role until the server closes
//!   /calibration  – show the active camera profile
//!   /schema       – print the action JSON Schema
//!   /replay       – print every entry in the action log
//!   /settings     – view and edit `~/.armlink/config.toml`
//!   /help         – show this list
//!   /quit | /exit – leave the shell

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use armlink_hal::SimDriver;
use armlink_memory::ActionLog;
use armlink_middleware::framing::decode_frame;
use armlink_middleware::{ActionSource, EventBus, RelayClient, RelayServer, TurnFeed};
use armlink_runtime::pipeline::DEFAULT_DEPTH_M;
use armlink_runtime::{ActionPipeline, DepthMode, SessionReport};
use armlink_types::{RawAction, Turn, raw_action_schema};

use crate::config::{self, Config};

pub struct Shell {
    cfg: Config,
    bus: EventBus,
    shutdown: Arc<AtomicBool>,
}

impl Shell {
    pub fn new(cfg: Config, bus: EventBus, shutdown: Arc<AtomicBool>) -> Self {
        Self { cfg, bus, shutdown }
    }

    /// Read commands until `/quit`, EOF, or the shutdown flag is set.
    pub fn run(&mut self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            print!("{} ", "armlink>".bold().cyan());
            io::stdout().flush().ok();

            let Some(line) = read_line() else { break };
            let cmd = line.trim();
            if cmd.is_empty() {
                continue;
            }

            match cmd {
                "/help" => cmd_help(),
                "/serve" => self.cmd_serve(),
                "/connect" => self.cmd_connect(),
                "/calibration" => self.cmd_calibration(),
                "/schema" => cmd_schema(),
                "/replay" => self.cmd_replay(),
                "/settings" => self.cmd_settings(),
                "/quit" | "/exit" => {
                    println!("{}", "Goodbye.".green());
                    self.shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                other => {
                    println!(
                        "{} '{}'. Type {} for available commands.",
                        "Unknown command:".red(),
                        other.yellow(),
                        "/help".bold()
                    );
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // /serve
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the server role until the operator types `stop` (back to the
    /// prompt) or Ctrl-C sets the shutdown flag.
    pub fn cmd_serve(&mut self) {
        let server = match RelayServer::bind(
            self.cfg.listen_addr.as_str(),
            self.cfg.server_options(),
            self.bus.clone(),
        ) {
            Ok(server) => server,
            Err(e) => {
                println!("{}: {}", "Cannot start server".red(), e);
                return;
            }
        };
        let addr = server
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.cfg.listen_addr.clone());

        let feed = TurnFeed::default();
        let connections = feed.clone();
        let stop = Arc::clone(&self.shutdown);
        let handle = thread::spawn(move || {
            let make_source = move |_peer: SocketAddr| -> Box<dyn ActionSource> {
                Box::new(connections.subscribe())
            };
            server.run_until(make_source, &stop)
        });

        println!(
            "  {} Serving on {}",
            "✓".green().bold(),
            addr.bold()
        );
        if !self.cfg.allow_list.is_empty() {
            let peers: Vec<String> = self.cfg.allow_list.iter().map(|ip| ip.to_string()).collect();
            println!("  Accepting only: {}", peers.join(", ").yellow());
        }
        println!(
            "  Type an action as JSON, or a command name such as {}. Type {} to stop serving.",
            "reset_pose".bold(),
            "stop".bold()
        );

        let mut operator_stop = true;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                operator_stop = false;
                break;
            }
            print!("{} ", "serve>".bold().green());
            io::stdout().flush().ok();

            let Some(line) = read_line() else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("stop") {
                break;
            }

            match parse_turn(line) {
                Ok(turn) => match feed.publish(turn) {
                    0 => println!("  {}", "No client connected; turn dropped.".yellow()),
                    n => println!("  {} Turn sent to {} client(s).", "✓".green(), n),
                },
                Err(e) => println!("{}: {}", "Not an action".red(), e),
            }
        }

        self.shutdown.store(true, Ordering::SeqCst);
        drop(feed);
        match handle.join() {
            Ok(Ok(())) => println!("  Server stopped."),
            Ok(Err(e)) => println!("{}: {}", "Server error".red(), e),
            Err(_) => println!("{}", "Server thread panicked.".red()),
        }
        if operator_stop {
            self.shutdown.store(false, Ordering::SeqCst);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // /connect
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the client role in the foreground and print the session report.
    pub fn cmd_connect(&mut self) {
        println!("  Connecting to {} …", self.cfg.server_addr.bold());
        let client = match RelayClient::connect(
            self.cfg.server_addr.as_str(),
            self.cfg.client_options(),
            self.bus.clone(),
        ) {
            Ok(client) => client,
            Err(e) => {
                println!("{}: {}", "Connection failed".red(), e);
                return;
            }
        };
        println!(
            "  {} Connected. Logging accepted actions to {}",
            "✓".green().bold(),
            self.cfg.action_log_path.display().to_string().bold()
        );

        let pipeline = ActionPipeline::new(
            self.cfg.calibration.clone(),
            ActionLog::new(self.cfg.action_log_path.clone()),
            Box::new(SimDriver::new()),
            self.bus.clone(),
            self.cfg.pipeline_config(),
        );
        let report = pipeline.drive(client);
        print_report(&report);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // /calibration, /replay, /settings
    // ─────────────────────────────────────────────────────────────────────────

    fn cmd_calibration(&self) {
        let profile = &self.cfg.calibration;
        let k = profile.intrinsics().rows;
        let r = profile.rotation().rows;

        println!("{}", "Calibration".bold().underline());
        println!("  Intrinsics K:");
        for row in k {
            println!("    {}", format_row(&row));
        }
        println!("  Distortion  : {}", format_row(&profile.distortion().0));
        println!("  Rotation R:");
        for row in r {
            println!("    {}", format_row(&row));
        }
        println!("  Translation : {}", format_row(&profile.translation().to_array()));

        let depth = match self.cfg.depth {
            DepthMode::Fixed { meters } => {
                println!("  Depth       : fixed {meters} m");
                meters
            }
            DepthMode::Detection => {
                println!("  Depth       : taken from each detection");
                DEFAULT_DEPTH_M
            }
        };

        let (cx, cy) = (k[0][2], k[1][2]);
        match profile.pixel_to_base(cx, cy, depth) {
            Ok(base) => println!(
                "  Principal point ({cx:.1}, {cy:.1}) at {depth} m → base {}",
                format_row(&base.to_array()).yellow()
            ),
            Err(e) => println!("{}: {}", "Sample conversion failed".red(), e),
        }
    }

    fn cmd_replay(&self) {
        let log = ActionLog::new(self.cfg.action_log_path.clone());
        match log.read_all() {
            Ok(entries) if entries.is_empty() => {
                println!("  {} is empty.", log.path().display().to_string().bold());
            }
            Ok(entries) => {
                println!(
                    "{} ({} entries)",
                    log.path().display().to_string().bold().underline(),
                    entries.len()
                );
                for entry in &entries {
                    println!(
                        "  {}  {}",
                        entry.timestamp.to_rfc3339().dimmed(),
                        entry.canonical().to_string().bold()
                    );
                }
            }
            Err(e) => println!("{}: {}", "Cannot read action log".red(), e),
        }
    }

    fn cmd_settings(&mut self) {
        println!("{}", "Settings Editor".bold().underline());
        match toml::to_string_pretty(&self.cfg) {
            Ok(text) => {
                for line in text.lines() {
                    println!("  {}", line.dimmed());
                }
            }
            Err(e) => println!("{}: {}", "Cannot render config".red(), e),
        }
        println!();

        let mut cfg = self.cfg.clone();
        cfg.listen_addr = prompt_str(&format!("  Listen address [{}]: ", cfg.listen_addr), &cfg.listen_addr);
        cfg.server_addr = prompt_str(&format!("  Server address [{}]: ", cfg.server_addr), &cfg.server_addr);

        let current = cfg
            .allow_list
            .iter()
            .map(|ip| ip.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let raw = prompt_str(&format!("  Allowed client IPs (\"-\" = all) [{current}]: "), &current);
        if raw == "-" {
            cfg.allow_list.clear();
        } else {
            match config::parse_allow_list(&raw) {
                Ok(list) => cfg.allow_list = list,
                Err(bad) => println!(
                    "  {} '{}' is not an IP address, keeping the current list",
                    "Warning:".yellow(),
                    bad
                ),
            }
        }

        let log_path = cfg.action_log_path.display().to_string();
        cfg.action_log_path = prompt_str(&format!("  Action log [{log_path}]: "), &log_path).into();

        match config::save(&cfg) {
            Ok(()) => {
                self.cfg = cfg;
                println!(
                    "{} {}",
                    "✓ Settings saved to".green(),
                    config::config_path().display().to_string().bold()
                );
            }
            Err(e) => println!("{}: {}", "Error saving config".red(), e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stateless commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "armlink Commands".bold().underline());
    println!("  {}       – serve actions to robot clients", "/serve".bold().cyan());
    println!("  {}     – receive actions and drive the robot", "/connect".bold().cyan());
    println!("  {} – show the camera calibration", "/calibration".bold().cyan());
    println!("  {}      – print the action JSON Schema", "/schema".bold().cyan());
    println!("  {}      – print the action log", "/replay".bold().cyan());
    println!("  {}    – edit ~/.armlink/config.toml settings", "/settings".bold().cyan());
    println!("  {}  – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_schema() {
    match serde_json::to_string_pretty(&raw_action_schema()) {
        Ok(schema) => println!("{schema}"),
        Err(e) => println!("{}: {}", "Cannot render schema".red(), e),
    }
}

fn print_report(report: &SessionReport) {
    println!();
    println!("{}", "All received actions".bold().underline());
    if report.accepted.is_empty() {
        println!("  (none)");
    }
    for (idx, entry) in report.accepted.iter().enumerate() {
        println!("  {:>3}. {}", idx + 1, entry.canonical().to_string().bold());
    }

    for located in &report.located {
        println!(
            "       {} at base {}",
            located.object.cyan(),
            format_row(&located.base)
        );
    }

    println!(
        "  accepted {}, suppressed {}, undecodable frames {}",
        report.accepted.len().to_string().green(),
        report.suppressed.to_string().yellow(),
        report.decode_failures.to_string().red()
    );
    if report.unlogged > 0 {
        println!(
            "  {} {} accepted action(s) could not be written to the action log",
            "Warning:".yellow(),
            report.unlogged
        );
    }
    match &report.error {
        None => println!("  {}", "Server closed the connection.".dimmed()),
        Some(e) => println!("  {}: {}", "Session ended with error".red(), e),
    }
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Turn one operator line into a turn.
///
/// JSON input (an action object or an array of them) is sent as-is; a bare
/// word is a named command with no gripper code.
pub(crate) fn parse_turn(line: &str) -> Result<Turn, String> {
    let line = line.trim();
    if line.starts_with('{') || line.starts_with('[') {
        return decode_frame(line.as_bytes())
            .map(Turn::new)
            .map_err(|e| e.to_string());
    }
    match line.split_whitespace().collect::<Vec<_>>().as_slice() {
        [name] => Ok(Turn::new(vec![RawAction::named(*name)]).with_user_command(*name)),
        [] => Err("empty input".to_string()),
        _ => Err("expected a JSON action, a JSON array of actions, or one command name".to_string()),
    }
}

fn format_row(values: &[f64]) -> String {
    let cells: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
    format!("[{}]", cells.join(", "))
}

/// `None` on EOF or a read error.
fn read_line() -> Option<String> {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(e) => {
            eprintln!("{}: {}", "Read error".red(), e);
            None
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn bare_word_becomes_named_command_without_gripper() {
        let turn = parse_turn("reset_pose").unwrap();
        assert_eq!(turn.actions.len(), 1);
        assert_eq!(turn.actions[0].pos_end_effector, json!("reset_pose"));
        assert_eq!(turn.actions[0].gripper, Value::Null);
        assert_eq!(turn.user_command.as_deref(), Some("reset_pose"));
    }

    #[test]
    fn json_object_is_one_action() {
        let turn = parse_turn(r#"{"pos_end_effector":[0,0,0,0,0,0],"gripper":220}"#).unwrap();
        assert_eq!(turn.actions.len(), 1);
        assert_eq!(turn.actions[0].gripper, json!(220));
        assert!(turn.user_command.is_none());
    }

    #[test]
    fn json_array_keeps_every_action() {
        let turn = parse_turn(
            r#" [{"pos_end_effector":"go_to_glove","gripper":30},{"pos_end_effector":"reset_pose"}] "#,
        )
        .unwrap();
        assert_eq!(turn.actions.len(), 2);
    }

    #[test]
    fn free_text_is_rejected() {
        assert!(parse_turn("pick up the cup").is_err());
        assert!(parse_turn("   ").is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(parse_turn(r#"{"pos_end_effector": "#).is_err());
        assert!(parse_turn("[1, 2, 3]").is_err());
    }

    #[test]
    fn rows_are_formatted_to_four_places() {
        assert_eq!(format_row(&[0.16, 1.03, -0.004]), "[0.1600, 1.0300, -0.0040]");
    }
}
