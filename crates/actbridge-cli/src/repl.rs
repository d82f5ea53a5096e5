//! REPL – drives the bridge as a new-protocol client.
//!
//! Supported slash-commands:
//!   /send <order>  – send a Fibonacci goal
//!   /cancel        – cancel the most recent goal
//!   /status        – bridge state and legacy server counters
//!   /online        – bring the simulated legacy server up
//!   /offline       – take the simulated legacy server down
//!   /help          – show this list
//!   /quit | /exit  – shut the bridge down and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use actbridge_types::{BridgeState, CancelResponse, TerminalOutcome};
use tokio::runtime::Handle;

use crate::session::{ClientGoal, Session};

/// Parsed REPL input.
#[derive(Debug, PartialEq)]
enum Command {
    Send(i32),
    Cancel,
    Status,
    Online,
    Offline,
    Help,
    Quit,
    Invalid(String),
}

fn parse(line: &str) -> Command {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Command::Invalid(String::new());
    };
    match head {
        "/send" => match words.next().map(str::parse::<i32>) {
            Some(Ok(order)) => Command::Send(order),
            _ => Command::Invalid("usage: /send <order>".to_string()),
        },
        "/cancel" => Command::Cancel,
        "/status" => Command::Status,
        "/online" => Command::Online,
        "/offline" => Command::Offline,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command '{other}'")),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(runtime: &Handle, session: &Arc<Session>, shutdown: &AtomicBool) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "actbridge>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        if line.trim().is_empty() {
            continue;
        }

        match parse(&line) {
            Command::Send(order) => cmd_send(runtime, session, order),
            Command::Cancel => cmd_cancel(runtime, session),
            Command::Status => cmd_status(session),
            Command::Online => {
                session.set_legacy_online(true);
                println!("  Legacy server is {}", "online".green());
            }
            Command::Offline => {
                session.set_legacy_online(false);
                println!("  Legacy server is {}", "offline".yellow());
            }
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Invalid(msg) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    msg.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "actbridge Commands".bold().underline());
    println!("  {}  – send a Fibonacci goal", "/send <order>".bold().cyan());
    println!("  {}        – cancel the most recent goal", "/cancel".bold().cyan());
    println!("  {}        – bridge state and counters", "/status".bold().cyan());
    println!("  {}        – bring the legacy server up", "/online".bold().cyan());
    println!("  {}       – take the legacy server down", "/offline".bold().cyan());
    println!("  {}  – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_send(runtime: &Handle, session: &Arc<Session>, order: i32) {
    match runtime.block_on(session.send_goal(order)) {
        Ok(Some(goal)) => {
            println!("  {} goal {}", "✓ accepted".green(), goal.goal_id().to_string().bold());
            runtime.spawn(report(goal));
        }
        Ok(None) => println!("  {} another goal is active", "✗ rejected:".red()),
        Err(e) => println!("{}: {}", "Send failed".red(), e),
    }
}

fn cmd_cancel(runtime: &Handle, session: &Arc<Session>) {
    match runtime.block_on(session.cancel_last()) {
        Ok(Some((goal_id, CancelResponse::Accept))) => {
            println!("  Cancel of {} accepted", goal_id.to_string().bold());
        }
        Ok(Some((goal_id, CancelResponse::Reject))) => {
            println!("  Goal {} is {}", goal_id.to_string().bold(), "already finished".dimmed());
        }
        Ok(None) => println!("  {}", "No goal sent yet.".dimmed()),
        Err(e) => println!("{}: {}", "Cancel failed".red(), e),
    }
}

fn cmd_status(session: &Session) {
    let status = session.status();
    let state = match status.state {
        BridgeState::Idle => "idle".green(),
        BridgeState::Accepted => "accepted".yellow(),
        BridgeState::Executing => "executing".cyan(),
    };

    println!("{}", "Bridge Status".bold().underline());
    println!("  Node          : {}", status.node_name.bold());
    println!("  State         : {state}");
    if let Some(goal_id) = status.active_goal {
        println!("  Active goal   : {goal_id}");
    }
    println!(
        "  Legacy server : {}",
        if status.legacy_online { "online".green() } else { "offline".yellow() }
    );
    println!("  Submissions   : {}", status.submissions);
    println!("  Cancels       : {}", status.cancels);
}

/// Print feedback and the final result of one goal as they arrive.
async fn report(mut goal: ClientGoal) {
    let goal_id = goal.goal_id();
    while let Some(feedback) = goal.next_feedback().await {
        println!("  {} {:?}", "↳".dimmed(), feedback.partial_sequence);
    }
    match goal.result().await {
        Ok(done) => {
            let outcome = match done.outcome {
                TerminalOutcome::Succeeded => "succeeded".green().bold(),
                TerminalOutcome::Aborted => "aborted".red().bold(),
                TerminalOutcome::Canceled => "canceled".yellow().bold(),
            };
            println!("  Goal {goal_id} {outcome}: {:?}", done.result.sequence);
        }
        Err(e) => println!("  {}: {}", "Goal lost".red(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_order() {
        assert_eq!(parse("/send 10\n"), Command::Send(10));
        assert_eq!(parse("  /send   -2 "), Command::Send(-2));
    }

    #[test]
    fn send_without_valid_order_is_invalid() {
        assert!(matches!(parse("/send"), Command::Invalid(_)));
        assert!(matches!(parse("/send ten"), Command::Invalid(_)));
    }

    #[test]
    fn parses_plain_commands() {
        assert_eq!(parse("/cancel"), Command::Cancel);
        assert_eq!(parse("/status"), Command::Status);
        assert_eq!(parse("/online"), Command::Online);
        assert_eq!(parse("/offline"), Command::Offline);
        assert_eq!(parse("/help"), Command::Help);
        assert_eq!(parse("/exit"), Command::Quit);
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            parse("/launch"),
            Command::Invalid("unknown command '/launch'".to_string())
        );
    }
}
