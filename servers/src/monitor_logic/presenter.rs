//! Console stand-in for the operator display. Prints a banner whenever the
//! cover gate changes state, one line per detection that becomes the most
//! recent, and the connection's reconnect schedule. Reads operator commands
//! from stdin.

use colored::Colorize;
use feed_core::{ConnectionState, Detection, FeedController, FeedSnapshot, GateState};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `fix <id> <plate...>`
    Fix { id: String, plate: String },
    List,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<OperatorCommand, String> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("fix") => {
            let id = words.next().ok_or("usage: fix <id> <plate>")?.to_string();
            let plate = words.collect::<Vec<_>>().join("");
            if plate.is_empty() {
                return Err("usage: fix <id> <plate>".to_string());
            }
            Ok(OperatorCommand::Fix { id, plate })
        }
        Some("list") | Some("ls") => Ok(OperatorCommand::List),
        Some("help") | Some("?") => Ok(OperatorCommand::Help),
        Some("quit") | Some("exit") => Ok(OperatorCommand::Quit),
        Some(other) => Err(format!("unknown command: {other} (try help)")),
        None => Err(String::new()),
    }
}

/// One detection as a single uncoloured line.
pub fn format_detection(detection: &Detection) -> String {
    let at = detection
        .captured_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let mut line = format!(
        "[{}] {:<12} {:<10} {:<8}",
        at,
        detection.plate_label(),
        detection.vehicle_type.to_string(),
        detection.color
    );
    if let Some(model) = &detection.model {
        line.push_str(&format!(" {model}"));
    }
    line.push_str(&format!(" @ {} (id {})", detection.source_location, detection.id));
    line
}

fn print_gate(state: GateState) {
    let banner = match state {
        GateState::AwaitingFirstConnection => "==== Waiting for the detection feed ====".yellow().bold(),
        GateState::Revealing => "==== Feed connected ====".cyan().bold(),
        GateState::Ready => "==== LIVE ====".green().bold(),
        GateState::Covered => "==== Connection lost, holding the screen ====".red().bold(),
    };
    println!("{banner}");
}

fn print_connection(state: ConnectionState) {
    if let ConnectionState::Reconnecting { attempt, next_delay_ms } = state {
        println!(
            "{}",
            format!("reconnect attempt {attempt} in {:.1}s", next_delay_ms as f64 / 1000.0).dimmed()
        );
    }
}

fn print_list(snapshot: &FeedSnapshot) {
    if snapshot.is_empty() {
        println!("{}", "(no detections yet)".dimmed());
        return;
    }
    for detection in snapshot.items.iter() {
        println!("  {}", format_detection(detection));
    }
}

fn print_help() {
    println!("commands: fix <id> <plate> | list | help | quit");
}

/// Runs until the operator quits or the controller goes away.
pub async fn run(controller: &FeedController) {
    let mut gate = controller.gate();
    let mut feed = controller.feed();
    let mut connection = controller.connection();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut shown: Option<Detection> = None;

    print_gate(*gate.borrow_and_update());

    loop {
        tokio::select! {
            changed = gate.changed() => {
                if changed.is_err() {
                    break;
                }
                print_gate(*gate.borrow_and_update());
            }
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = feed.borrow_and_update().most_recent.clone();
                if let Some(detection) = latest {
                    if shown.as_ref() != Some(&detection) {
                        println!("{}", format_detection(&detection).bold());
                        shown = Some(detection);
                    }
                }
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                print_connection(*connection.borrow_and_update());
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(OperatorCommand::Fix { id, plate }) => match controller.correct_plate(&id, &plate).await {
                        Ok(updated) => println!("{} {}", "✓ Plate updated:".green(), format_detection(&updated)),
                        Err(e) if e.is_retryable() => println!("{} {}", "Failed to update, try again:".red(), e),
                        Err(e) => println!("{} {}", "Not updated:".red(), e),
                    },
                    Ok(OperatorCommand::List) => print_list(&controller.snapshot()),
                    Ok(OperatorCommand::Help) => print_help(),
                    Ok(OperatorCommand::Quit) => break,
                    Err(message) if message.is_empty() => {}
                    Err(message) => println!("{}", message.yellow()),
                },
                Ok(None) => {
                    log::debug!("stdin closed; operator commands disabled");
                    stdin_open = false;
                }
                Err(e) => {
                    log::warn!("Failed to read operator input: {}", e);
                    stdin_open = false;
                }
            },
        }
    }
}
