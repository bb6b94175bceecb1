//! Interactive session: one command per line, verification runs in the
//! background so `reset` and `status` stay responsive while it is pending.

use crate::controller::Controller;
use crate::render;
use anyhow::Result;
use faceverify_core::Slot;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  start [basic] [anyway]   start the camera
  stop                     stop the camera
  capture known|new        capture a still into a slot
  upload known|new <file>  upload an image file into a slot
  verify                   verify the known face against the new face
  reset                    clear both slots
  status                   show progress
  help                     show this help
  quit                     stop the camera and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { basic: bool, anyway: bool },
    Stop,
    Capture(Slot),
    Upload(Slot, PathBuf),
    Verify,
    Reset,
    Status,
    Help,
    Quit,
}

fn parse_slot(word: Option<&str>) -> Result<Slot, String> {
    match word {
        Some("known") => Ok(Slot::Known),
        Some("new") => Ok(Slot::New),
        Some(other) => Err(format!("unknown slot `{other}` (expected known or new)")),
        None => Err("missing slot (known or new)".to_string()),
    }
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let command = match head {
        "start" => {
            let (mut basic, mut anyway) = (false, false);
            for word in words {
                match word {
                    "basic" => basic = true,
                    "anyway" => anyway = true,
                    other => return Err(format!("unknown start option `{other}`")),
                }
            }
            Command::Start { basic, anyway }
        }
        "stop" => Command::Stop,
        "capture" => Command::Capture(parse_slot(words.next())?),
        "upload" => {
            let slot = parse_slot(words.next())?;
            let rest: Vec<&str> = words.collect();
            if rest.is_empty() {
                return Err("missing file path".to_string());
            }
            Command::Upload(slot, PathBuf::from(rest.join(" ")))
        }
        "verify" => Command::Verify,
        "reset" => Command::Reset,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command `{other}` (try help)")),
    };
    Ok(Some(command))
}

fn prompt() {
    print!("faceverify> ");
    let _ = std::io::stdout().flush();
}

fn print_status(controller: &Controller) {
    println!("{}", render::step_indicator(controller.step()));
    match controller.stream() {
        Some(info) => println!("Camera: active ({}x{})", info.width, info.height),
        None => println!("Camera: stopped"),
    }
    let verify = if controller.verification_pending() {
        "in progress"
    } else if controller.verify_enabled() {
        "ready"
    } else {
        "waiting for images"
    };
    println!("Verify: {verify}");
    println!("Network: {}", controller.origin());
}

async fn execute(controller: &mut Controller, command: Command) {
    match command {
        Command::Start { basic, anyway } => {
            controller.start_camera(basic, anyway).await;
        }
        Command::Stop => controller.stop_camera().await,
        Command::Capture(slot) => {
            controller.capture(slot).await;
        }
        Command::Upload(slot, path) => {
            controller.upload(slot, &path).await;
        }
        Command::Verify => {
            controller.start_verification();
        }
        Command::Reset => controller.reset(),
        Command::Status => print_status(controller),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

pub async fn run(mut controller: Controller) -> Result<()> {
    if !controller.origin().is_local() {
        println!(
            "[info] {} detected. Camera may have limited functionality.",
            controller.origin()
        );
    }
    print_status(&controller);
    println!("Type `help` for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => execute(&mut controller, command).await,
                    Ok(None) => {}
                    Err(msg) => eprintln!("{msg}"),
                }
                prompt();
            }
            Some((ticket, result)) = controller.next_completion() => {
                println!();
                controller.complete(ticket, result);
                prompt();
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(
            parse_line("start basic"),
            Ok(Some(Command::Start {
                basic: true,
                anyway: false
            }))
        );
        assert_eq!(parse_line("capture known"), Ok(Some(Command::Capture(Slot::Known))));
        assert_eq!(
            parse_line("upload new /tmp/my face.jpg"),
            Ok(Some(Command::Upload(Slot::New, PathBuf::from("/tmp/my face.jpg"))))
        );
        assert_eq!(parse_line("exit"), Ok(Some(Command::Quit)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("capture").is_err());
        assert!(parse_line("capture both").is_err());
        assert!(parse_line("upload known").is_err());
        assert!(parse_line("start fast").is_err());
        assert!(parse_line("dance").is_err());
    }
}
