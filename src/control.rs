//! ControlInput - stdin record/stop control during a camera session.
//!
//! A terminal has no record button, so the control loop reads commands from
//! stdin on a background thread: Enter toggles recording, `q` quits and `s`
//! prints the current state.

use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread;

/// Commands sent through the control input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start recording when idle, stop when recording.
    Toggle,
    /// End the session.
    Quit,
    /// Print the current recording state.
    Status,
}

/// Stdin listener for control commands.
pub struct ControlInput {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlInput {
    /// Start listening on stdin.
    ///
    /// Spawns a background thread that parses each line into a
    /// [`ControlCommand`]. Unknown input is reported and ignored. EOF ends
    /// the listener without quitting, so scripted runs with a closed stdin
    /// are driven by `--duration` or Ctrl+C instead.
    pub fn spawn_listener() -> (Self, mpsc::Receiver<ControlCommand>) {
        let (tx, rx) = mpsc::channel();
        let tx_clone = tx.clone();

        thread::spawn(move || {
            let stdin = io::stdin();
            let handle = stdin.lock();

            Self::print_prompt();

            for line in handle.lines() {
                match line {
                    Ok(input) => {
                        match Self::parse_input(&input) {
                            Some(cmd) => {
                                if tx_clone.send(cmd).is_err() {
                                    break; // Channel closed
                                }
                            }
                            None => {
                                log::warn!("Unknown command: '{}'", input.trim());
                                println!("Commands: <Enter>/r record or stop, s status, q quit");
                            }
                        }
                        Self::print_prompt();
                    }
                    Err(_) => break, // EOF or read error
                }
            }
        });

        (Self { tx }, rx)
    }

    /// Parse a line of input.
    ///
    /// Empty input and `r` toggle, `q` quits, `s` reports status.
    /// Matching ignores case and surrounding whitespace.
    pub fn parse_input(input: &str) -> Option<ControlCommand> {
        match input.trim().to_lowercase().as_str() {
            "" | "r" | "record" | "stop" => Some(ControlCommand::Toggle),
            "q" | "quit" | "exit" => Some(ControlCommand::Quit),
            "s" | "status" => Some(ControlCommand::Status),
            _ => None,
        }
    }

    /// Inject a command as if it had been typed.
    pub fn send(&self, cmd: ControlCommand) -> Result<(), mpsc::SendError<ControlCommand>> {
        self.tx.send(cmd)
    }

    fn print_prompt() {
        print!("stabcam> ");
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_line_toggles() {
        assert_eq!(ControlInput::parse_input(""), Some(ControlCommand::Toggle));
        assert_eq!(ControlInput::parse_input("   "), Some(ControlCommand::Toggle));
        assert_eq!(ControlInput::parse_input("r"), Some(ControlCommand::Toggle));
    }

    #[test]
    fn test_quit_and_status() {
        assert_eq!(ControlInput::parse_input("q"), Some(ControlCommand::Quit));
        assert_eq!(ControlInput::parse_input(" QUIT "), Some(ControlCommand::Quit));
        assert_eq!(ControlInput::parse_input("s"), Some(ControlCommand::Status));
    }

    #[test]
    fn test_unknown_input() {
        assert_eq!(ControlInput::parse_input("zoom"), None);
    }
}
