//! Output rendering for the terminal front end.
//!
//! This module provides a trait-based rendering abstraction so the REPL can
//! print with or without ANSI styling.

use std::io::{self, Stdout, Write};

use crate::types::{Message, MessageStatus, Sender};

/// ANSI escape code for dim text (used for system notices).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for bold text (used for sender labels).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the user label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Prints the label that precedes a streamed reply.
    fn start_response(&mut self);

    /// Prints a chunk of streamed reply text.
    fn print_text(&mut self, text: &str);

    /// Called when a streamed reply is complete.
    fn finish_response(&mut self);

    /// Called when the user stops a streamed reply.
    fn print_interrupted(&mut self);

    /// Prints a whole message, e.g. when replaying a session.
    fn print_message(&mut self, message: &Message);

    /// Prints an error.
    fn print_error(&mut self, error: &str);

    /// Prints an informational line.
    fn print_info(&mut self, info: &str);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    in_response: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            in_response: false,
        }
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn label(&self, sender: Sender) -> String {
        if !self.use_color {
            return format!("{}:", sender.label());
        }
        let color = match sender {
            Sender::User => ANSI_GREEN,
            Sender::Assistant => ANSI_CYAN,
            Sender::System => ANSI_DIM,
        };
        format!("{ANSI_BOLD}{color}{}:{ANSI_RESET}", sender.label())
    }

    fn end_response(&mut self) {
        if self.in_response {
            println!();
            self.in_response = false;
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self) {
        println!("{}", self.label(Sender::Assistant));
        self.in_response = true;
        self.flush();
    }

    fn print_text(&mut self, text: &str) {
        print!("{text}");
        self.flush();
    }

    fn finish_response(&mut self) {
        self.end_response();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.end_response();
        println!("[interrupted]");
        self.flush();
    }

    fn print_message(&mut self, message: &Message) {
        self.end_response();
        if message.sender == Sender::System {
            if message.status == MessageStatus::Error {
                self.print_error(&message.content);
            } else {
                self.print_info(&message.content);
            }
            return;
        }
        println!("{}", self.label(message.sender));
        println!("{}\n", message.content);
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.end_response();
        if self.use_color {
            eprintln!("{ANSI_RED}{error}{ANSI_RESET}");
        } else {
            eprintln!("{error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        self.end_response();
        for line in info.lines() {
            if self.use_color {
                println!("    {ANSI_DIM}{line}{ANSI_RESET}");
            } else {
                println!("    {line}");
            }
        }
        self.flush();
    }
}
