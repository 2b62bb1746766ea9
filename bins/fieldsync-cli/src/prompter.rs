//! Operator prompts on the terminal.

use std::io::{self, BufRead, Write};

use fieldsync_engine::Prompter;

/// Asks on stdout and reads answers from stdin.
///
/// When stdin is closed, confirmations are refused and questions go
/// unanswered, which cancels the operation.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_answer(&self, prompt: &str) -> Option<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{}", prompt).ok()?;
        stdout.flush().ok()?;

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, question: &str) -> bool {
        self.read_answer(&format!("{} [y/N] ", question))
            .map_or(false, |answer| answer.to_lowercase().starts_with('y'))
    }

    fn ask(&self, question: &str) -> Option<String> {
        self.read_answer(&format!("{}: ", question))
    }
}
