//! IRC style commands like `/arg0 arg1 arg2`, typed at the chat prompt.

use std::io::{self, Write};

use crate::context::ContextAccountant;
use crate::engine::Engine;

/// Offered by tab completion at the prompt.
pub const COMPLETIONS: &[&str] = &["/context", "/stats"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Stats,
    Context,
    Unknown(String),
}

impl Command {
    /// A line is a command when it starts with `/` followed by a letter.
    /// Anything else, a bare `/` included, is chat text.
    pub fn parse(line: &str) -> Option<Command> {
        let rest = line.strip_prefix('/')?;
        if !rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return None;
        }
        let mut args = rest.split_whitespace();
        let name = args.next()?;
        Some(match name {
            "stats" => Command::Stats,
            "context" => Command::Context,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// Run `line` if it is a command. Returns whether it was one.
pub fn dispatch<E: Engine, W: Write>(
    line: &str,
    engine: &mut E,
    acct: &ContextAccountant,
    out: &mut W,
) -> io::Result<bool> {
    let Some(command) = Command::parse(line) else {
        return Ok(false);
    };
    match command {
        Command::Stats => {
            writeln!(out, "{}", engine.timing_report().trim_end())?;
        }
        Command::Context => {
            let window = acct.window();
            writeln!(
                out,
                "{} out of {} context tokens used ({} tokens remaining)",
                acct.consumed(),
                window,
                acct.remaining_capacity()
            )?;
            if window < acct.max_trained() {
                writeln!(
                    out,
                    "use the `-c {}` flag at startup for maximum context",
                    acct.max_trained()
                )?;
            }
        }
        Command::Unknown(name) => {
            writeln!(out, "{name}: unrecognized command")?;
        }
    }
    out.flush()?;
    Ok(true)
}
