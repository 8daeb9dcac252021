use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use log::debug;
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Context, EditMode, Editor, Helper};

use crate::commands::COMPLETIONS;

const BRIGHT_GREEN: &str = "\x1b[92m";
const UNFOREGROUND: &str = "\x1b[39m";
const HISTORY_FILE: &str = ".llama-chat_history";

/// Where the session reads the user's lines from.
pub trait LineSource {
    /// Block until a line is available. `None` means end of input.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Commands whose name starts with what has been typed so far.
pub fn complete_command(typed: &str) -> Vec<String> {
    COMPLETIONS
        .iter()
        .filter(|c| c.starts_with(typed))
        .map(|c| c.to_string())
        .collect()
}

struct ChatHelper;

impl Completer for ChatHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        Ok((0, complete_command(&line[..pos])))
    }
}

impl Hinter for ChatHelper {
    type Hint = String;
}

impl Highlighter for ChatHelper {}

impl Validator for ChatHelper {}

impl Helper for ChatHelper {}

/// Prompt text that leaves the foreground colour switched on, so whatever
/// the user types after it shows up in bright green too.
pub fn typed_prompt(prompt: &str, color: bool) -> String {
    if color {
        format!("{BRIGHT_GREEN}{prompt}")
    } else {
        prompt.to_string()
    }
}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}

/// Terminal line editor with command completion and line history kept in
/// `~/.llama-chat_history` across runs.
pub struct Terminal {
    editor: Editor<ChatHelper, DefaultHistory>,
    history: Option<PathBuf>,
    color: bool,
}

impl Terminal {
    pub fn new(vi_mode: bool) -> Result<Self> {
        let edit_mode = if vi_mode { EditMode::Vi } else { EditMode::Emacs };
        let config = Config::builder()
            .edit_mode(edit_mode)
            .auto_add_history(true)
            .build();
        let mut editor: Editor<ChatHelper, DefaultHistory> = Editor::with_config(config)
            .with_context(|| "unable to set up the line editor")?;
        editor.set_helper(Some(ChatHelper));

        let history = history_path();
        if let Some(path) = &history {
            if let Err(e) = editor.load_history(path) {
                debug!("no line history loaded from {}: {e}", path.display());
            }
        }

        Ok(Self {
            editor,
            history,
            color: console::colors_enabled(),
        })
    }

    fn save_history(&mut self) {
        if let Some(path) = &self.history {
            if let Err(e) = self.editor.save_history(path) {
                debug!("failed to save line history to {}: {e}", path.display());
            }
        }
    }

    fn reset_color(&self) {
        if !self.color {
            return;
        }
        let mut stdout = io::stdout();
        if let Err(e) = write!(stdout, "{UNFOREGROUND}").and_then(|()| stdout.flush()) {
            debug!("failed to reset prompt colour: {e}");
        }
    }
}

impl LineSource for Terminal {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        let readline = self.editor.readline(&typed_prompt(prompt, self.color));
        self.reset_color();
        match readline {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.save_history();
                }
                Ok(Some(line))
            }
            // ctrl-c at the prompt throws away the line being typed
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(e) => Err(e).with_context(|| "failed to read line"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_command_prefixes() {
        assert_eq!(complete_command("/s"), vec!["/stats"]);
        assert_eq!(complete_command("/"), vec!["/context", "/stats"]);
        assert!(complete_command("hello").is_empty());
        assert!(complete_command("/contexts").is_empty());
    }

    #[test]
    fn typed_prompt_leaves_colour_on_for_the_input() {
        let prompt = typed_prompt(">>> ", true);
        assert!(prompt.starts_with(BRIGHT_GREEN));
        assert!(prompt.ends_with(">>> "));
        assert!(!prompt.contains(UNFOREGROUND));
        assert_eq!(typed_prompt(">>> ", false), ">>> ");
    }
}
