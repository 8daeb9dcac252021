use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use console::style;
use log::debug;

use crate::commands;
use crate::context::ContextAccountant;
use crate::engine::Engine;
use crate::error::ChatError;
use crate::generation::{generate, Generation};
use crate::input::LineSource;
use crate::turn::{submit_turn, ChatTurn};

/// What became of one line of user input.
#[derive(Debug)]
pub enum Routed {
    Blank,
    Command,
    /// The turn could not be rendered; nothing reached the context.
    Rejected,
    Reply(Generation),
}

/// A running conversation: the engine, its context book-keeping and the
/// interrupt flag raised by ctrl-c.
pub struct Session<E: Engine> {
    engine: E,
    acct: ContextAccountant,
    interrupt: Arc<AtomicBool>,
    n_batch: usize,
    verbose: bool,
}

impl<E: Engine> Session<E> {
    pub fn new(engine: E, interrupt: Arc<AtomicBool>, n_batch: usize) -> Self {
        let acct = ContextAccountant::new(engine.window_size(), engine.max_trained_window_size());
        Self {
            engine,
            acct,
            interrupt,
            n_batch,
            verbose: false,
        }
    }

    /// Report token/s on stderr after each reply.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn accountant(&self) -> &ContextAccountant {
        &self.acct
    }

    /// Put the system prompt in context. Returns the rendered template.
    pub fn start(&mut self, system_prompt: &str) -> Result<String, ChatError> {
        let rendered = submit_turn(
            &mut self.engine,
            &mut self.acct,
            ChatTurn::system(system_prompt),
            self.n_batch,
        )?;
        debug!("system prompt uses {} tokens", self.acct.consumed());
        Ok(rendered)
    }

    pub fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> Result<Routed, ChatError> {
        if line.trim().is_empty() {
            return Ok(Routed::Blank);
        }
        if commands::dispatch(line, &mut self.engine, &self.acct, out)? {
            return Ok(Routed::Command);
        }

        match submit_turn(&mut self.engine, &mut self.acct, ChatTurn::user(line), self.n_batch) {
            Ok(_) => {}
            Err(ChatError::Render(e)) => {
                eprintln!("{}", style(format!("error: {e:#}")).red().bright());
                return Ok(Routed::Rejected);
            }
            Err(e) => return Err(e),
        }

        let generation = generate(&mut self.engine, &mut self.acct, &self.interrupt, out);
        // a ctrl-c that landed after the last check must not cancel the next reply
        self.interrupt.store(false, Ordering::SeqCst);
        let generation = generation?;

        if self.verbose {
            eprintln!(
                "{}",
                style(format!(
                    "decoded {} tokens in {:.2} s, speed {:.2} t/s",
                    generation.n_decode,
                    generation.elapsed.as_secs_f32(),
                    generation.tokens_per_second()
                ))
                .dim()
            );
        }
        Ok(Routed::Reply(generation))
    }

    /// Read and answer lines until the input runs out.
    pub fn run<L: LineSource, W: Write>(
        &mut self,
        input: &mut L,
        out: &mut W,
    ) -> Result<(), ChatError> {
        while let Some(line) = input.read_line(">>> ").map_err(ChatError::Input)? {
            if let Routed::Reply(generation) = self.handle_line(&line, out)? {
                debug!(
                    "{:?} after {} tokens, {} of {} context tokens used",
                    generation.outcome,
                    generation.n_decode,
                    self.acct.consumed(),
                    self.acct.window()
                );
            }
        }
        Ok(())
    }
}
