use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::context::ContextAccountant;
use crate::engine::Engine;
use crate::error::ChatError;
use crate::evaluator::evaluate_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The model produced its end-of-generation token.
    Done,
    /// The user interrupted before the reply was finished.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct Generation {
    pub outcome: Outcome,
    /// Tokens streamed to the user.
    pub n_decode: usize,
    pub elapsed: Duration,
}

impl Generation {
    pub fn tokens_per_second(&self) -> f32 {
        let secs = self.elapsed.as_secs_f32();
        if secs > 0.0 {
            self.n_decode as f32 / secs
        } else {
            0.0
        }
    }
}

/// Sample the assistant's reply one token at a time, streaming each piece to
/// `out` as soon as it is known.
///
/// `interrupt` is checked once per token, before sampling. Whatever was
/// streamed before an interrupt stays in the context.
pub fn generate<E: Engine, W: Write>(
    engine: &mut E,
    acct: &mut ContextAccountant,
    interrupt: &AtomicBool,
    out: &mut W,
) -> Result<Generation, ChatError> {
    let t_main_start = Instant::now();
    let mut n_decode = 0;
    engine.begin_reply();

    let outcome = loop {
        if interrupt.swap(false, Ordering::SeqCst) {
            break Outcome::Cancelled;
        }

        let new_token_id = engine.sample();
        engine.accept(new_token_id);

        // the end marker closes the assistant turn in context but is never printed
        if engine.is_end_of_generation(new_token_id) {
            evaluate_token(engine, acct, new_token_id)?;
            write!(out, "{}", engine.finish_reply())?;
            break Outcome::Done;
        }

        let piece = engine
            .token_to_piece(new_token_id)
            .map_err(ChatError::Detokenize)?;
        write!(out, "{piece}")?;
        out.flush()?;

        evaluate_token(engine, acct, new_token_id)?;
        n_decode += 1;
    };

    writeln!(out)?;
    out.flush()?;

    Ok(Generation {
        outcome,
        n_decode,
        elapsed: t_main_start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{ScriptedEngine, EOG};
    use crate::error::ContextOverflow;
    use llama_cpp_2::token::LlamaToken;
    use std::sync::Arc;

    fn run(
        engine: &mut ScriptedEngine,
        acct: &mut ContextAccountant,
        flag: &AtomicBool,
    ) -> (Result<Generation, ChatError>, String) {
        let mut out = Vec::new();
        let result = generate(engine, acct, flag, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn streams_reply_until_end_marker() {
        let mut engine = ScriptedEngine::new(64).with_reply(&[7, 8, 9]);
        let mut acct = ContextAccountant::new(64, 64);
        let flag = AtomicBool::new(false);

        let (result, text) = run(&mut engine, &mut acct, &flag);
        let generation = result.unwrap();

        assert_eq!(generation.outcome, Outcome::Done);
        assert_eq!(generation.n_decode, 3);
        assert_eq!(text, "<7><8><9>\n");
        // three reply tokens plus the end marker
        assert_eq!(acct.consumed(), 4);
        assert_eq!(engine.decoded.last().unwrap().0, vec![EOG]);
        assert_eq!(
            engine.accepted,
            vec![LlamaToken(7), LlamaToken(8), LlamaToken(9), EOG]
        );
        assert!(engine.decoded.iter().all(|(chunk, _)| chunk.len() == 1));
    }

    #[test]
    fn interrupt_stops_sampling_and_keeps_streamed_tokens() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut engine = ScriptedEngine::new(64).with_reply(&[7, 8, 9, 10]);
        engine.interrupt_after = Some((2, Arc::clone(&flag)));
        let mut acct = ContextAccountant::new(64, 64);

        let (result, text) = run(&mut engine, &mut acct, &flag);
        let generation = result.unwrap();

        assert_eq!(generation.outcome, Outcome::Cancelled);
        assert_eq!(text, "<7><8>\n");
        assert_eq!(acct.consumed(), 2);
        assert_eq!(engine.script.len(), 2);
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn pending_interrupt_cancels_before_first_sample() {
        let mut engine = ScriptedEngine::new(64).with_reply(&[7]);
        let mut acct = ContextAccountant::new(64, 64);
        let flag = AtomicBool::new(true);

        let (result, text) = run(&mut engine, &mut acct, &flag);

        assert_eq!(result.unwrap().outcome, Outcome::Cancelled);
        assert_eq!(text, "\n");
        assert!(engine.accepted.is_empty());
        assert_eq!(acct.consumed(), 0);
    }

    #[test]
    fn sampled_token_past_the_window_overflows() {
        let mut engine = ScriptedEngine::new(10).with_reply(&[7, 8]);
        engine.max_trained = 4096;
        let mut acct = ContextAccountant::new(10, 4096);
        acct.advance(9).unwrap();

        let (result, text) = run(&mut engine, &mut acct, &flag_off());

        match result {
            Err(ChatError::ContextOverflow(overflow)) => {
                assert_eq!(overflow, ContextOverflow { consumed: 10, max_trained: 4096 })
            }
            other => panic!("expected overflow, got {other:?}"),
        }
        assert_eq!(text, "<7><8>");
        assert_eq!(acct.consumed(), 10);
    }

    #[test]
    fn cancelled_partial_character_does_not_leak_into_next_reply() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut engine = ScriptedEngine::new(64).with_reply(&[300]);
        // first half of a four byte emoji
        engine.bytes.insert(300, vec![0xF0, 0x9F]);
        engine.bytes.insert(301, b"Hi".to_vec());
        engine.interrupt_after = Some((1, Arc::clone(&flag)));
        let mut acct = ContextAccountant::new(64, 64);

        let (result, text) = run(&mut engine, &mut acct, &flag);
        assert_eq!(result.unwrap().outcome, Outcome::Cancelled);
        assert_eq!(text, "\n");

        engine.interrupt_after = None;
        engine.script.push_back(LlamaToken(301));
        let (result, text) = run(&mut engine, &mut acct, &flag);
        assert_eq!(result.unwrap().outcome, Outcome::Done);
        assert_eq!(text, "Hi\n");
    }

    #[test]
    fn unfinished_character_is_flushed_at_end_marker() {
        let mut engine = ScriptedEngine::new(64).with_reply(&[300, 301]);
        engine.bytes.insert(300, "é".as_bytes().to_vec());
        engine.bytes.insert(301, vec![0xE2, 0x82]);
        let mut acct = ContextAccountant::new(64, 64);

        let (result, text) = run(&mut engine, &mut acct, &flag_off());

        assert_eq!(result.unwrap().outcome, Outcome::Done);
        assert_eq!(text, "é\u{FFFD}\n");
    }

    fn flag_off() -> AtomicBool {
        AtomicBool::new(false)
    }
}
