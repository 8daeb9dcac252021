use llama_cpp_2::token::LlamaToken;
use log::debug;

use crate::context::ContextAccountant;
use crate::engine::Engine;
use crate::error::ContextOverflow;

/// Feed `tokens` to the engine `n_batch` at a time, each chunk placed at the
/// current end of the context.
///
/// The accountant only moves once the engine has taken a chunk, so a failed
/// chunk leaves the count where the previous one ended.
pub fn evaluate<E: Engine>(
    engine: &mut E,
    acct: &mut ContextAccountant,
    tokens: &[LlamaToken],
    n_batch: usize,
) -> Result<(), ContextOverflow> {
    for chunk in tokens.chunks(n_batch.max(1)) {
        let position = acct.consumed();
        if let Err(e) = engine.decode(chunk, position) {
            debug!("decode of {} tokens at {position} failed: {e:#}", chunk.len());
            return Err(acct.overflow());
        }
        acct.advance(chunk.len() as u32)?;
    }
    Ok(())
}

/// Evaluate one sampled token.
pub fn evaluate_token<E: Engine>(
    engine: &mut E,
    acct: &mut ContextAccountant,
    token: LlamaToken,
) -> Result<(), ContextOverflow> {
    evaluate(engine, acct, &[token], 1)
}
