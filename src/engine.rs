use anyhow::Result;
use llama_cpp_2::token::LlamaToken;

use crate::turn::ChatTurn;

/// The inference engine as seen by the chat loop.
///
/// All calls happen on the session thread. `decode` failing is the engine's
/// only signal that the context window cannot take the batch.
pub trait Engine {
    /// Evaluate `tokens` starting at absolute position `position`.
    fn decode(&mut self, tokens: &[LlamaToken], position: u32) -> Result<()>;

    /// Pick the next token from the logits of the last evaluated token.
    fn sample(&mut self) -> LlamaToken;

    /// Fold `token` into the sampling history.
    fn accept(&mut self, token: LlamaToken);

    /// Start a fresh reply: drop any partial UTF-8 sequence left over from
    /// the previous one.
    fn begin_reply(&mut self);

    fn token_to_piece(&mut self, token: LlamaToken) -> Result<String>;

    /// Text still held back by the detokenizer once the reply is complete.
    fn finish_reply(&mut self) -> String;

    fn is_end_of_generation(&self, token: LlamaToken) -> bool;

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<LlamaToken>>;

    /// Format `turns` with the model's chat template. `add_assistant` appends
    /// the prefix that prompts the assistant for a reply.
    fn render_template(&self, turns: &[ChatTurn], add_assistant: bool) -> Result<String>;

    fn window_size(&self) -> u32;

    fn max_trained_window_size(&self) -> u32;

    fn timing_report(&mut self) -> String;
}

/// Push `bytes` through a streaming UTF-8 decoder. With `last` set, an
/// unfinished sequence is flushed as U+FFFD.
pub fn decode_piece(decoder: &mut encoding_rs::Decoder, bytes: &[u8], last: bool) -> String {
    let capacity = decoder
        .max_utf8_buffer_length(bytes.len())
        .unwrap_or(bytes.len() * 3 + 4);
    let mut piece = String::with_capacity(capacity);
    // capacity covers the worst case, so the whole input is always consumed
    let _ = decoder.decode_to_string(bytes, &mut piece, last);
    piece
}
