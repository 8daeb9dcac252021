use std::ffi::CString;
use std::num::NonZeroU32;
use std::path::Path;
use std::pin::pin;

use anyhow::{Context, Result};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaChatTemplate, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use log::{info, warn};

use crate::args_handler::Args;
use crate::engine::{decode_piece, Engine};
use crate::error::ChatError;
use crate::turn::ChatTurn;

const DEFAULT_CTX_SIZE: u32 = 2048;

/// Load the GGUF file at `model_path`, applying the gpu and metadata overrides
/// from the command line.
pub fn load_model(
    backend: &LlamaBackend,
    model_path: &Path,
    args: &Args,
) -> Result<LlamaModel, ChatError> {
    // offload layers to the gpu
    let model_params = {
        if args.n_gpu_layers > 0 {
            LlamaModelParams::default().with_n_gpu_layers(args.n_gpu_layers)
        } else {
            LlamaModelParams::default()
        }
    };

    let mut model_params = pin!(model_params);

    for (k, v) in &args.key_value_overrides {
        let k = CString::new(k.as_bytes())
            .with_context(|| format!("invalid key: {k}"))
            .map_err(ChatError::ModelLoad)?;
        model_params.as_mut().append_kv_override(k.as_c_str(), *v);
    }

    let model = LlamaModel::load_from_file(backend, model_path, &model_params)
        .with_context(|| format!("unable to load {}", model_path.display()))
        .map_err(ChatError::ModelLoad)?;
    info!(
        "loaded {} ({} ctx trained)",
        model_path.display(),
        model.n_ctx_train()
    );
    Ok(model)
}

/// llama.cpp behind the [`Engine`] seam: one context, one sampler chain and
/// the chat template the conversation is rendered with.
pub struct LlamaEngine<'a> {
    ctx: LlamaContext<'a>,
    template: LlamaChatTemplate,
    sampler: LlamaSampler,
    decoder: encoding_rs::Decoder,
    special: bool,
}

impl<'a> LlamaEngine<'a> {
    pub fn new(
        backend: &LlamaBackend,
        model: &'a LlamaModel,
        args: &Args,
    ) -> Result<Self, ChatError> {
        // initialize the context
        let mut ctx_params = LlamaContextParams::default()
            .with_n_ctx(args.ctx_size.or(NonZeroU32::new(DEFAULT_CTX_SIZE)))
            .with_n_batch(args.batch_size);
        if let Some(threads) = args.threads {
            ctx_params = ctx_params.with_n_threads(threads);
        }
        if let Some(threads_batch) = args.threads_batch.or(args.threads) {
            ctx_params = ctx_params.with_n_threads_batch(threads_batch);
        }

        let ctx = model
            .new_context(backend, ctx_params)
            .with_context(|| "unable to create the llama_context")
            .map_err(ChatError::ContextCreate)?;

        let template =
            chat_template(model, args.chat_template.as_deref()).map_err(ChatError::Render)?;

        Ok(Self {
            ctx,
            template,
            sampler: build_sampler(args),
            // tokens may split a utf-8 sequence, the decoder carries the remainder
            decoder: encoding_rs::UTF_8.new_decoder(),
            special: args.special,
        })
    }
}

fn chat_template(model: &LlamaModel, name: Option<&str>) -> Result<LlamaChatTemplate> {
    if let Some(name) = name {
        return LlamaChatTemplate::new(name)
            .with_context(|| format!("invalid chat template name: {name}"));
    }
    match model.chat_template(None) {
        Ok(template) => Ok(template),
        Err(e) => {
            warn!("model has no usable chat template ({e}), falling back to chatml");
            LlamaChatTemplate::new("chatml").with_context(|| "unable to create chatml template")
        }
    }
}

fn build_sampler(args: &Args) -> LlamaSampler {
    if args.temp <= 0.0 {
        return LlamaSampler::greedy();
    }
    LlamaSampler::chain_simple([
        LlamaSampler::top_k(args.top_k),
        LlamaSampler::top_p(args.top_p, 1),
        LlamaSampler::min_p(args.min_p, 1),
        LlamaSampler::temp(args.temp),
        LlamaSampler::dist(args.seed),
    ])
}

impl Engine for LlamaEngine<'_> {
    fn decode(&mut self, tokens: &[LlamaToken], position: u32) -> Result<()> {
        // we use this object to submit token data for decoding
        let mut batch = LlamaBatch::new(tokens.len(), 1);

        let last_index = tokens.len().saturating_sub(1);
        for (i, token) in tokens.iter().enumerate() {
            // llama_decode will output logits only for the last token of the batch
            let is_last = i == last_index;
            batch.add(*token, (position as usize + i) as i32, &[0], is_last)?;
        }

        self.ctx
            .decode(&mut batch)
            .with_context(|| "llama_decode() failed")
    }

    fn sample(&mut self) -> LlamaToken {
        self.sampler.sample(&self.ctx, -1)
    }

    fn accept(&mut self, token: LlamaToken) {
        self.sampler.accept(token);
    }

    fn begin_reply(&mut self) {
        self.decoder = encoding_rs::UTF_8.new_decoder();
    }

    fn token_to_piece(&mut self, token: LlamaToken) -> Result<String> {
        self.ctx
            .model
            .token_to_piece(token, &mut self.decoder, self.special, None)
            .with_context(|| format!("failed to convert token {} to text", token.0))
    }

    fn finish_reply(&mut self) -> String {
        decode_piece(&mut self.decoder, &[], true)
    }

    fn is_end_of_generation(&self, token: LlamaToken) -> bool {
        self.ctx.model.is_eog_token(token)
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<LlamaToken>> {
        let add_bos = if add_bos { AddBos::Always } else { AddBos::Never };
        Ok(self.ctx.model.str_to_token(text, add_bos)?)
    }

    fn render_template(&self, turns: &[ChatTurn], add_assistant: bool) -> Result<String> {
        let chat = turns
            .iter()
            .map(|turn| LlamaChatMessage::new(turn.role.to_string(), turn.text.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self
            .ctx
            .model
            .apply_chat_template(&self.template, &chat, add_assistant)?)
    }

    fn window_size(&self) -> u32 {
        self.ctx.n_ctx()
    }

    fn max_trained_window_size(&self) -> u32 {
        self.ctx.model.n_ctx_train()
    }

    fn timing_report(&mut self) -> String {
        self.ctx.timings().to_string()
    }
}
