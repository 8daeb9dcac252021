use anyhow::{anyhow, Context};
use std::num::NonZeroU32;
use std::path::PathBuf;
use clap::{Parser, Subcommand};
use hf_hub::api::sync::ApiBuilder;
use llama_cpp_2::model::params::kv_overrides::ParamOverrideValue;
use std::str::FromStr;

pub const DEFAULT_SYSTEM_PROMPT: &str = "A chat between a curious human and an artificial \
intelligence assistant. The assistant gives helpful, detailed, and polite answers to the \
human's questions.";

#[derive(Subcommand, Debug, Clone)]
pub enum Model {
    /// Use an already downloaded model
    #[clap(name = "local")]
    Local {
        /// The path to the model. e.g. `../hub/models--TheBloke--Llama-2-7B-Chat-GGUF/blobs/08a5566d61d7cb6b420c3e4387a39e0078e1f2fe5f055f3a03887385304d4bfa`
        /// or `./llama-3.2-1b-instruct-q8_0.gguf`
        path: PathBuf,
    },
    /// Download a model from huggingface (or use a cached version)
    #[clap(name = "hf-model")]
    HuggingFace {
        /// the repo containing the model. e.g. `bartowski/Llama-3.2-1B-Instruct-GGUF`
        repo: String,
        /// the model name. e.g. `Llama-3.2-1B-Instruct-Q4_K_M.gguf`
        model: String,
    },
}

impl Model {
    /// Convert the model to a path - may download from huggingface
    pub fn get_or_load(self) -> anyhow::Result<PathBuf> {
        match self {
            Model::Local { path } => Ok(path),
            Model::HuggingFace { model, repo } => ApiBuilder::new()
                .with_progress(true)
                .build()
                .with_context(|| "unable to create huggingface api")?
                .model(repo)
                .get(&model)
                .with_context(|| "unable to download model"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Chat with a local GGUF model from the terminal")]
pub struct Args {
    /// The path to the model
    #[command(subcommand)]
    pub model: Model,

    /// size of the context window in tokens
    #[clap(
        short = 'c',
        long,
        help = "size of the context window in tokens (default: 2048)"
    )]
    pub ctx_size: Option<NonZeroU32>,

    /// max number of prompt tokens handed to the model in one decode call
    #[clap(short = 'b', long, default_value_t = 512, value_parser = clap::value_parser!(u32).range(1..))]
    pub batch_size: u32,

    /// the system prompt opening the conversation
    #[clap(short = 'p', long, default_value = DEFAULT_SYSTEM_PROMPT, hide_default_value = true)]
    pub system_prompt: String,

    /// name of a built-in chat template (e.g. `chatml`, `llama3`) to use instead of the model's own
    #[clap(long)]
    pub chat_template: Option<String>,

    /// override some parameters of the model
    #[clap(short = 'o', value_parser = parse_key_val)]
    pub key_value_overrides: Vec<(String, ParamOverrideValue)>,

    /// how many layers to keep on the gpu - zero is cpu mode
    #[clap(short = 'g', long, default_value_t = 0)]
    pub n_gpu_layers: u32,

    /// set the seed for the RNG
    #[clap(short = 's', long, default_value_t = 561371)]
    pub seed: u32,

    /// sampling temperature - zero or less picks the most likely token
    #[clap(long, default_value_t = 0.8, allow_negative_numbers = true)]
    pub temp: f32,

    #[clap(long, default_value_t = 40)]
    pub top_k: i32,

    #[clap(long, default_value_t = 0.95)]
    pub top_p: f32,

    #[clap(long, default_value_t = 0.05)]
    pub min_p: f32,

    /// number of threads to use during generation
    #[clap(
        long,
        help = "number of threads to use during generation (default: use all available threads)"
    )]
    pub threads: Option<i32>,
    #[clap(
        long,
        help = "number of threads to use during batch and prompt processing (default: use all available threads)"
    )]
    pub threads_batch: Option<i32>,

    /// print special tokens and the rendered system prompt
    #[clap(long, action)]
    pub special: bool,

    /// use vi key bindings at the prompt
    #[clap(long, action)]
    pub vi: bool,

    /// show llama.cpp logs, debug logging and the token/s speed at the end of each turn
    #[clap(short = 'v', long, action)]
    pub verbose: bool,
}

/// Parse a single key-value pair
fn parse_key_val(s: &str) -> anyhow::Result<(String, ParamOverrideValue)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    let value = i64::from_str(value)
        .map(ParamOverrideValue::Int)
        .or_else(|_| f64::from_str(value).map(ParamOverrideValue::Float))
        .or_else(|_| bool::from_str(value).map(ParamOverrideValue::Bool))
        .map_err(|_| anyhow!("must be one of i64, f64, or bool"))?;

    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("llama-chat").chain(argv.iter().copied()))
    }

    #[test]
    fn defaults_for_a_local_model() {
        let args = parse(&["local", "./model.gguf"]).unwrap();
        assert!(matches!(args.model, Model::Local { ref path } if path == &PathBuf::from("./model.gguf")));
        assert_eq!(args.ctx_size, None);
        assert_eq!(args.batch_size, 512);
        assert_eq!(args.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(args.seed, 561371);
        assert!(!args.special && !args.verbose && !args.vi);
    }

    #[test]
    fn options_come_before_the_model_source() {
        let args = parse(&[
            "-c", "8192", "-b", "64", "-p", "be terse", "--temp", "0",
            "hf-model", "org/repo", "file.gguf",
        ])
        .unwrap();
        assert_eq!(args.ctx_size.map(NonZeroU32::get), Some(8192));
        assert_eq!(args.batch_size, 64);
        assert_eq!(args.system_prompt, "be terse");
        assert_eq!(args.temp, 0.0);
        assert!(matches!(args.model, Model::HuggingFace { .. }));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(parse(&["-c", "0", "local", "m.gguf"]).is_err());
        assert!(parse(&["-b", "0", "local", "m.gguf"]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn key_value_overrides_pick_the_narrowest_type() {
        assert!(matches!(parse_key_val("a=3").unwrap(), (k, ParamOverrideValue::Int(3)) if k == "a"));
        assert!(matches!(parse_key_val("b=0.5").unwrap().1, ParamOverrideValue::Float(f) if f == 0.5));
        assert!(matches!(parse_key_val("c=true").unwrap().1, ParamOverrideValue::Bool(true)));
        assert!(parse_key_val("d=maybe").is_err());
        assert!(parse_key_val("no-equals").is_err());
    }
}
