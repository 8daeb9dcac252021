#![allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

mod args_handler;
mod commands;
mod context;
mod engine;
mod error;
mod evaluator;
mod generation;
mod input;
mod llm;
mod session;
mod turn;

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use console::{style, Term};
use llama_cpp_2::llama_backend::LlamaBackend;
use log::{debug, info};

use args_handler::Args;
use error::ChatError;
use input::Terminal;
use llm::LlamaEngine;
use session::Session;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // --help and --version land here too
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("fatal: {e:?}");
            eprintln!("\n{}", style(format!("error: {e}")).red().bright());
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Everything between argument parsing and exit. Engine handles are locals
/// here so they are released before `main` reports how the session ended.
fn run(args: Args) -> Result<(), ChatError> {
    let model_path = args
        .model
        .clone()
        .get_or_load()
        .with_context(|| "failed to get model from args")
        .map_err(ChatError::ModelLoad)?;

    print_banner(&model_path);

    print_ephemeral("initializing backend...");
    let mut backend = LlamaBackend::init()
        .with_context(|| "could not initialize llama backend")
        .map_err(ChatError::Backend)?;
    if !args.verbose {
        backend.void_logs();
    }
    clear_ephemeral();

    print_ephemeral("initializing model...");
    let model = llm::load_model(&backend, &model_path, &args)?;
    clear_ephemeral();

    print_ephemeral("initializing context...");
    let engine = LlamaEngine::new(&backend, &model, &args)?;
    clear_ephemeral();

    let interrupt = Arc::new(AtomicBool::new(false));
    let mut session = Session::new(engine, Arc::clone(&interrupt), args.batch_size as usize)
        .with_verbose(args.verbose);
    info!(
        "context window {} tokens, model trained on {}",
        session.accountant().window(),
        session.accountant().max_trained()
    );

    print_ephemeral("loading prompt...");
    let rendered = session.start(&args.system_prompt)?;
    clear_ephemeral();
    println!(
        "{}",
        if args.special {
            rendered.as_str()
        } else {
            args.system_prompt.as_str()
        }
    );

    // from here on ctrl-c cancels the reply in progress instead of the process
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupt))?;

    let mut terminal = Terminal::new(args.vi).map_err(ChatError::Input)?;
    session.run(&mut terminal, &mut io::stdout())
}

fn print_banner(model_path: &Path) {
    let model_name = model_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    println!(
        "{}: llama-chat {}\n{}:    {}\n",
        style("software").bold(),
        env!("CARGO_PKG_VERSION"),
        style("model").bold(),
        model_name
    );
}

fn print_ephemeral(description: &str) {
    eprint!(" {}\r", style(description).black().bright());
}

fn clear_ephemeral() {
    if let Err(e) = Term::stderr().clear_line() {
        debug!("failed to clear progress line: {e}");
    }
}
