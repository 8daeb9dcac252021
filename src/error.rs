use thiserror::Error;

/// The engine refused a batch because the context window is full.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error(
    "ran out of context window at {consumed} tokens; you can use the maximum context window \
     size by passing the flag `-c {max_trained}` to llama-chat."
)]
pub struct ContextOverflow {
    pub consumed: u32,
    pub max_trained: u32,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unable to initialize the llama backend: {0:#}")]
    Backend(anyhow::Error),

    #[error("unable to load model: {0:#}")]
    ModelLoad(anyhow::Error),

    #[error("unable to create the llama_context: {0:#}")]
    ContextCreate(anyhow::Error),

    #[error(transparent)]
    ContextOverflow(#[from] ContextOverflow),

    #[error("failed to render chat turn: {0:#}")]
    Render(anyhow::Error),

    #[error("failed to detokenize sampled token: {0:#}")]
    Detokenize(anyhow::Error),

    #[error("line input failed: {0:#}")]
    Input(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Process exit status for a fatal error. 1 is reserved for bad arguments.
    pub fn exit_code(&self) -> u8 {
        match self {
            ChatError::Backend(_) | ChatError::ModelLoad(_) => 2,
            ChatError::ContextCreate(_) => 3,
            ChatError::ContextOverflow(_) => 4,
            ChatError::Render(_)
            | ChatError::Detokenize(_)
            | ChatError::Input(_)
            | ChatError::Io(_) => 5,
        }
    }
}
