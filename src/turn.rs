use std::fmt;

use anyhow::Context;

use crate::context::ContextAccountant;
use crate::engine::Engine;
use crate::error::ChatError;
use crate::evaluator::evaluate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }
}

/// Render `turn` through the chat template and evaluate it into context.
///
/// The system turn opens the sequence, so it alone gets a BOS marker and no
/// assistant prefix. Returns the rendered prompt text.
pub fn submit_turn<E: Engine>(
    engine: &mut E,
    acct: &mut ContextAccountant,
    turn: ChatTurn,
    n_batch: usize,
) -> Result<String, ChatError> {
    let opening = turn.role == Role::System;
    let rendered = engine
        .render_template(std::slice::from_ref(&turn), !opening)
        .with_context(|| format!("failed to apply chat template to {} turn", turn.role))
        .map_err(ChatError::Render)?;
    let tokens = engine
        .tokenize(&rendered, opening)
        .with_context(|| format!("failed to tokenize {rendered}"))
        .map_err(ChatError::Render)?;

    evaluate(engine, acct, &tokens, n_batch)?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{ScriptedEngine, BOS};

    #[test]
    fn roles_render_as_template_role_names() {
        assert_eq!(ChatTurn::system("x").role.to_string(), "system");
        assert_eq!(ChatTurn::user("x").role.to_string(), "user");
    }

    #[test]
    fn system_turn_opens_with_bos_and_no_reply_prefix() {
        let mut engine = ScriptedEngine::new(32);
        let mut acct = ContextAccountant::new(32, 32);
        let rendered =
            submit_turn(&mut engine, &mut acct, ChatTurn::system("be brief"), 512).unwrap();

        assert_eq!(rendered, "system: be brief");
        assert_eq!(engine.decoded[0].0[0], BOS);
        assert_eq!(acct.consumed(), 4);
    }

    #[test]
    fn user_turn_asks_for_a_reply() {
        let mut engine = ScriptedEngine::new(32);
        let mut acct = ContextAccountant::new(32, 32);
        let rendered = submit_turn(&mut engine, &mut acct, ChatTurn::user("a b c"), 2).unwrap();

        assert_eq!(rendered, "user: a b c assistant:");
        assert!(!engine.decoded[0].0.contains(&BOS));
        assert_eq!(engine.decoded.len(), 3);
        assert_eq!(acct.consumed(), 5);
    }

    #[test]
    fn overflowing_turn_is_fatal() {
        let mut engine = ScriptedEngine::new(3);
        let mut acct = ContextAccountant::new(3, 64);
        let err = submit_turn(&mut engine, &mut acct, ChatTurn::user("a b c"), 8).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert_eq!(acct.consumed(), 0);
    }
}
