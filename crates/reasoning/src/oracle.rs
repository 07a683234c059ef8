use crate::error::{OracleError, Result};
use crate::prompt::StructuredPrompt;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// The external reasoning capability.
///
/// Returns raw text; the engine owns parsing so that malformed output is
/// handled the same way for every oracle.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn reason(&self, prompt: &StructuredPrompt) -> Result<String>;
}

/// One canned answer of a [`ScriptedOracle`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    Text(String),
    Unavailable,
    /// Sleep before answering, to exercise timeouts
    Delayed(Duration, String),
}

/// Replays a fixed script and records every prompt it receives.
///
/// Replies are consumed in order; once the script runs out the fallback is
/// repeated.
#[derive(Debug)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    seen: Mutex<Vec<StructuredPrompt>>,
}

impl ScriptedOracle {
    pub fn new(script: impl IntoIterator<Item = ScriptedReply>, fallback: ScriptedReply) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `text`
    pub fn constant(text: impl Into<String>) -> Self {
        Self::new([], ScriptedReply::Text(text.into()))
    }

    pub fn prompts(&self) -> Vec<StructuredPrompt> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn reason(&self, prompt: &StructuredPrompt) -> Result<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());
        let reply = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Unavailable => Err(OracleError::unavailable("scripted outage")),
            ScriptedReply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }
}
