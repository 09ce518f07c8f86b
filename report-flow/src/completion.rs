//! The narrow seam every language-model call goes through.
//!
//! Engine code never talks to a provider directly: it holds an
//! `Arc<dyn TextCompletion>` so ids, gating and fallbacks stay testable with
//! a scripted fake. The rig-backed adapter lives behind the `rig` feature.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::ModelCallError;

/// `invoke(system_prompt, user_prompt) -> text`
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ModelCallError>;
}

/// Removes a surrounding Markdown code fence (```` ```json ```` or bare
/// ```` ``` ````) and outer whitespace.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. `json`) up to the end of the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Strips fences and parses strictly. A parse failure is an expected outcome
/// of a model call, reported as a [`ModelCallError`] for the caller to absorb.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T, ModelCallError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(cleaned).map_err(|e| {
        ModelCallError::new(format!(
            "could not parse model response as JSON: {e}. Raw response: {}",
            preview(raw)
        ))
    })
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 200;
    if raw.chars().count() <= LIMIT {
        raw.to_string()
    } else {
        format!("{}...", raw.chars().take(LIMIT).collect::<String>())
    }
}

#[cfg(feature = "rig")]
pub use self::rig_adapter::RigCompletion;

#[cfg(feature = "rig")]
mod rig_adapter {
    use async_trait::async_trait;
    use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
    use tracing::debug;

    use super::TextCompletion;
    use crate::error::ModelCallError;

    /// OpenRouter-backed completion; one agent per call so each call carries
    /// its own system prompt as the preamble.
    pub struct RigCompletion {
        client: openrouter::Client,
        model: String,
        temperature: f64,
    }

    impl RigCompletion {
        pub fn new(api_key: &str, model: impl Into<String>, temperature: f64) -> Self {
            Self {
                client: openrouter::Client::new(api_key),
                model: model.into(),
                temperature,
            }
        }
    }

    #[async_trait]
    impl TextCompletion for RigCompletion {
        async fn invoke(
            &self,
            system_prompt: &str,
            user_prompt: &str,
        ) -> Result<String, ModelCallError> {
            debug!(model = %self.model, prompt_len = user_prompt.len(), "invoking model");
            let agent = self
                .client
                .agent(&self.model)
                .preamble(system_prompt)
                .temperature(self.temperature)
                .build();
            agent
                .prompt(user_prompt)
                .await
                .map_err(|e| ModelCallError::new(e.to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::TextCompletion;
    use crate::error::ModelCallError;

    /// Replays queued responses in order and records every prompt it saw.
    /// An exhausted script fails the call.
    #[derive(Default)]
    pub struct ScriptedCompletion {
        replies: Mutex<VecDeque<Result<String, ModelCallError>>>,
        pub prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedCompletion {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, text: impl Into<String>) -> Self {
            self.replies.lock().unwrap().push_back(Ok(text.into()));
            self
        }

        pub fn fail(self, message: &str) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(ModelCallError::new(message)));
            self
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn user_prompt(&self, index: usize) -> String {
            self.prompts.lock().unwrap()[index].1.clone()
        }
    }

    #[async_trait]
    impl TextCompletion for ScriptedCompletion {
        async fn invoke(
            &self,
            system_prompt: &str,
            user_prompt: &str,
        ) -> Result<String, ModelCallError> {
            self.prompts
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelCallError::new("script exhausted")))
        }
    }
}
