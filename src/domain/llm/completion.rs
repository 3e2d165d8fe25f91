use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use super::{LlmProvider, LlmRequest, Message};
use crate::domain::DomainError;

/// Text-in, text-out completion seam used by every strategy
#[async_trait]
pub trait CompletionService: Send + Sync + Debug {
    async fn complete(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, DomainError>;
}

/// Binds an [`LlmProvider`] to one model name
#[derive(Debug, Clone)]
pub struct ProviderCompletionService {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl ProviderCompletionService {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionService for ProviderCompletionService {
    async fn complete(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, DomainError> {
        let request = LlmRequest::builder()
            .messages(messages)
            .temperature(temperature)
            .max_tokens(max_tokens)
            .build();

        let response = self.provider.chat(&self.model, request).await?;

        Ok(response.content().trim().to_string())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One recorded call to [`ScriptedCompletionService`]
    #[derive(Debug, Clone)]
    pub struct ScriptedCall {
        pub transcript: String,
        pub temperature: f32,
        pub max_tokens: u32,
    }

    #[derive(Debug)]
    struct Rule {
        needle: String,
        replies: Vec<Result<String, String>>,
        hits: AtomicUsize,
    }

    /// Completion service answering by substring rules over the prompt.
    ///
    /// The first rule whose needle occurs in the joined messages answers. A
    /// rule with several replies walks through them and then repeats the last.
    #[derive(Debug, Default)]
    pub struct ScriptedCompletionService {
        rules: Vec<Rule>,
        fallback: Option<String>,
        calls: Mutex<Vec<ScriptedCall>>,
    }

    impl ScriptedCompletionService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
            self.on_sequence(needle, vec![reply.into()])
        }

        pub fn on_sequence(mut self, needle: impl Into<String>, replies: Vec<String>) -> Self {
            self.rules.push(Rule {
                needle: needle.into(),
                replies: replies.into_iter().map(Ok).collect(),
                hits: AtomicUsize::new(0),
            });
            self
        }

        pub fn failing_on(mut self, needle: impl Into<String>, error: impl Into<String>) -> Self {
            self.rules.push(Rule {
                needle: needle.into(),
                replies: vec![Err(error.into())],
                hits: AtomicUsize::new(0),
            });
            self
        }

        pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
            self.fallback = Some(reply.into());
            self
        }

        pub fn calls(&self) -> Vec<ScriptedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_matching(&self, needle: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.transcript.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletionService {
        async fn complete(
            &self,
            messages: Vec<Message>,
            temperature: f32,
            max_tokens: u32,
        ) -> Result<String, DomainError> {
            let transcript = LlmRequest::new(messages).transcript();

            self.calls.lock().unwrap().push(ScriptedCall {
                transcript: transcript.clone(),
                temperature,
                max_tokens,
            });

            if let Some(rule) = self.rules.iter().find(|r| transcript.contains(&r.needle)) {
                let hit = rule.hits.fetch_add(1, Ordering::SeqCst);
                let reply = &rule.replies[hit.min(rule.replies.len() - 1)];
                return reply
                    .clone()
                    .map_err(|e| DomainError::provider("scripted", e));
            }

            self.fallback
                .clone()
                .ok_or_else(|| DomainError::provider("scripted", "No scripted reply"))
        }
    }
}
