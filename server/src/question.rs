//! Question source seam
//!
//! The broker never decides what to ask. Each examiner message draws the
//! next question for the session from an injected [`QuestionSource`].

use async_trait::async_trait;

/// Supplies exam questions keyed by session and turn
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Produce the question for `turn` (1-based) of `session_id`
    async fn next_question(&self, session_id: &str, turn: u64) -> anyhow::Result<String>;
}

/// Stand-in source yielding a random token per turn
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderQuestions;

#[async_trait]
impl QuestionSource for PlaceholderQuestions {
    async fn next_question(&self, _session_id: &str, _turn: u64) -> anyhow::Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
