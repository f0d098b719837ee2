//! Tutor chat.
//!
//! A [`Conversation`] is the ordered list of user / assistant turns stored in
//! the session. [`ConversationEngine::respond`] adds the user's message,
//! sends a system prompt plus as much recent history as fits the token
//! budget, and appends the reply.
//!
//! The system prompt counts against the token budget first; the rest goes to
//! history, trimmed from the oldest end one whole turn at a time. The newest
//! user turn is always sent, even if it alone exceeds the budget.
//!
//! The stored conversation is capped separately at `history_turns`.

use serde::{Deserialize, Serialize};

use crate::chunk::estimate_tokens;
use crate::error::{Result, StudyError};
use crate::llm::{ChatRequest, LlmClient};
use crate::models::{PassageHit, Role, Turn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drops the oldest turns beyond `max`. A leading assistant turn left
    /// without its question is dropped too.
    pub fn retain_recent(&mut self, max: usize) {
        if self.turns.len() > max {
            let excess = self.turns.len() - max;
            self.turns.drain(..excess);
        }
        if self.turns.first().map(|t| t.role) == Some(Role::Assistant) {
            self.turns.remove(0);
        }
    }
}

/// Who the tutor is talking to and what it can see.
#[derive(Debug, Clone, Default)]
pub struct Grounding {
    pub user_name: String,
    pub subject: String,
    /// Summary of the slide currently on screen.
    pub current_slide: Option<String>,
    pub passages: Vec<PassageHit>,
}

impl Grounding {
    fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are a personal tutor. Your purpose is to help {} study and better understand {}. \
             Answer from the study material below when it is relevant and say so when it does not \
             cover the question.",
            display_or(&self.user_name, "the learner"),
            display_or(&self.subject, "their subject"),
        );
        if let Some(slide) = &self.current_slide {
            prompt.push_str(&format!(
                "\n\nWe are now discussing the slide with the following content: {}",
                slide
            ));
        }
        if !self.passages.is_empty() {
            prompt.push_str("\n\nStudy material:");
            for hit in &self.passages {
                prompt.push_str(&format!("\n\n[{}]\n{}", hit.filename, hit.text));
            }
        }
        prompt
    }
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

const DEFAULT_HISTORY_TURNS: usize = 100;

pub struct ConversationEngine<'a> {
    llm: &'a dyn LlmClient,
    context_tokens: usize,
    history_turns: usize,
}

impl<'a> ConversationEngine<'a> {
    pub fn new(llm: &'a dyn LlmClient, context_tokens: usize) -> Self {
        Self {
            llm,
            context_tokens,
            history_turns: DEFAULT_HISTORY_TURNS,
        }
    }

    pub fn with_history_limit(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    /// Sends `message` and returns the reply. On failure the conversation is
    /// left exactly as it was.
    pub async fn respond(
        &self,
        conversation: &mut Conversation,
        message: &str,
        grounding: &Grounding,
    ) -> Result<String> {
        let message = message.trim();
        if message.is_empty() {
            return Err(StudyError::InvalidInput("message must not be empty".into()));
        }

        conversation.turns.push(Turn::new(Role::User, message));
        let system_prompt = grounding.system_prompt();
        let history_budget = self
            .context_tokens
            .saturating_sub(estimate_tokens(&system_prompt));
        let request = ChatRequest {
            turns: truncate_history(&conversation.turns, history_budget).to_vec(),
            system_prompt: Some(system_prompt),
            temperature: None,
        };

        match self.llm.complete(&request).await {
            Ok(reply) => {
                conversation
                    .turns
                    .push(Turn::new(Role::Assistant, reply.clone()));
                conversation.retain_recent(self.history_turns);
                Ok(reply)
            }
            Err(e) => {
                conversation.turns.pop();
                Err(e)
            }
        }
    }
}

/// Longest suffix of `turns` within `budget` estimated tokens. The last
/// turn is always included.
pub fn truncate_history(turns: &[Turn], budget: usize) -> &[Turn] {
    let mut used = 0;
    let mut start = turns.len();
    for (i, turn) in turns.iter().enumerate().rev() {
        let cost = estimate_tokens(&turn.content);
        if start < turns.len() && used + cost > budget {
            break;
        }
        used += cost;
        start = i;
    }
    &turns[start..]
}
