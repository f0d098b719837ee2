//! Per-user session state and persistence.
//!
//! A [`Session`] is everything the app remembers about one user between
//! requests: mode, progress, conversation, preferences and the generated
//! content. [`SessionManager`] serializes sessions to JSON and keeps them in
//! a [`SessionStore`], a plain key-value store keyed by user id.
//!
//! # Modes
//!
//! ```text
//! Onboarding ──▶ Slides ◀──▶ Quiz
//!      │            │          │
//!      └────────────┴──────────┴──▶ LoggedOut (terminal)
//! ```
//!
//! `Onboarding` may also go straight to `Quiz` when the learner asks to be
//! assessed. Staying in the current mode is always allowed.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::conversation::Conversation;
use crate::error::{Result, StudyError};
use crate::models::{KnowledgeLevel, QuizQuestion, SlideDeck};
use crate::present::QuizResult;

pub use memory::InMemorySessionStore;
pub use sqlite::SqliteSessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Onboarding,
    Slides,
    Quiz,
    LoggedOut,
}

impl Mode {
    pub fn can_transition_to(self, to: Mode) -> bool {
        use Mode::*;
        match (self, to) {
            (LoggedOut, _) => false,
            (_, LoggedOut) => true,
            (from, to) if from == to => true,
            (Onboarding, Slides) | (Onboarding, Quiz) => true,
            (Slides, Quiz) | (Quiz, Slides) => true,
            _ => false,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onboarding" => Ok(Mode::Onboarding),
            "slides" => Ok(Mode::Slides),
            "quiz" => Ok(Mode::Quiz),
            "logged_out" => Ok(Mode::LoggedOut),
            other => Err(StudyError::InvalidInput(format!("unknown mode: {}", other))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Onboarding => "onboarding",
            Mode::Slides => "slides",
            Mode::Quiz => "quiz",
            Mode::LoggedOut => "logged_out",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub user_name: String,
    pub study_subject: String,
    pub study_goal: String,
    /// `None` until self-assessed or set by a quiz result.
    pub knowledge_level: Option<KnowledgeLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub slide_position: usize,
    pub quiz_answers: BTreeMap<usize, String>,
    pub last_quiz: Option<QuizResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub mode: Mode,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub conversation: Conversation,
    #[serde(default)]
    pub preferences: Option<Preferences>,
    /// Id of the index the generated content was built from.
    #[serde(default)]
    pub active_index: Option<String>,
    #[serde(default)]
    pub slide_deck: Option<SlideDeck>,
    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            mode: Mode::Onboarding,
            progress: Progress::default(),
            conversation: Conversation::new(),
            preferences: None,
            active_index: None,
            slide_deck: None,
            quiz: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, to: Mode) -> Result<()> {
        if !self.mode.can_transition_to(to) {
            return Err(StudyError::InvalidTransition {
                from: self.mode.to_string(),
                to: to.to_string(),
            });
        }
        if self.mode != to {
            tracing::debug!(user = %self.user_id, from = %self.mode, to = %to, "mode change");
        }
        self.mode = to;
        Ok(())
    }

    /// Drops the active index and everything generated from it.
    pub fn invalidate_content(&mut self) {
        self.active_index = None;
        self.slide_deck = None;
        self.quiz.clear();
        self.progress.slide_position = 0;
        self.progress.quiz_answers.clear();
    }

    pub fn knowledge_level(&self) -> Option<KnowledgeLevel> {
        self.preferences.as_ref().and_then(|p| p.knowledge_level)
    }
}

/// Key-value persistence for serialized sessions, keyed by user id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<String>>;
    async fn put(&self, user_id: &str, state_json: &str) -> Result<()>;
    async fn delete(&self, user_id: &str) -> Result<()>;
}

/// User ids become directory and file names, so they are restricted to
/// ASCII letters, digits, `-` and `_`.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    let ok = !user_id.is_empty()
        && user_id.len() <= 64
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StudyError::InvalidInput(format!(
            "invalid user id {:?}: use 1-64 letters, digits, '-' or '_'",
            user_id
        )))
    }
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Creates and stores a fresh session, replacing any existing one.
    pub async fn create(&self, user_id: &str) -> Result<Session> {
        validate_user_id(user_id)?;
        let mut session = Session::new(user_id);
        self.save(&mut session).await?;
        Ok(session)
    }

    pub async fn load(&self, user_id: &str) -> Result<Session> {
        validate_user_id(user_id)?;
        let json = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| StudyError::SessionLoad {
                user_id: user_id.to_string(),
                reason: "no stored session".to_string(),
            })?;
        let session: Session =
            serde_json::from_str(&json).map_err(|e| StudyError::SessionLoad {
                user_id: user_id.to_string(),
                reason: format!("corrupt record: {}", e),
            })?;
        if session.user_id != user_id {
            return Err(StudyError::SessionLoad {
                user_id: user_id.to_string(),
                reason: format!("record belongs to {}", session.user_id),
            });
        }
        Ok(session)
    }

    pub async fn save(&self, session: &mut Session) -> Result<()> {
        session.updated_at = Utc::now();
        let json = serde_json::to_string(session)
            .map_err(|e| StudyError::Storage(format!("serialize session: {}", e)))?;
        self.store.put(&session.user_id, &json).await
    }

    /// Loads the stored session, or starts a fresh one when it is missing or unreadable.
    pub async fn load_or_create(&self, user_id: &str) -> Result<Session> {
        match self.load(user_id).await {
            Ok(session) => Ok(session),
            Err(StudyError::SessionLoad { reason, .. }) => {
                tracing::info!(user = %user_id, %reason, "starting a fresh session");
                self.create(user_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes the stored session.
    pub async fn logout(&self, user_id: &str) -> Result<()> {
        validate_user_id(user_id)?;
        self.store.delete(user_id).await
    }
}
