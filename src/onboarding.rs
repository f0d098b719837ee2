//! First-run questionnaire.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StudyError};
use crate::models::KnowledgeLevel;
use crate::session::{Mode, Preferences};

pub const DEFAULT_GOAL: &str = "No specific goal";

/// Self-assessment answer. `Assess` asks for a placement quiz instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeChoice {
    Beginner,
    Intermediate,
    Advanced,
    Assess,
}

impl KnowledgeChoice {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(KnowledgeChoice::Beginner),
            "intermediate" => Ok(KnowledgeChoice::Intermediate),
            "advanced" => Ok(KnowledgeChoice::Advanced),
            "assess" | "quiz" => Ok(KnowledgeChoice::Assess),
            other => Err(StudyError::InvalidInput(format!(
                "unknown knowledge level: {}",
                other
            ))),
        }
    }

    fn level(self) -> Option<KnowledgeLevel> {
        match self {
            KnowledgeChoice::Beginner => Some(KnowledgeLevel::Beginner),
            KnowledgeChoice::Intermediate => Some(KnowledgeLevel::Intermediate),
            KnowledgeChoice::Advanced => Some(KnowledgeLevel::Advanced),
            KnowledgeChoice::Assess => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingForm {
    pub user_name: String,
    pub study_subject: String,
    #[serde(default)]
    pub study_goal: Option<String>,
    pub knowledge: KnowledgeChoice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingOutcome {
    pub preferences: Preferences,
    pub first_mode: Mode,
}

impl OnboardingForm {
    pub fn complete(&self) -> Result<OnboardingOutcome> {
        let user_name = self.user_name.trim();
        let study_subject = self.study_subject.trim();
        if user_name.is_empty() {
            return Err(StudyError::InvalidInput("user_name must not be empty".into()));
        }
        if study_subject.is_empty() {
            return Err(StudyError::InvalidInput(
                "study_subject must not be empty".into(),
            ));
        }
        let study_goal = self
            .study_goal
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_GOAL)
            .to_string();

        let first_mode = match self.knowledge {
            KnowledgeChoice::Assess => Mode::Quiz,
            _ => Mode::Slides,
        };

        Ok(OnboardingOutcome {
            preferences: Preferences {
                user_name: user_name.to_string(),
                study_subject: study_subject.to_string(),
                study_goal,
                knowledge_level: self.knowledge.level(),
            },
            first_mode,
        })
    }
}
