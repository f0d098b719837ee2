//! Slide and quiz presenters.
//!
//! Presenters hold the navigation / answering state over generated content
//! and produce serializable views for the UI. They never call the LLM.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StudyError};
use crate::models::{KnowledgeLevel, QuizQuestion, SlideDeck};

/// Position over a slide deck. Navigation is clamped to the deck bounds.
#[derive(Debug, Clone)]
pub struct SlidePresenter {
    deck: SlideDeck,
    position: usize,
}

/// Renderable state of the current slide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideView {
    pub index: usize,
    pub total: usize,
    pub section: String,
    pub topic: String,
    pub bullets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    pub markdown: String,
    pub has_previous: bool,
    pub has_next: bool,
}

impl SlidePresenter {
    pub fn new(deck: SlideDeck) -> Result<Self> {
        if deck.slides.is_empty() {
            return Err(StudyError::InvalidInput("slide deck is empty".into()));
        }
        Ok(Self { deck, position: 0 })
    }

    pub fn len(&self) -> usize {
        self.deck.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deck.slides.is_empty()
    }

    pub fn goto(&mut self, index: usize) -> usize {
        self.position = index.min(self.len() - 1);
        self.position
    }

    pub fn next(&mut self) -> usize {
        self.goto(self.position + 1)
    }

    pub fn previous(&mut self) -> usize {
        self.goto(self.position.saturating_sub(1))
    }

    /// Markdown for the current slide: section and topic headings, numbered
    /// bullets, and the narration after a rule when requested.
    pub fn render(&self, show_narration: bool) -> String {
        let slide = &self.deck.slides[self.position];
        let mut out = format!("## {}\n\n### {}\n\n", slide.section, slide.topic);
        for (i, bullet) in slide.bullets.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, bullet));
        }
        if show_narration {
            out.push_str("\n---\n\n");
            out.push_str(&slide.narration);
            out.push('\n');
        }
        out
    }

    pub fn view(&self, show_narration: bool) -> SlideView {
        let slide = &self.deck.slides[self.position];
        SlideView {
            index: self.position,
            total: self.len(),
            section: slide.section.clone(),
            topic: slide.topic.clone(),
            bullets: slide.bullets.clone(),
            narration: show_narration.then(|| slide.narration.clone()),
            markdown: self.render(show_narration),
            has_previous: self.position > 0,
            has_next: self.position + 1 < self.len(),
        }
    }

    /// Plain-text summary of the current slide, used as chat context.
    pub fn context_text(&self) -> String {
        let slide = &self.deck.slides[self.position];
        format!(
            "{} - {}: {}",
            slide.section,
            slide.topic,
            slide.bullets.join("; ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerReview {
    pub number: usize,
    pub given: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResult {
    pub score: usize,
    pub max_score: usize,
    pub level: KnowledgeLevel,
    pub review: Vec<AnswerReview>,
}

/// Maps a score to a level by thirds of the maximum.
pub fn level_for_score(score: usize, max_score: usize) -> KnowledgeLevel {
    if score * 3 <= max_score {
        KnowledgeLevel::Beginner
    } else if score * 3 <= max_score * 2 {
        KnowledgeLevel::Intermediate
    } else {
        KnowledgeLevel::Advanced
    }
}

/// Collects answers for a quiz bank and scores it.
#[derive(Debug, Clone)]
pub struct QuizPresenter {
    questions: Vec<QuizQuestion>,
    answers: BTreeMap<usize, String>,
}

impl QuizPresenter {
    pub fn new(questions: Vec<QuizQuestion>) -> Self {
        Self {
            questions,
            answers: BTreeMap::new(),
        }
    }

    /// Restores previously recorded answers. Answers to unknown questions are dropped.
    pub fn with_answers(questions: Vec<QuizQuestion>, answers: BTreeMap<usize, String>) -> Self {
        let mut presenter = Self::new(questions);
        for (number, choice) in answers {
            if presenter.answer(number, &choice).is_err() {
                tracing::debug!(number, "dropping stale quiz answer");
            }
        }
        presenter
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn answers(&self) -> &BTreeMap<usize, String> {
        &self.answers
    }

    pub fn is_complete(&self) -> bool {
        self.questions
            .iter()
            .all(|q| self.answers.contains_key(&q.number))
    }

    pub fn answer(&mut self, number: usize, choice: &str) -> Result<()> {
        let question = self
            .questions
            .iter()
            .find(|q| q.number == number)
            .ok_or_else(|| StudyError::NotFound(format!("quiz question {}", number)))?;
        let choice = choice.trim();
        if !question.choices.iter().any(|c| c == choice) {
            return Err(StudyError::InvalidInput(format!(
                "'{}' is not a choice for question {}",
                choice, number
            )));
        }
        self.answers.insert(number, choice.to_string());
        Ok(())
    }

    pub fn submit(&self) -> Result<QuizResult> {
        if self.questions.is_empty() {
            return Err(StudyError::InvalidInput("no quiz to submit".into()));
        }
        let missing: Vec<String> = self
            .questions
            .iter()
            .filter(|q| !self.answers.contains_key(&q.number))
            .map(|q| q.number.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StudyError::InvalidInput(format!(
                "unanswered questions: {}",
                missing.join(", ")
            )));
        }

        let review: Vec<AnswerReview> = self
            .questions
            .iter()
            .map(|q| {
                let given = self.answers.get(&q.number).cloned().unwrap_or_default();
                AnswerReview {
                    number: q.number,
                    is_correct: given == q.correct_answer,
                    given,
                    correct_answer: q.correct_answer.clone(),
                    rationale: q.rationale.clone(),
                }
            })
            .collect();

        let score = review.iter().filter(|r| r.is_correct).count();
        let max_score = self.questions.len();
        Ok(QuizResult {
            score,
            max_score,
            level: level_for_score(score, max_score),
            review,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Slide;

    fn deck(n: usize) -> SlideDeck {
        SlideDeck {
            topic: "Physics".into(),
            slides: (0..n)
                .map(|i| Slide {
                    section: "Mechanics".into(),
                    topic: format!("Topic {}", i),
                    narration: format!("Narration {}", i),
                    bullets: vec!["Force".into(), "Mass".into()],
                    sources: vec!["doc".into()],
                })
                .collect(),
        }
    }

    fn quiz(n: usize) -> Vec<QuizQuestion> {
        (1..=n)
            .map(|i| QuizQuestion {
                number: i,
                prompt: format!("Q{}", i),
                choices: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_answer: "a".into(),
                rationale: "r".into(),
                sources: vec!["doc".into()],
            })
            .collect()
    }

    #[test]
    fn test_navigation_is_clamped() {
        let mut p = SlidePresenter::new(deck(3)).unwrap();
        assert_eq!(p.previous(), 0);
        assert_eq!(p.next(), 1);
        assert_eq!(p.goto(10), 2);
        assert_eq!(p.next(), 2);
        assert!(SlidePresenter::new(deck(0)).is_err());
    }

    #[test]
    fn test_render_markdown() {
        let p = SlidePresenter::new(deck(1)).unwrap();
        assert_eq!(
            p.render(false),
            "## Mechanics\n\n### Topic 0\n\n1. Force\n2. Mass\n"
        );
        assert!(p.render(true).ends_with("---\n\nNarration 0\n"));
    }

    #[test]
    fn test_view_flags() {
        let mut p = SlidePresenter::new(deck(2)).unwrap();
        let v = p.view(false);
        assert!(!v.has_previous && v.has_next);
        assert!(v.narration.is_none());
        p.next();
        let v = p.view(true);
        assert!(v.has_previous && !v.has_next);
        assert_eq!(v.narration.as_deref(), Some("Narration 1"));
    }

    #[test]
    fn test_level_by_thirds() {
        assert_eq!(level_for_score(0, 5), KnowledgeLevel::Beginner);
        assert_eq!(level_for_score(1, 5), KnowledgeLevel::Beginner);
        assert_eq!(level_for_score(2, 5), KnowledgeLevel::Intermediate);
        assert_eq!(level_for_score(3, 5), KnowledgeLevel::Intermediate);
        assert_eq!(level_for_score(4, 5), KnowledgeLevel::Advanced);
        assert_eq!(level_for_score(3, 3), KnowledgeLevel::Advanced);
        assert_eq!(level_for_score(2, 6), KnowledgeLevel::Beginner);
    }

    #[test]
    fn test_answer_must_be_a_choice() {
        let mut p = QuizPresenter::new(quiz(2));
        assert!(matches!(p.answer(1, "z"), Err(StudyError::InvalidInput(_))));
        assert!(matches!(p.answer(9, "a"), Err(StudyError::NotFound(_))));
        p.answer(1, " a ").unwrap();
        assert_eq!(p.answers().get(&1).map(String::as_str), Some("a"));
    }

    #[test]
    fn test_submit_requires_all_answers() {
        let mut p = QuizPresenter::new(quiz(3));
        p.answer(1, "a").unwrap();
        let err = p.submit().unwrap_err();
        assert!(err.to_string().contains("2, 3"));

        p.answer(2, "b").unwrap();
        p.answer(3, "a").unwrap();
        let result = p.submit().unwrap();
        assert_eq!(result.score, 2);
        assert_eq!(result.max_score, 3);
        assert_eq!(result.level, KnowledgeLevel::Intermediate);
        assert!(!result.review[1].is_correct);
    }

    #[test]
    fn test_with_answers_drops_stale_entries() {
        let mut stored = BTreeMap::new();
        stored.insert(1, "a".to_string());
        stored.insert(7, "a".to_string());
        let p = QuizPresenter::with_answers(quiz(2), stored);
        assert_eq!(p.answers().len(), 1);
        assert!(!p.is_complete());
    }
}
