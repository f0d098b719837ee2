//! Training material generation.
//!
//! [`MaterialBuilder`] turns an [`Index`] into slide decks and quiz banks by
//! retrieving passages and asking the LLM for structured JSON.
//!
//! # Slides
//!
//! 1. Ask for a course outline (sections, each with topics), steered by the
//!    index's most widespread keywords and the learner's level.
//! 2. For every `(section, topic)`: retrieve passages, ask for
//!    `{ "narration": ..., "bullets": [...] }`.
//!
//! # Quiz
//!
//! Retrieve passages for the subject and ask for a JSON array of exactly
//! `count` multiple-choice questions.
//!
//! # Response handling
//!
//! Replies may be wrapped in Markdown code fences or surrounded by prose;
//! the JSON payload is cut out before parsing. A reply that fails to parse or
//! validate is retried once with a stricter prompt that quotes the problem.
//! A second failure is a [`StudyError::Generation`]. Transport failures are
//! not retried here; the client already retries them.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::{GenerationConfig, RetrievalConfig};
use crate::embedding::Embedder;
use crate::error::{Result, StudyError};
use crate::index::{Index, Retriever};
use crate::llm::{ChatRequest, LlmClient};
use crate::models::{KnowledgeLevel, PassageHit, QuizQuestion, Slide, SlideDeck};

const OUTLINE_KEYWORDS: usize = 30;
const CHOICES_PER_QUESTION: usize = 4;

/// What to generate material about, and for whom.
#[derive(Debug, Clone)]
pub struct TopicScope {
    pub topic: String,
    pub goal: Option<String>,
    /// `None` while the level is still being assessed.
    pub level: Option<KnowledgeLevel>,
}

impl TopicScope {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            goal: None,
            level: None,
        }
    }

    fn level_guidance(&self) -> &'static str {
        match self.level {
            Some(KnowledgeLevel::Beginner) => {
                "The learner is a beginner: assume no prior knowledge and define every term."
            }
            Some(KnowledgeLevel::Intermediate) => {
                "The learner knows the basics: skip elementary definitions and focus on how concepts connect."
            }
            Some(KnowledgeLevel::Advanced) => {
                "The learner is advanced: focus on edge cases, trade-offs and deeper mechanisms."
            }
            None => "The learner's level is unknown: cover a range from basic to advanced.",
        }
    }

    fn goal_line(&self) -> String {
        match &self.goal {
            Some(goal) if !goal.trim().is_empty() => format!("The learner's goal: {}.", goal),
            _ => String::new(),
        }
    }
}

pub struct MaterialBuilder<'a> {
    llm: &'a dyn LlmClient,
    embedder: Option<&'a dyn Embedder>,
    generation: &'a GenerationConfig,
    retrieval: &'a RetrievalConfig,
}

#[derive(Debug, Deserialize)]
struct OutlineReply {
    sections: Vec<OutlineSection>,
}

#[derive(Debug, Deserialize)]
struct OutlineSection {
    #[serde(alias = "section")]
    title: String,
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SlideReply {
    narration: String,
    bullets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionReply {
    #[serde(alias = "question")]
    prompt: String,
    #[serde(alias = "options")]
    choices: Vec<String>,
    #[serde(alias = "answer")]
    correct_answer: String,
    #[serde(default)]
    rationale: String,
}

impl<'a> MaterialBuilder<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        embedder: Option<&'a dyn Embedder>,
        generation: &'a GenerationConfig,
        retrieval: &'a RetrievalConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            generation,
            retrieval,
        }
    }

    pub async fn generate_slides(&self, index: &Index, scope: &TopicScope) -> Result<SlideDeck> {
        let retriever = Retriever::new(index, self.embedder, self.retrieval);
        let outline = self.outline(index, scope).await?;

        let mut slides = Vec::new();
        for section in &outline {
            for topic in &section.topics {
                tracing::info!(section = %section.title, topic = %topic, "generating slide");
                let hits = retriever
                    .search_or_lead(&format!("{} {} {}", scope.topic, section.title, topic), self.retrieval.top_k)
                    .await;
                slides.push(self.slide(scope, &section.title, topic, &hits).await?);
            }
        }

        Ok(SlideDeck {
            topic: scope.topic.clone(),
            slides,
        })
    }

    pub async fn generate_quiz(
        &self,
        index: &Index,
        scope: &TopicScope,
        count: usize,
    ) -> Result<Vec<QuizQuestion>> {
        if count == 0 {
            return Err(StudyError::InvalidInput("quiz size must be at least 1".into()));
        }
        let retriever = Retriever::new(index, self.embedder, self.retrieval);
        let query = match &scope.goal {
            Some(goal) => format!("{} {}", scope.topic, goal),
            None => scope.topic.clone(),
        };
        let hits = retriever
            .search_or_lead(&query, self.retrieval.top_k.max(count))
            .await;
        let sources = source_ids(&hits);

        let prompt = format!(
            "Create {count} different multiple-choice quiz questions that test a learner's \
             knowledge of {topic}. {level} {goal}\n\
             Each question has exactly {choices} answer options and exactly one of them is correct. \
             Questions must be about the subject in general, not about the wording of the material. \
             The rationale explains why the correct answer is right without referring to the \
             material, an exam or the topic name.\n\n\
             Reference material:\n{context}\n\n\
             Respond with a JSON array of {count} objects, each shaped like \
             {{\"prompt\": \"...\", \"choices\": [\"...\", \"...\", \"...\", \"...\"], \
             \"correct_answer\": \"<one of the choices, verbatim>\", \"rationale\": \"...\"}}.",
            count = count,
            topic = scope.topic,
            level = scope.level_guidance(),
            goal = scope.goal_line(),
            choices = CHOICES_PER_QUESTION,
            context = format_context(&hits),
        );

        let replies: Vec<QuestionReply> = self
            .ask_json("quiz", prompt, |r: &Vec<QuestionReply>| validate_quiz(r, count))
            .await?;

        Ok(replies
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let correct_answer = resolve_answer(&r.choices, &r.correct_answer)
                    .unwrap_or(r.correct_answer);
                QuizQuestion {
                    number: i + 1,
                    prompt: r.prompt.trim().to_string(),
                    choices: r.choices.iter().map(|c| c.trim().to_string()).collect(),
                    correct_answer,
                    rationale: r.rationale.trim().to_string(),
                    sources: sources.clone(),
                }
            })
            .collect())
    }

    async fn outline(&self, index: &Index, scope: &TopicScope) -> Result<Vec<OutlineSection>> {
        let keywords = index.keywords(OUTLINE_KEYWORDS);
        let keyword_line = if keywords.is_empty() {
            String::new()
        } else {
            format!(
                "Make sure the outline covers these terms where they are relevant to {}: {}.",
                scope.topic,
                keywords.join(", ")
            )
        };
        let prompt = format!(
            "Create a structured course outline for a course about {topic}. {level} {goal}\n\
             Use at most {sections} sections with at most {topics} topics each. Start with a general \
             introduction and build up to more advanced areas. {keywords}\n\n\
             Respond with JSON shaped like \
             {{\"sections\": [{{\"title\": \"...\", \"topics\": [\"...\", \"...\"]}}]}}.",
            topic = scope.topic,
            level = scope.level_guidance(),
            goal = scope.goal_line(),
            sections = self.generation.sections,
            topics = self.generation.topics_per_section,
            keywords = keyword_line,
        );

        let mut reply: OutlineReply = self.ask_json("outline", prompt, validate_outline).await?;
        reply.sections.truncate(self.generation.sections);
        for section in &mut reply.sections {
            section.title = section.title.trim().to_string();
            section.topics = section
                .topics
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .take(self.generation.topics_per_section)
                .collect();
        }
        Ok(reply.sections)
    }

    async fn slide(
        &self,
        scope: &TopicScope,
        section: &str,
        topic: &str,
        hits: &[PassageHit],
    ) -> Result<Slide> {
        let prompt = format!(
            "You are an expert {subject} trainer covering the section '{section}'. \
             Introduce and explain '{topic}' to your students, speaking as the trainer. {level}\n\n\
             Reference material:\n{context}\n\n\
             Respond with JSON shaped like {{\"narration\": \"...\", \"bullets\": [\"...\"]}}, where \
             bullets are at most {max} very short slide bullets without verbs.",
            subject = scope.topic,
            section = section,
            topic = topic,
            level = scope.level_guidance(),
            context = format_context(hits),
            max = self.generation.max_bullets,
        );

        let reply: SlideReply = self.ask_json("slide", prompt, validate_slide).await?;
        Ok(Slide {
            section: section.to_string(),
            topic: topic.to_string(),
            narration: reply.narration.trim().to_string(),
            bullets: reply
                .bullets
                .iter()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .take(self.generation.max_bullets)
                .collect(),
            sources: source_ids(hits),
        })
    }

    /// Sends `prompt`, parses and validates the JSON reply, retrying once
    /// with a stricter prompt on failure.
    async fn ask_json<T, F>(&self, what: &str, prompt: String, validate: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> std::result::Result<(), String>,
    {
        let first = self.llm.complete(&ChatRequest::prompt(prompt.clone())).await?;
        let problem = match parse_reply::<T>(&first).and_then(|v| validate(&v).map(|_| v)) {
            Ok(value) => return Ok(value),
            Err(problem) => problem,
        };

        tracing::warn!(what, problem = %problem, "unusable LLM reply, retrying with stricter prompt");
        let strict = format!(
            "{}\n\nYour previous reply could not be used: {}.\n\
             Respond with the JSON only. No prose, no Markdown, no code fences.",
            prompt, problem
        );
        let second = self.llm.complete(&ChatRequest::prompt(strict)).await?;
        parse_reply::<T>(&second)
            .and_then(|v| validate(&v).map(|_| v))
            .map_err(|problem| StudyError::Generation(format!("{}: {}", what, problem)))
    }
}

fn parse_reply<T: DeserializeOwned>(reply: &str) -> std::result::Result<T, String> {
    serde_json::from_str(extract_json(reply)).map_err(|e| format!("invalid JSON ({})", e))
}

/// Cuts the JSON payload out of a reply: strips code fences, then any prose
/// before the first `{`/`[` and after the last `}`/`]`.
pub fn extract_json(reply: &str) -> &str {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            None => rest,
        };
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text).trim();
    }

    let start = text.find(['{', '[']);
    let end = text.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if s <= e => &text[s..=e],
        _ => text,
    }
}

fn validate_outline(reply: &OutlineReply) -> std::result::Result<(), String> {
    if reply.sections.is_empty() {
        return Err("the outline has no sections".into());
    }
    for (i, section) in reply.sections.iter().enumerate() {
        if section.title.trim().is_empty() {
            return Err(format!("section {} has an empty title", i + 1));
        }
        if section.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(format!("section '{}' has no topics", section.title));
        }
    }
    Ok(())
}

fn validate_slide(reply: &SlideReply) -> std::result::Result<(), String> {
    if reply.narration.trim().is_empty() {
        return Err("narration is empty".into());
    }
    if reply.bullets.iter().all(|b| b.trim().is_empty()) {
        return Err("the slide has no bullets".into());
    }
    Ok(())
}

fn validate_quiz(replies: &[QuestionReply], count: usize) -> std::result::Result<(), String> {
    if replies.len() != count {
        return Err(format!(
            "expected exactly {} questions, got {}",
            count,
            replies.len()
        ));
    }
    for (i, q) in replies.iter().enumerate() {
        let n = i + 1;
        if q.prompt.trim().is_empty() {
            return Err(format!("question {} has an empty prompt", n));
        }
        if q.choices.len() != CHOICES_PER_QUESTION {
            return Err(format!(
                "question {} has {} choices, expected {}",
                n,
                q.choices.len(),
                CHOICES_PER_QUESTION
            ));
        }
        if q.correct_answer.trim().is_empty() {
            return Err(format!("question {} has no correct answer", n));
        }
        if resolve_answer(&q.choices, &q.correct_answer).is_none() {
            return Err(format!(
                "question {}: correct answer '{}' is not one of its choices",
                n, q.correct_answer
            ));
        }
    }
    Ok(())
}

/// Maps a reply's answer onto one of its choices: exact text (ignoring
/// surrounding whitespace), or a bare option letter `A`-`D`.
fn resolve_answer(choices: &[String], answer: &str) -> Option<String> {
    let answer = answer.trim();
    if let Some(choice) = choices.iter().find(|c| c.trim() == answer) {
        return Some(choice.trim().to_string());
    }
    let mut chars = answer.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if letter.is_ascii_alphabetic() => {
            let idx = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
            choices.get(idx).map(|c| c.trim().to_string())
        }
        _ => None,
    }
}

fn format_context(hits: &[PassageHit]) -> String {
    hits.iter()
        .map(|h| format!("[{}]\n{}", h.filename, h.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct document ids in hit order.
fn source_ids(hits: &[PassageHit]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for hit in hits {
        if !ids.contains(&hit.document_id) {
            ids.push(hit.document_id.clone());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::index::IndexBuilder;
    use crate::models::{Document, DocumentFormat};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every prompt.
    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String> {
            let prompt = request.turns.last().map(|t| t.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| StudyError::Llm("script exhausted".into()))
        }
    }

    fn index() -> Index {
        let docs = vec![Document {
            id: "doc-1".into(),
            filename: "cells.md".into(),
            format: DocumentFormat::Markdown,
            uploaded_at: chrono::Utc::now(),
            raw_path: "/tmp/cells.md".into(),
            text: "Cells are the basic unit of life.\n\nMitochondria produce energy for the cell."
                .into(),
            hash: String::new(),
        }];
        IndexBuilder::new(&ChunkingConfig::default()).build(&docs).unwrap()
    }

    fn quiz_json(n: usize) -> String {
        let items: Vec<String> = (1..=n)
            .map(|i| {
                format!(
                    r#"{{"prompt": "Q{i}?", "choices": ["a{i}", "b{i}", "c{i}", "d{i}"], "correct_answer": "b{i}", "rationale": "because"}}"#
                )
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    #[test]
    fn test_extract_json_strips_fences_and_prose() {
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("Sure! Here it is: [1, 2] Enjoy."), "[1, 2]");
        assert_eq!(extract_json("  {\"x\":true}  "), "{\"x\":true}");
    }

    #[test]
    fn test_resolve_answer_accepts_letter() {
        let choices: Vec<String> = ["red", "green", "blue", "cyan"].iter().map(|s| s.to_string()).collect();
        assert_eq!(resolve_answer(&choices, " green "), Some("green".into()));
        assert_eq!(resolve_answer(&choices, "c"), Some("blue".into()));
        assert_eq!(resolve_answer(&choices, "purple"), None);
    }

    #[tokio::test]
    async fn test_quiz_has_exact_count_and_valid_answers() {
        let llm = Scripted::new(&[&format!("```json\n{}\n```", quiz_json(3))]);
        let gen = GenerationConfig::default();
        let ret = RetrievalConfig::default();
        let builder = MaterialBuilder::new(&llm, None, &gen, &ret);

        let quiz = builder
            .generate_quiz(&index(), &TopicScope::new("biology"), 3)
            .await
            .unwrap();
        assert_eq!(quiz.len(), 3);
        for (i, q) in quiz.iter().enumerate() {
            assert_eq!(q.number, i + 1);
            assert!(q.choices.contains(&q.correct_answer));
            assert_eq!(q.sources, vec!["doc-1".to_string()]);
        }
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_quiz_retries_once_then_succeeds() {
        let llm = Scripted::new(&[&quiz_json(2), &quiz_json(3)]);
        let gen = GenerationConfig::default();
        let ret = RetrievalConfig::default();
        let builder = MaterialBuilder::new(&llm, None, &gen, &ret);

        let quiz = builder
            .generate_quiz(&index(), &TopicScope::new("biology"), 3)
            .await
            .unwrap();
        assert_eq!(quiz.len(), 3);
        assert_eq!(llm.calls(), 2);
        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[1].contains("expected exactly 3 questions, got 2"));
        assert!(prompts[1].contains("JSON only"));
    }

    #[tokio::test]
    async fn test_quiz_fails_after_second_bad_reply() {
        let llm = Scripted::new(&["not json", "still not json"]);
        let gen = GenerationConfig::default();
        let ret = RetrievalConfig::default();
        let builder = MaterialBuilder::new(&llm, None, &gen, &ret);

        let err = builder
            .generate_quiz(&index(), &TopicScope::new("biology"), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::Generation(_)));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_quiz_rejects_answer_outside_choices() {
        let bad = r#"[{"prompt": "Q?", "choices": ["a", "b", "c", "d"], "correct_answer": "zebra", "rationale": ""}]"#;
        let llm = Scripted::new(&[bad, bad]);
        let gen = GenerationConfig::default();
        let ret = RetrievalConfig::default();
        let builder = MaterialBuilder::new(&llm, None, &gen, &ret);

        let err = builder
            .generate_quiz(&index(), &TopicScope::new("biology"), 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not one of its choices"));
    }

    #[tokio::test]
    async fn test_slides_follow_outline() {
        let outline = r#"{"sections": [{"title": "Basics", "topics": ["Cells", "Energy"]}]}"#;
        let slide = r#"{"narration": "Let us talk.", "bullets": ["unit of life", " ", "energy"]}"#;
        let llm = Scripted::new(&[outline, slide, slide]);
        let gen = GenerationConfig {
            max_bullets: 1,
            ..GenerationConfig::default()
        };
        let ret = RetrievalConfig::default();
        let builder = MaterialBuilder::new(&llm, None, &gen, &ret);

        let scope = TopicScope {
            topic: "biology".into(),
            goal: Some("pass the exam".into()),
            level: Some(KnowledgeLevel::Beginner),
        };
        let deck = builder.generate_slides(&index(), &scope).await.unwrap();
        assert_eq!(deck.topic, "biology");
        assert_eq!(deck.slides.len(), 2);
        assert_eq!(deck.slides[1].topic, "Energy");
        assert_eq!(deck.slides[0].bullets, vec!["unit of life".to_string()]);
        assert!(deck.slides.iter().all(|s| !s.sources.is_empty()));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("beginner"));
        assert!(prompts[0].contains("pass the exam"));
    }

    #[tokio::test]
    async fn test_slide_without_bullets_is_retried() {
        let outline = r#"{"sections": [{"title": "Basics", "topics": ["Cells"]}]}"#;
        let empty = r#"{"narration": "Talk.", "bullets": []}"#;
        let llm = Scripted::new(&[outline, empty, empty]);
        let gen = GenerationConfig::default();
        let ret = RetrievalConfig::default();
        let builder = MaterialBuilder::new(&llm, None, &gen, &ret);

        let err = builder
            .generate_slides(&index(), &TopicScope::new("biology"))
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::Generation(_)));
        assert_eq!(llm.calls(), 3);
    }
}
