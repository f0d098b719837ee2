//! # Study Harness
//!
//! A local-first study companion. Learners upload their own documents; the
//! harness extracts and indexes them, then uses an LLM to generate slides,
//! quizzes and tutoring answers grounded in passages retrieved from that
//! index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │  Ingest  │──▶│  Index   │──▶│  Generate  │──▶│   Present    │
//! │ pdf/docx │   │ BM25+vec │   │ slides/quiz│   │ slides/quiz  │
//! └──────────┘   └────┬─────┘   └────────────┘   └──────────────┘
//!                     │
//!                     ▼
//!              ┌──────────────┐      ┌──────────────────────┐
//!              │ Conversation │◀────▶│ Session (SQLite KV)  │
//!              └──────────────┘      └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`logging`] | Tracing setup and the user action log |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction per document format |
//! | [`ingest`] | Upload storage and document creation |
//! | [`chunk`] | Paragraph-boundary chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | BM25 + vector index and retrieval |
//! | [`llm`] | Chat-completion client |
//! | [`generate`] | Slide and quiz generation |
//! | [`present`] | Slide navigation and quiz scoring |
//! | [`conversation`] | Grounded tutoring chat |
//! | [`onboarding`] | First-run questionnaire |
//! | [`session`] | Per-user state, mode machine and stores |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema migrations |
//! | [`app`] | Application service used by the CLI and server |
//! | [`server`] | JSON HTTP API |

pub mod app;
pub mod chunk;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod onboarding;
pub mod present;
pub mod server;
pub mod session;
