//! # Study Harness CLI (`study`)
//!
//! ## Usage
//!
//! ```bash
//! study --config ./config/study.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `study init` | Create the data directory and the session database |
//! | `study onboard --user U ...` | Record the learner's name, subject, goal and level |
//! | `study ingest <file> --user U` | Store and extract one document |
//! | `study index --user U` | Rebuild the user's index from all uploads |
//! | `study slides --user U` | Generate a slide deck and print it |
//! | `study quiz --user U` | Generate a quiz and print the questions |
//! | `study chat --user U "<message>"` | Ask the tutor one question |
//! | `study session --user U` | Print the session as JSON (quiz answers hidden) |
//! | `study logout --user U` | Delete the session, uploads and index |
//! | `study serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! study init
//! study onboard --user ada --name Ada --subject "Cell biology" --level beginner
//! study ingest ./notes/cells.pdf --user ada
//! study index --user ada --terms 10
//! study slides --user ada
//! study chat --user ada "What do mitochondria do?"
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use study_harness::app::{SessionView, StudyApp};
use study_harness::config::{self, Config};
use study_harness::index::{term_summary, Index};
use study_harness::logging::init_logging;
use study_harness::models::DocumentFormat;
use study_harness::onboarding::{KnowledgeChoice, OnboardingForm};
use study_harness::present::SlidePresenter;
use study_harness::server;
use study_harness::session::SqliteSessionStore;

/// Study Harness: turn your own documents into slides, quizzes and a tutor.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/study.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "study",
    about = "Study Harness: grounded slides, quizzes and tutoring chat from your own documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/study.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and the session database. Idempotent.
    Init,

    /// Complete onboarding for a user.
    Onboard {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        goal: Option<String>,
        /// `beginner`, `intermediate`, `advanced`, or `assess` for a placement quiz.
        #[arg(long, default_value = "assess")]
        level: String,
    },

    /// Ingest one document (pdf, txt, docx, md).
    Ingest {
        file: PathBuf,
        #[arg(long)]
        user: String,
        /// Declared format; taken from the file extension when omitted.
        #[arg(long)]
        format: Option<String>,
    },

    /// Rebuild the user's index from every uploaded document.
    Index {
        #[arg(long)]
        user: String,
        /// Also print the N most widespread terms.
        #[arg(long)]
        terms: Option<usize>,
    },

    /// Generate a slide deck and print every slide.
    Slides {
        #[arg(long)]
        user: String,
        /// Topic; defaults to the onboarding subject.
        #[arg(long)]
        topic: Option<String>,
    },

    /// Generate a quiz and print its questions.
    Quiz {
        #[arg(long)]
        user: String,
        #[arg(long)]
        count: Option<usize>,
    },

    /// Ask the tutor a question.
    Chat {
        message: String,
        #[arg(long)]
        user: String,
    },

    /// Print the stored session.
    Session {
        #[arg(long)]
        user: String,
    },

    /// Delete the user's session, uploads and index.
    Logout {
        #[arg(long)]
        user: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let _log_guard = init_logging(&cfg.logging);

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
        command => {
            let mut app = StudyApp::open(cfg).await?;
            run_command(&mut app, command).await?;
        }
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cfg.storage.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            cfg.storage.data_dir.display()
        )
    })?;
    let store = SqliteSessionStore::open(&cfg.storage.session_db()).await?;
    store.close().await;
    println!(
        "Initialized data directory {}",
        cfg.storage.data_dir.display()
    );
    Ok(())
}

async fn run_command(app: &mut StudyApp, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Onboard {
            user,
            name,
            subject,
            goal,
            level,
        } => {
            let form = OnboardingForm {
                user_name: name,
                study_subject: subject,
                study_goal: goal,
                knowledge: KnowledgeChoice::parse(&level)?,
            };
            let session = app.onboard(&user, &form).await?;
            println!("Welcome! Next mode: {}", session.mode);
        }
        Commands::Ingest { file, user, format } => {
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .with_context(|| format!("not a file: {}", file.display()))?;
            let format = match format {
                Some(f) => f,
                None => DocumentFormat::from_filename(&filename)?
                    .extension()
                    .to_string(),
            };
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let doc = app.upload(&user, &filename, &format, &bytes).await?;
            println!(
                "Ingested {} ({}, {} characters)",
                doc.filename,
                doc.format,
                doc.text.chars().count()
            );
            println!("  id: {}", doc.id);
        }
        Commands::Index { user, terms } => {
            let summary = app.build_index(&user).await?;
            println!(
                "Index {} built: {} documents, {} passages",
                summary.index_id, summary.documents, summary.passages
            );
            if let Some(model) = &summary.embedding_model {
                println!("  vectors: {}", model);
            }
            if let Some(limit) = terms {
                let index = Index::load(&app.config().storage.index_path(&user))?;
                for (term, df) in term_summary(&index, limit) {
                    println!("  {:<24} {}", term, df);
                }
            }
        }
        Commands::Slides { user, topic } => {
            app.generate_slides(&user, topic.as_deref()).await?;
            let session = app.session(&user).await?;
            let deck = session
                .slide_deck
                .context("slide deck missing after generation")?;
            println!("# {}\n", deck.topic);
            let mut presenter = SlidePresenter::new(deck)?;
            for i in 0..presenter.len() {
                presenter.goto(i);
                println!("{}", presenter.render(true));
            }
        }
        Commands::Quiz { user, count } => {
            let questions = app.generate_quiz(&user, count).await?;
            for q in &questions {
                println!("{}. {}", q.number, q.prompt);
                for (letter, choice) in ('A'..='D').zip(&q.choices) {
                    println!("   {}) {}", letter, choice);
                }
                println!();
            }
        }
        Commands::Chat { message, user } => {
            let reply = app.chat(&user, &message).await?;
            println!("{}", reply.reply);
            if !reply.sources.is_empty() {
                println!("\nSources: {}", reply.sources.join(", "));
            }
        }
        Commands::Session { user } => {
            let session = app.session(&user).await?;
            println!("{}", serde_json::to_string_pretty(&SessionView::from(&session))?);
        }
        Commands::Logout { user } => {
            app.logout(&user).await?;
            println!("Logged out {}; session, uploads and index deleted.", user);
        }
        Commands::Init | Commands::Serve => {}
    }
    Ok(())
}
