//! Logging setup and the user action log.
//!
//! Console output goes to stderr so CLI stdout stays machine-readable. When
//! `[logging] file_dir` is set, the same events are also written to a
//! daily-rotated `study.log` in that directory.
//!
//! User-visible actions (uploads, onboarding, generation, chat, logout) are
//! emitted on the `study::actions` target via [`log_action`], so they can be
//! filtered on their own, e.g. `RUST_LOG=study::actions=info`.

use std::fmt;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

pub const ACTION_TARGET: &str = "study::actions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Upload,
    Index,
    Onboarding,
    Slides,
    Quiz,
    Chat,
    Logout,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Upload => "UPLOAD",
            ActionKind::Index => "INDEX",
            ActionKind::Onboarding => "ONBOARDING",
            ActionKind::Slides => "SLIDES",
            ActionKind::Quiz => "QUIZ",
            ActionKind::Chat => "CHAT",
            ActionKind::Logout => "LOGOUT",
        };
        f.write_str(name)
    }
}

/// Records one user action.
pub fn log_action(user_id: &str, kind: ActionKind, message: &str) {
    tracing::info!(target: ACTION_TARGET, user = %user_id, action = %kind, "{}", message);
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured filter. The returned guard must be held until shutdown so the
/// file writer flushes; it is `None` when file logging is off.
///
/// Calling this twice is harmless: the second install is ignored.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
    };

    let mut guard = None;
    let file_layer = config.file_dir.as_ref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create log directory {}: {}", dir.display(), e);
            return None;
        }
        let appender = tracing_appender::rolling::daily(dir, "study.log");
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter()),
        )
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}
