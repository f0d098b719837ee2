use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn uploads_dir(&self, user_id: &str) -> PathBuf {
        self.data_dir.join("uploads").join(user_id)
    }

    pub fn index_path(&self, user_id: &str) -> PathBuf {
        self.data_dir
            .join("indexes")
            .join(format!("{}.json", user_id))
    }

    pub fn session_db(&self) -> PathBuf {
        self.data_dir.join("sessions.sqlite")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}
fn default_overlap() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            hybrid_alpha: default_hybrid_alpha(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_hybrid_alpha() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Token budget for the system prompt plus the history sent with each chat turn.
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,
    /// Turns kept in the stored conversation; older ones are dropped.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            base_url: None,
            max_tokens: default_llm_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            context_tokens: default_context_tokens(),
            history_turns: default_history_turns(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Model name, falling back to the provider's usual default.
    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider.as_str()) {
            (Some(m), _) => m,
            (None, "ollama") => "qwen2.5:0.5b",
            (None, _) => "gpt-4o-mini",
        }
    }

    /// Base URL of the OpenAI-compatible API for the configured provider.
    pub fn api_base(&self) -> &str {
        match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, "ollama") => "http://localhost:11434/v1",
            (None, _) => "https://api.openai.com/v1",
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.5
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_context_tokens() -> usize {
    3000
}
fn default_history_turns() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_quiz_size")]
    pub quiz_size: usize,
    #[serde(default = "default_max_bullets")]
    pub max_bullets: usize,
    #[serde(default = "default_sections")]
    pub sections: usize,
    #[serde(default = "default_topics_per_section")]
    pub topics_per_section: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            quiz_size: default_quiz_size(),
            max_bullets: default_max_bullets(),
            sections: default_sections(),
            topics_per_section: default_topics_per_section(),
        }
    }
}

fn default_quiz_size() -> usize {
    5
}
fn default_max_bullets() -> usize {
    7
}
fn default_sections() -> usize {
    3
}
fn default_topics_per_section() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// When set, events are also written to a daily-rotated file in this directory.
    #[serde(default)]
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            file_dir: None,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// A configuration with every section defaulted, rooted at `data_dir`.
    ///
    /// The LLM provider is `disabled`, so generation and chat fail until
    /// a real provider is configured.
    pub fn minimal(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                data_dir: data_dir.into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig {
                provider: "disabled".to_string(),
                ..LlmConfig::default()
            },
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Checks cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            anyhow::bail!("chunking.max_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
        }

        if self.retrieval.top_k < 1 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.hybrid_alpha) {
            anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        if self.llm.context_tokens == 0 {
            anyhow::bail!("llm.context_tokens must be > 0");
        }
        if self.llm.history_turns < 2 {
            anyhow::bail!("llm.history_turns must be >= 2");
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        if self.generation.quiz_size == 0 {
            anyhow::bail!("generation.quiz_size must be > 0");
        }
        if self.generation.max_bullets == 0 {
            anyhow::bail!("generation.max_bullets must be > 0");
        }
        if self.generation.sections == 0 || self.generation.topics_per_section == 0 {
            anyhow::bail!("generation.sections and generation.topics_per_section must be > 0");
        }

        Ok(())
    }

    /// Applies `STUDY_LLM_*` environment overrides.
    fn apply_env(&mut self) {
        if let Ok(provider) = std::env::var("STUDY_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(model) = std::env::var("STUDY_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Ok(url) = std::env::var("STUDY_LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.apply_env();
    config.validate()?;

    Ok(config)
}
