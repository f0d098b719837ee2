//! Retrieval index over a user's documents.
//!
//! An [`Index`] holds the passages of a fixed document set plus the
//! statistics needed to rank them: BM25 keyword scores and, when an
//! [`Embedder`] was supplied at build time, one vector per passage for
//! cosine similarity. Hybrid ranking follows the same recipe as keyword /
//! vector search everywhere else in the crate:
//!
//! 1. Score each channel independently.
//! 2. Min-max normalize each channel to `[0, 1]`.
//! 3. `hybrid = (1 - alpha) * keyword + alpha * vector`.
//! 4. Sort by score desc, then passage id asc.
//!
//! Querying takes `&self`; an index is never mutated after it is built.
//! Persistence is a single JSON file written atomically. Term statistics
//! are not stored; they are recomputed from the passages on load, so a
//! reloaded index ranks exactly like the one that was saved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, RetrievalConfig};
use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::error::{Result, StudyError};
use crate::models::{Document, DocumentFormat, Passage, PassageHit};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "do", "does", "each", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "if", "in", "into", "is", "it", "its", "may", "more", "most", "no",
    "not", "of", "on", "one", "or", "other", "our", "out", "she", "should", "so", "some", "such",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "to", "under", "up", "use", "used", "using", "very", "was", "we", "were", "what",
    "when", "where", "which", "while", "who", "will", "with", "would", "you", "your",
];

/// Source document summary kept inside the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub filename: String,
    pub format: DocumentFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PassageVectors {
    model: String,
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
struct TermStats {
    /// Per passage: term -> frequency.
    term_freqs: Vec<HashMap<String, u32>>,
    /// Per passage: token count.
    lengths: Vec<usize>,
    /// term -> number of passages containing it.
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl TermStats {
    fn compute(passages: &[Passage]) -> Self {
        let mut stats = TermStats::default();
        for passage in passages {
            let tokens = tokenize(&passage.text);
            let mut tf: HashMap<String, u32> = HashMap::new();
            for t in &tokens {
                *tf.entry(t.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *stats.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            stats.lengths.push(tokens.len());
            stats.term_freqs.push(tf);
        }
        let total: usize = stats.lengths.iter().sum();
        stats.avg_len = if passages.is_empty() {
            0.0
        } else {
            total as f64 / passages.len() as f64
        };
        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub documents: Vec<IndexedDocument>,
    pub passages: Vec<Passage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vectors: Option<PassageVectors>,
    #[serde(skip)]
    stats: TermStats,
}

impl Index {
    fn new(documents: Vec<IndexedDocument>, passages: Vec<Passage>) -> Self {
        let stats = TermStats::compute(&passages);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            documents,
            passages,
            vectors: None,
            stats,
        }
    }

    pub fn has_vectors(&self) -> bool {
        self.vectors.is_some()
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.vectors.as_ref().map(|v| v.model.as_str())
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.documents.iter().any(|d| d.id == document_id)
    }

    /// Keyword-only query.
    pub fn query(&self, text: &str, k: usize) -> Vec<PassageHit> {
        self.query_with(text, None, k, 0.0)
    }

    /// Hybrid query. `query_vec` is ignored when the index has no vectors.
    pub fn query_with(
        &self,
        text: &str,
        query_vec: Option<&[f32]>,
        k: usize,
        alpha: f64,
    ) -> Vec<PassageHit> {
        if k == 0 || self.passages.is_empty() {
            return Vec::new();
        }

        let keyword = self.keyword_scores(text);
        let vector = match (query_vec, &self.vectors) {
            (Some(q), Some(pv)) => pv
                .vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (i, cosine_similarity(q, v) as f64))
                .collect(),
            _ => Vec::new(),
        };

        let effective_alpha = if vector.is_empty() { 0.0 } else { alpha };
        let norm_k: HashMap<usize, f64> = normalize_scores(&keyword).into_iter().collect();
        let norm_v: HashMap<usize, f64> = normalize_scores(&vector).into_iter().collect();

        let candidates: HashSet<usize> = norm_k.keys().chain(norm_v.keys()).copied().collect();

        let mut scored: Vec<(usize, f64)> = candidates
            .into_iter()
            .map(|i| {
                let kw = norm_k.get(&i).copied().unwrap_or(0.0);
                let v = norm_v.get(&i).copied().unwrap_or(0.0);
                (i, (1.0 - effective_alpha) * kw + effective_alpha * v)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.passages[a.0].id.cmp(&self.passages[b.0].id))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| self.hit(i, score))
            .collect()
    }

    /// First passage of every document, in document order, capped at `k`.
    pub fn leading_passages(&self, k: usize) -> Vec<PassageHit> {
        self.passages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.chunk_index == 0)
            .take(k)
            .map(|(i, _)| self.hit(i, 0.0))
            .collect()
    }

    /// Terms that occur in more than one passage, most widespread first.
    pub fn keywords(&self, limit: usize) -> Vec<String> {
        let mut terms: Vec<(&String, &usize)> = self
            .stats
            .doc_freq
            .iter()
            .filter(|(term, df)| **df > 1 && !term.chars().all(|c| c.is_ascii_digit()))
            .collect();
        terms.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        terms
            .into_iter()
            .take(limit)
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(self)
            .map_err(|e| StudyError::Storage(format!("serialize index: {}", e)))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!(index_id = %self.id, path = %path.display(), "index saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            StudyError::IndexBuild(format!("cannot read index {}: {}", path.display(), e))
        })?;
        let mut index: Index = serde_json::from_slice(&bytes).map_err(|e| {
            StudyError::IndexBuild(format!("corrupt index {}: {}", path.display(), e))
        })?;
        if let Some(pv) = &index.vectors {
            if pv.vectors.len() != index.passages.len() {
                return Err(StudyError::IndexBuild(format!(
                    "corrupt index {}: {} vectors for {} passages",
                    path.display(),
                    pv.vectors.len(),
                    index.passages.len()
                )));
            }
        }
        index.stats = TermStats::compute(&index.passages);
        Ok(index)
    }

    fn keyword_scores(&self, text: &str) -> Vec<(usize, f64)> {
        let query_terms: HashSet<String> = tokenize(text).into_iter().collect();
        if query_terms.is_empty() {
            return Vec::new();
        }
        let n = self.passages.len() as f64;
        let avg_len = if self.stats.avg_len > 0.0 {
            self.stats.avg_len
        } else {
            1.0
        };

        self.stats
            .term_freqs
            .iter()
            .enumerate()
            .filter_map(|(i, tf)| {
                let len = self.stats.lengths[i] as f64;
                let score: f64 = query_terms
                    .iter()
                    .filter_map(|term| {
                        let f = *tf.get(term)? as f64;
                        let df = *self.stats.doc_freq.get(term)? as f64;
                        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                        Some(
                            idf * f * (BM25_K1 + 1.0)
                                / (f + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len)),
                        )
                    })
                    .sum();
                (score > 0.0).then_some((i, score))
            })
            .collect()
    }

    fn hit(&self, i: usize, score: f64) -> PassageHit {
        let passage = &self.passages[i];
        let filename = self
            .documents
            .iter()
            .find(|d| d.id == passage.document_id)
            .map(|d| d.filename.clone())
            .unwrap_or_default();
        PassageHit {
            passage_id: passage.id.clone(),
            document_id: passage.document_id.clone(),
            filename,
            score,
            text: passage.text.clone(),
        }
    }
}

/// Builds indexes from ingested documents.
pub struct IndexBuilder {
    max_tokens: usize,
    overlap_tokens: usize,
}

impl IndexBuilder {
    pub fn new(chunking: &ChunkingConfig) -> Self {
        Self {
            max_tokens: chunking.max_tokens,
            overlap_tokens: chunking.overlap_tokens,
        }
    }

    /// Builds a keyword index. Fails on an empty set or a document with no text.
    pub fn build(&self, documents: &[Document]) -> Result<Index> {
        if documents.is_empty() {
            return Err(StudyError::IndexBuild(
                "cannot build an index from zero documents".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut indexed = Vec::new();
        let mut passages = Vec::new();

        for doc in documents {
            if !seen.insert(doc.id.as_str()) {
                tracing::warn!(document_id = %doc.id, filename = %doc.filename, "duplicate document skipped");
                continue;
            }
            let doc_passages =
                chunk_text(&doc.id, &doc.text, self.max_tokens, self.overlap_tokens);
            if doc_passages.is_empty() {
                return Err(StudyError::IndexBuild(format!(
                    "document {} has no indexable text",
                    doc.filename
                )));
            }
            indexed.push(IndexedDocument {
                id: doc.id.clone(),
                filename: doc.filename.clone(),
                format: doc.format,
            });
            passages.extend(doc_passages);
        }

        let index = Index::new(indexed, passages);
        tracing::info!(
            index_id = %index.id,
            documents = index.documents.len(),
            passages = index.passages.len(),
            "index built"
        );
        Ok(index)
    }

    /// Builds an index and attaches one embedding vector per passage.
    pub async fn build_with_embeddings(
        &self,
        documents: &[Document],
        embedder: &dyn Embedder,
    ) -> Result<Index> {
        let mut index = self.build(documents)?;
        let texts: Vec<String> = index.passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .map_err(|e| StudyError::IndexBuild(format!("embedding failed: {}", e)))?;
        if vectors.len() != texts.len() {
            return Err(StudyError::IndexBuild(format!(
                "embedder returned {} vectors for {} passages",
                vectors.len(),
                texts.len()
            )));
        }
        index.vectors = Some(PassageVectors {
            model: embedder.model_name().to_string(),
            vectors,
        });
        Ok(index)
    }
}

/// Query front-end shared by generation and chat: embeds the query when the
/// index carries vectors and an embedder is available, then runs the hybrid
/// query with the configured `top_k` and `hybrid_alpha`.
pub struct Retriever<'a> {
    index: &'a Index,
    embedder: Option<&'a dyn Embedder>,
    top_k: usize,
    alpha: f64,
}

impl<'a> Retriever<'a> {
    pub fn new(
        index: &'a Index,
        embedder: Option<&'a dyn Embedder>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            top_k: retrieval.top_k,
            alpha: retrieval.hybrid_alpha,
        }
    }

    pub async fn search(&self, text: &str) -> Vec<PassageHit> {
        self.search_k(text, self.top_k).await
    }

    pub async fn search_k(&self, text: &str, k: usize) -> Vec<PassageHit> {
        let query_vec = match (self.embedder, self.index.has_vectors()) {
            (Some(embedder), true) => match embed_query(embedder, text).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed, using keywords only");
                    None
                }
            },
            _ => None,
        };
        self.index
            .query_with(text, query_vec.as_deref(), k, self.alpha)
    }

    /// Like [`search_k`](Self::search_k), but never empty: with no match it
    /// falls back to the leading passage of each document.
    pub async fn search_or_lead(&self, text: &str, k: usize) -> Vec<PassageHit> {
        let hits = self.search_k(text, k).await;
        if hits.is_empty() {
            tracing::debug!(query = %text, "no passages matched, using leading passages");
            self.index.leading_passages(k.max(1))
        } else {
            hits
        }
    }
}

/// Lowercased alphanumeric tokens, stopwords and single characters removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Min-max normalize scores to [0, 1]. Equal scores all normalize to 1.0.
fn normalize_scores(candidates: &[(usize, f64)]) -> Vec<(usize, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|(i, s)| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            };
            (*i, norm)
        })
        .collect()
}

/// Document frequency table, exposed for diagnostics in the CLI.
pub fn term_summary(index: &Index, limit: usize) -> BTreeMap<String, usize> {
    index
        .keywords(limit)
        .into_iter()
        .map(|t| {
            let df = index.stats.doc_freq.get(&t).copied().unwrap_or(0);
            (t, df)
        })
        .collect()
}
