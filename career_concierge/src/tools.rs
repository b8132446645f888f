//! External capability interfaces and their offline implementations.
//!
//! Model inference, web search, and history summarization are collaborators
//! of the core, not part of it. Agents and the memory bank talk to them
//! through the traits below. The offline implementations are deterministic
//! and ship for ephemeral deployments and tests.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::agent::Capability;
use crate::error::{ConciergeError, Result};
use crate::memory::InteractionRecord;

/// One search result, in provider order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Language-model invocation. Failures surface as `ConciergeError::Tool`
/// (rate limits, malformed output) and are folded into failed agent results
/// by the execution engine.
#[async_trait]
pub trait ModelInference: Send + Sync {
    async fn invoke(&self, capability: Capability, prompt: &str) -> Result<String>;
}

/// Web-search backing tool for the resource curator.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// History digestion used by memory compaction. A failure leaves the prior
/// summary in place.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        prior_digest: Option<&str>,
        records: &[InteractionRecord],
    ) -> Result<String>;
}

// --- Offline implementations ---

/// Deterministic stand-in for a hosted model.
pub struct OfflineModel;

#[async_trait]
impl ModelInference for OfflineModel {
    async fn invoke(&self, capability: Capability, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(ConciergeError::Tool("empty prompt".to_string()));
        }
        Ok(format!(
            "[{}] Focus on fundamentals first, then practice under time pressure.",
            capability
        ))
    }
}

static PLATFORM_CATALOG: Lazy<Vec<SearchHit>> = Lazy::new(|| {
    vec![
        SearchHit {
            title: "LeetCode Patterns".to_string(),
            url: "https://leetcode.com".to_string(),
            snippet: "Curated problem lists grouped by pattern.".to_string(),
        },
        SearchHit {
            title: "NeetCode".to_string(),
            url: "https://neetcode.io".to_string(),
            snippet: "Video walkthroughs with practice tracks.".to_string(),
        },
        SearchHit {
            title: "System Design Primer".to_string(),
            url: "https://github.com/donnemartin/system-design-primer".to_string(),
            snippet: "Open-source system design study guide.".to_string(),
        },
        SearchHit {
            title: "ByteByteGo".to_string(),
            url: "https://bytebytego.com".to_string(),
            snippet: "Illustrated system design newsletter and courses.".to_string(),
        },
    ]
});

/// Search over a fixed platform catalog. Matches on whole-word overlap with
/// the query, falling back to the full catalog for broad queries.
pub struct CatalogSearch;

#[async_trait]
impl SearchProvider for CatalogSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query_lower = query.to_lowercase();
        let matched: Vec<SearchHit> = PLATFORM_CATALOG
            .iter()
            .filter(|hit| {
                let haystack = format!("{} {}", hit.title, hit.snippet).to_lowercase();
                query_lower
                    .split_whitespace()
                    .any(|word| word.len() > 3 && haystack.contains(word))
            })
            .cloned()
            .collect();

        if matched.is_empty() {
            Ok(PLATFORM_CATALOG.clone())
        } else {
            Ok(matched)
        }
    }
}

/// Digest builder used by default for compaction: interaction count,
/// capability tally, and the most recent request topics, bounded in size.
pub struct DigestSummarizer {
    max_chars: usize,
}

impl DigestSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

#[async_trait]
impl Summarizer for DigestSummarizer {
    async fn summarize(
        &self,
        prior_digest: Option<&str>,
        records: &[InteractionRecord],
    ) -> Result<String> {
        let mut tally: Vec<(Capability, usize)> = Vec::new();
        for record in records {
            for capability in &record.capabilities {
                match tally.iter_mut().find(|(c, _)| c == capability) {
                    Some((_, n)) => *n += 1,
                    None => tally.push((*capability, 1)),
                }
            }
        }

        let tally_text = tally
            .iter()
            .map(|(c, n)| format!("{c}: {n}"))
            .collect::<Vec<_>>()
            .join(", ");

        let recent_topics = records
            .iter()
            .rev()
            .take(3)
            .map(|r| r.query.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        let mut digest = match prior_digest {
            Some(prior) if !prior.is_empty() => format!(
                "{prior} | +{} interactions ({tally_text}); recently: {recent_topics}",
                records.len()
            ),
            _ => format!(
                "{} interactions ({tally_text}); recently: {recent_topics}",
                records.len()
            ),
        };

        if digest.chars().count() > self.max_chars {
            // Keep the tail of the digest when over the size bound.
            digest = match self.max_chars {
                0 => String::new(),
                max => {
                    let drop = digest.chars().count() - max;
                    format!("…{}", digest.chars().skip(drop + 1).collect::<String>())
                }
            };
        }

        Ok(digest)
    }
}
