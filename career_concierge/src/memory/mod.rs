//! Per-student memory bank with append-only history and context compaction.
//!
//! State is partitioned by student id: a dashmap of independently lockable
//! entries, so operations on different students never contend. Within one
//! student, writes are serialized by the entry's RwLock and reads may overlap
//! completed writes. The only suspension point is the summarization call
//! inside `compact`, which runs with no lock held.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::agent::Capability;
use crate::error::Result;
use crate::settings::MemoryConfig;
use crate::tools::Summarizer;

pub mod store;
use store::ProfileStore;

/// Ordinal skill estimate per topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// Identity and accumulated estimates for one student. Created on first
/// interaction, mutated by agents through the memory bank, never deleted
/// automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: String,
    pub skills: HashMap<String, SkillLevel>,
    pub preferences: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl StudentProfile {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            skills: HashMap::new(),
            preferences: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// One logged request/response exchange. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub capabilities: Vec<Capability>,
    pub summary: String,
}

impl InteractionRecord {
    pub fn new(query: String, capabilities: Vec<Capability>, summary: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query,
            capabilities,
            summary,
        }
    }
}

/// Bounded digest of history older than the raw tail. At most one live
/// summary per student; regeneration supersedes, never appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub digest: String,
    /// Index one past the last record the digest covers. Always <= the
    /// persisted record count.
    pub covered: usize,
    pub generated_at: DateTime<Utc>,
}

/// Everything stored for one student. Serialized as a unit by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentState {
    pub profile: StudentProfile,
    pub records: Vec<InteractionRecord>,
    pub summary: Option<ContextSummary>,
}

impl StudentState {
    pub fn new(profile: StudentProfile) -> Self {
        Self {
            profile,
            records: Vec::new(),
            summary: None,
        }
    }

    fn covered(&self) -> usize {
        self.summary.as_ref().map_or(0, |s| s.covered)
    }
}

/// The bounded view agents consume instead of full history.
#[derive(Debug, Clone, Serialize)]
pub struct ContextView {
    pub profile: StudentProfile,
    pub recent: Vec<InteractionRecord>,
    pub summary: Option<ContextSummary>,
}

type Entry = Arc<RwLock<StudentState>>;

pub struct MemoryBank {
    students: DashMap<String, Entry>,
    store: Box<dyn ProfileStore>,
    summarizer: Arc<dyn Summarizer>,
    config: MemoryConfig,
}

impl MemoryBank {
    pub fn new(config: MemoryConfig, summarizer: Arc<dyn Summarizer>) -> Result<Self> {
        let store = store::open_store(&config)?;
        Ok(Self {
            students: DashMap::new(),
            store,
            summarizer,
            config,
        })
    }

    /// Locate or create the lockable entry for a student. First sight of an
    /// id consults the store, so profiles survive restarts.
    fn entry(&self, student_id: &str) -> Result<Entry> {
        if let Some(existing) = self.students.get(student_id) {
            return Ok(existing.clone());
        }

        match self.students.entry(student_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let state = match self.store.load(student_id)? {
                    Some(state) => state,
                    None => {
                        let state = StudentState::new(StudentProfile::new(student_id));
                        self.store.save(student_id, &state)?;
                        info!(student_id, "created student profile");
                        state
                    }
                };
                let entry: Entry = Arc::new(RwLock::new(state));
                vacant.insert(entry.clone());
                Ok(entry)
            }
        }
    }

    /// Idempotent lookup-or-create.
    pub fn get_profile(&self, student_id: &str) -> Result<StudentProfile> {
        let entry = self.entry(student_id)?;
        let profile = entry.read().profile.clone();
        Ok(profile)
    }

    /// Merge skill estimates and preferences into a profile.
    pub fn update_profile(
        &self,
        student_id: &str,
        skills: HashMap<String, SkillLevel>,
        preferences: HashMap<String, String>,
    ) -> Result<()> {
        let entry = self.entry(student_id)?;
        let mut state = entry.write();
        state.profile.skills.extend(skills);
        state.profile.preferences.extend(preferences);
        self.store.save(student_id, &state)?;
        Ok(())
    }

    /// Atomic append: the record is visible to any subsequent read before
    /// this returns.
    #[instrument(skip(self, record))]
    pub fn append_interaction(&self, student_id: &str, mut record: InteractionRecord) -> Result<()> {
        let entry = self.entry(student_id)?;
        let mut state = entry.write();

        // Appends are serialized by the write lock; clamp the timestamp so
        // the sequence stays non-decreasing even under clock hiccups.
        if let Some(last) = state.records.last() {
            if record.timestamp < last.timestamp {
                record.timestamp = last.timestamp;
            }
        }

        state.records.push(record);
        self.store.save(student_id, &state)?;
        debug!(student_id, total = state.records.len(), "appended interaction");
        Ok(())
    }

    /// Most recent `window` raw records plus the current summary for anything
    /// older.
    pub fn get_context(&self, student_id: &str, window: usize) -> Result<ContextView> {
        let entry = self.entry(student_id)?;
        let state = entry.read();

        let start = state.records.len().saturating_sub(window);
        Ok(ContextView {
            profile: state.profile.clone(),
            recent: state.records[start..].to_vec(),
            summary: state.summary.clone(),
        })
    }

    /// Number of records not yet folded into the summary.
    pub fn uncompacted_len(&self, student_id: &str) -> Result<usize> {
        let entry = self.entry(student_id)?;
        let state = entry.read();
        Ok(state.records.len() - state.covered())
    }

    pub fn needs_compaction(&self, student_id: &str) -> Result<bool> {
        Ok(self.uncompacted_len(student_id)? > self.config.compaction_threshold)
    }

    /// Digest the uncompacted tail into a superseding summary. The
    /// summarization call runs with no lock held; the swap re-validates the
    /// covered index against the current record count. Returns whether a new
    /// summary was installed. A summarizer failure is surfaced to the caller
    /// and leaves the prior summary untouched.
    #[instrument(skip(self))]
    pub async fn compact(&self, student_id: &str) -> Result<bool> {
        let entry = self.entry(student_id)?;

        let (prior_digest, covered, tail) = {
            let state = entry.read();
            let covered = state.covered();
            let tail = state.records[covered..].to_vec();
            let prior = state.summary.as_ref().map(|s| s.digest.clone());
            (prior, covered, tail)
        };

        if tail.is_empty() {
            return Ok(false);
        }

        let digest = self
            .summarizer
            .summarize(prior_digest.as_deref(), &tail)
            .await?;

        let new_covered = covered + tail.len();

        let mut state = entry.write();
        // Records only grow and compactions of the same student serialize on
        // the summary they start from, but a concurrent compact may have
        // advanced further already.
        if state.covered() >= new_covered {
            return Ok(false);
        }
        debug_assert!(new_covered <= state.records.len());
        state.summary = Some(ContextSummary {
            digest,
            covered: new_covered,
            generated_at: Utc::now(),
        });
        self.store.save(student_id, &state)?;
        info!(student_id, covered = new_covered, "compacted interaction history");
        Ok(true)
    }

    /// Compact when the uncompacted tail exceeds the configured threshold.
    /// Failures are logged and swallowed: the system keeps serving raw
    /// history until the next successful attempt.
    pub async fn maybe_compact(&self, student_id: &str) {
        match self.needs_compaction(student_id) {
            Ok(true) => {
                if let Err(err) = self.compact(student_id).await {
                    warn!(student_id, %err, "compaction failed; keeping raw history");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(student_id, %err, "compaction check failed"),
        }
    }
}
