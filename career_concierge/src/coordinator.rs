//! Single request/response entry point combining plan building, execution,
//! and memory updates.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::agent::{AgentRegistry, Capability};
use crate::engine::{AgentResult, ExecutionEngine, ResultStatus, RunStatus, StepOutcome};
use crate::error::{ConciergeError, Result};
use crate::memory::{ContextView, InteractionRecord, MemoryBank};
use crate::plan::PlanBuilder;
use crate::settings::Settings;
use crate::tools::{CatalogSearch, DigestSummarizer, ModelInference, OfflineModel, SearchProvider};

/// Per-capability slice of the user-facing response. Loop steps contribute
/// one entry per iteration.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub capability: Capability,
    pub status: ResultStatus,
    pub payload: Value,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub student_id: String,
    pub query: String,
    pub status: RunStatus,
    pub results: Vec<CapabilityReport>,
    pub clarification: Option<String>,
    pub summary: String,
}

pub struct Coordinator {
    memory: Arc<MemoryBank>,
    planner: PlanBuilder,
    engine: ExecutionEngine,
    window: usize,
}

impl Coordinator {
    pub fn new(memory: Arc<MemoryBank>, registry: Arc<AgentRegistry>, settings: &Settings) -> Self {
        Self {
            memory,
            planner: PlanBuilder::new(settings.engine.loop_max_iterations),
            engine: ExecutionEngine::new(registry, settings.engine.clone()),
            window: settings.memory.recent_window,
        }
    }

    /// Fully wired coordinator on the offline capability backends. The entry
    /// point for deployments without hosted model/search credentials, and
    /// for tests.
    pub fn offline(settings: &Settings) -> Result<Self> {
        let model: Arc<dyn ModelInference> = Arc::new(OfflineModel);
        let search: Arc<dyn SearchProvider> = Arc::new(CatalogSearch);
        let summarizer = Arc::new(DigestSummarizer::new(settings.memory.summary_max_chars));
        let memory = Arc::new(MemoryBank::new(settings.memory.clone(), summarizer)?);
        let registry = Arc::new(AgentRegistry::with_defaults(model, search));
        Ok(Self::new(memory, registry, settings))
    }

    pub fn memory(&self) -> &Arc<MemoryBank> {
        &self.memory
    }

    /// One call: load context, build a plan, run it, merge results, append
    /// exactly one interaction record, and check the compaction trigger.
    /// Partial failures and clarifications are themselves recorded; only
    /// storage errors (and malformed requests) surface as errors.
    #[instrument(skip(self, extra))]
    pub async fn process(&self, student_id: &str, query: &str, extra: Value) -> Result<Response> {
        if query.trim().is_empty() {
            return Err(ConciergeError::Validation("query is empty".to_string()));
        }

        self.memory.get_profile(student_id)?;
        let context = self.memory.get_context(student_id, self.window)?;

        let plan = self.planner.build(query, &context);
        let report = self.engine.execute(&plan, query, &context, &extra).await?;

        let response = merge(student_id, query, report.status, &report.steps);

        let capabilities = invoked_capabilities(report.results());
        let record =
            InteractionRecord::new(query.to_string(), capabilities, response.summary.clone());
        self.memory.append_interaction(student_id, record)?;

        self.memory.maybe_compact(student_id).await;

        info!(student_id, status = ?response.status, "processed request");
        Ok(response)
    }

    /// The bounded memory view for a student, as agents see it.
    pub fn context(&self, student_id: &str, window: usize) -> Result<ContextView> {
        self.memory.get_context(student_id, window)
    }
}

fn invoked_capabilities<'a>(results: impl Iterator<Item = &'a AgentResult>) -> Vec<Capability> {
    let mut capabilities = Vec::new();
    for result in results {
        if !capabilities.contains(&result.capability) {
            capabilities.push(result.capability);
        }
    }
    capabilities
}

fn merge(student_id: &str, query: &str, status: RunStatus, steps: &[StepOutcome]) -> Response {
    let mut results = Vec::new();
    let mut clarification = None;

    for step in steps {
        match step {
            StepOutcome::Executed { results: step_results } => {
                results.extend(step_results.iter().map(|r| CapabilityReport {
                    capability: r.capability,
                    status: r.status,
                    payload: r.payload.clone(),
                    error: r.error.clone(),
                }));
            }
            StepOutcome::Clarification { question } => {
                clarification = Some(question.clone());
            }
        }
    }

    let succeeded = results
        .iter()
        .filter(|r| r.status == ResultStatus::Success)
        .count();
    let summary = match status {
        RunStatus::Complete => format!("completed {succeeded} invocation(s)"),
        RunStatus::Partial => format!("partial result: {succeeded} of {} succeeded", results.len()),
        RunStatus::NeedsClarification => "needs clarification".to_string(),
    };

    Response {
        student_id: student_id.to_string(),
        query: query.to_string(),
        status,
        results,
        clarification,
        summary,
    }
}
