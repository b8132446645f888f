//! End-to-end tests through the coordinator: routing, execution modes,
//! failure isolation, and memory durability all exercised via the public
//! surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;

use career_concierge::{
    agent::{Agent, AgentRegistry, AgentRequest, Capability},
    coordinator::Coordinator,
    engine::{ResultStatus, RunStatus},
    error::Result,
    memory::MemoryBank,
    settings::Settings,
    tools::{CatalogSearch, DigestSummarizer, ModelInference, OfflineModel, SearchProvider},
};

/// Coordinator on the offline backends with in-memory storage.
fn offline_coordinator() -> Coordinator {
    Coordinator::offline(&Settings::default()).unwrap()
}

/// Coordinator whose resource curator stalls past the invocation timeout.
fn coordinator_with_stalled_curator(settings: &Settings) -> Coordinator {
    let model: Arc<dyn ModelInference> = Arc::new(OfflineModel);
    let search: Arc<dyn SearchProvider> = Arc::new(CatalogSearch);
    let summarizer = Arc::new(DigestSummarizer::new(settings.memory.summary_max_chars));
    let memory = Arc::new(MemoryBank::new(settings.memory.clone(), summarizer).unwrap());

    let mut registry = AgentRegistry::with_defaults(model, search);
    registry.register(Arc::new(StalledCurator));
    Coordinator::new(memory, Arc::new(registry), settings)
}

struct StalledCurator;

#[async_trait]
impl Agent for StalledCurator {
    fn capability(&self) -> Capability {
        Capability::ResourceCurator
    }

    async fn handle(&self, _request: &AgentRequest) -> Result<Value> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({"resources": []}))
    }
}

#[tokio::test]
async fn single_intent_runs_one_agent_and_lands_in_history() {
    let coordinator = offline_coordinator();

    let response = coordinator
        .process("alice", "I need medium-level array problems", Value::Null)
        .await
        .unwrap();

    assert_eq!(response.status, RunStatus::Complete);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].capability, Capability::InterviewPrep);
    assert_eq!(response.results[0].status, ResultStatus::Success);
    assert!(response.results[0].payload["problems"].is_array());

    let context = coordinator.context("alice", 10).unwrap();
    assert_eq!(context.recent.len(), 1);
    assert_eq!(context.recent[0].capabilities, vec![Capability::InterviewPrep]);
}

#[tokio::test]
async fn multi_platform_request_fans_out_to_several_agents() {
    let coordinator = offline_coordinator();

    let response = coordinator
        .process("alice", "find resources across multiple platforms", Value::Null)
        .await
        .unwrap();

    assert_eq!(response.status, RunStatus::Complete);
    assert!(response.results.len() >= 2);
    let capabilities: Vec<_> = response.results.iter().map(|r| r.capability).collect();
    assert!(capabilities.contains(&Capability::ResourceCurator));
    assert!(capabilities.contains(&Capability::InterviewPrep));
}

#[tokio::test(start_paused = true)]
async fn stalled_branch_times_out_without_hiding_the_others() {
    let mut settings = Settings::default();
    settings.engine.invocation_timeout_seconds = 1;
    settings.engine.max_retries = 0;
    let coordinator = coordinator_with_stalled_curator(&settings);

    let response = coordinator
        .process("alice", "find resources across multiple platforms", Value::Null)
        .await
        .unwrap();

    assert_eq!(response.status, RunStatus::Partial);
    let curator = response
        .results
        .iter()
        .find(|r| r.capability == Capability::ResourceCurator)
        .unwrap();
    assert_eq!(curator.status, ResultStatus::Timeout);

    let prep = response
        .results
        .iter()
        .find(|r| r.capability == Capability::InterviewPrep)
        .unwrap();
    assert_eq!(prep.status, ResultStatus::Success);

    // The partial exchange is still one history record.
    let context = coordinator.context("alice", 10).unwrap();
    assert_eq!(context.recent.len(), 1);
}

#[tokio::test]
async fn students_never_see_each_other() {
    let coordinator = offline_coordinator();

    coordinator
        .process("alice", "resources for learning graphs", Value::Null)
        .await
        .unwrap();
    coordinator
        .process("bob", "review my resume", json!({"resume": "Python and SQL"}))
        .await
        .unwrap();

    let alice = coordinator.context("alice", 10).unwrap();
    let bob = coordinator.context("bob", 10).unwrap();
    assert_eq!(alice.recent.len(), 1);
    assert_eq!(bob.recent.len(), 1);
    assert_ne!(alice.recent[0].query, bob.recent[0].query);
}

#[tokio::test]
async fn history_survives_a_restart_with_sled() {
    let dir = tempdir().unwrap();
    let mut settings = Settings::default();
    settings.memory.provider = "sled".to_string();
    settings.memory.persistence_path = Some(dir.path().join("memory"));

    {
        let coordinator = Coordinator::offline(&settings).unwrap();
        coordinator
            .process("alice", "plan my study schedule for 4 weeks", Value::Null)
            .await
            .unwrap();
    }

    let reopened = Coordinator::offline(&settings).unwrap();
    let context = reopened.context("alice", 10).unwrap();
    assert_eq!(context.recent.len(), 1);
    assert_eq!(context.recent[0].capabilities, vec![Capability::StudyPlanner]);
}

#[tokio::test]
async fn compaction_kicks_in_after_enough_interactions() {
    let mut settings = Settings::default();
    settings.memory.compaction_threshold = 5;
    settings.memory.recent_window = 2;
    let coordinator = Coordinator::offline(&settings).unwrap();

    for i in 0..6 {
        coordinator
            .process("alice", &format!("resources for topic {i}"), Value::Null)
            .await
            .unwrap();
    }

    let context = coordinator.context("alice", 2).unwrap();
    let summary = context.summary.expect("compaction should have produced a summary");
    assert!(summary.digest.contains("interactions"));
    assert_eq!(context.recent.len(), 2);
    assert!(context.recent[1].query.contains("topic 5"));
}
