//! Execution engine: runs an execution plan against the agent set.
//!
//! Every invocation is bounded and caught at the invocation boundary; a
//! failing, timed-out, or canceled agent becomes a failed `AgentResult` and
//! never crashes the engine. Parallel siblings are reassembled by their
//! declared capability order, not arrival order.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument, warn};

use crate::agent::{AgentRegistry, AgentRequest, Capability};
use crate::error::Result;
use crate::memory::ContextView;
use crate::plan::{ExecMode, ExecutionPlan, PlanStep, StopCondition};
use crate::settings::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
    Timeout,
    Canceled,
}

/// Outcome of one agent invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub capability: Capability,
    pub status: ResultStatus,
    pub payload: Value,
    pub error: Option<String>,
    pub retryable: bool,
    pub elapsed_ms: u64,
}

impl AgentResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Results of one plan step, in declared capability order.
#[derive(Debug, Clone, Serialize)]
pub enum StepOutcome {
    Executed { results: Vec<AgentResult> },
    Clarification { question: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Partial,
    NeedsClarification,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub steps: Vec<StepOutcome>,
    pub status: RunStatus,
}

impl EngineReport {
    /// All invocation results across steps, flattened in plan order.
    pub fn results(&self) -> impl Iterator<Item = &AgentResult> {
        self.steps.iter().flat_map(|step| {
            let results: &[AgentResult] = match step {
                StepOutcome::Executed { results } => results,
                StepOutcome::Clarification { .. } => &[],
            };
            results.iter()
        })
    }
}

pub struct ExecutionEngine {
    registry: Arc<AgentRegistry>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<AgentRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Execute the plan, honoring per-step mode semantics. Returns a report
    /// with one result set per executed step and an overall status.
    #[instrument(skip_all, fields(steps = plan.steps.len()))]
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        query: &str,
        context: &ContextView,
        extra: &Value,
    ) -> Result<EngineReport> {
        plan.validate()?;

        let deadline = self.config.plan_deadline().map(|d| Instant::now() + d);
        let mut steps = Vec::new();
        let mut status = RunStatus::Complete;

        for step in &plan.steps {
            match step {
                PlanStep::Clarify { question } => {
                    // Unroutable: no agent is invoked.
                    steps.push(StepOutcome::Clarification {
                        question: question.clone(),
                    });
                    status = RunStatus::NeedsClarification;
                    break;
                }
                PlanStep::Run { capabilities, mode } => {
                    let (results, abort) = match mode {
                        ExecMode::Sequential => {
                            self.run_sequential(capabilities, query, context, extra, deadline)
                                .await
                        }
                        ExecMode::Parallel => (
                            self.run_parallel(capabilities, query, context, extra, deadline)
                                .await,
                            false,
                        ),
                        ExecMode::Loop {
                            max_iterations,
                            stop,
                        } => (
                            self.run_loop(
                                capabilities[0],
                                *max_iterations,
                                stop,
                                query,
                                context,
                                extra,
                                deadline,
                            )
                            .await,
                            false,
                        ),
                    };

                    if results.iter().any(|r| !r.is_success()) {
                        status = RunStatus::Partial;
                    }
                    steps.push(StepOutcome::Executed { results });

                    if abort {
                        warn!("sequential step failed non-retryably; aborting remaining steps");
                        break;
                    }
                }
            }
        }

        Ok(EngineReport { steps, status })
    }

    fn request(
        query: &str,
        context: &ContextView,
        extra: &Value,
        prior: Option<Value>,
    ) -> AgentRequest {
        AgentRequest {
            query: query.to_string(),
            context: context.clone(),
            extra: extra.clone(),
            prior,
        }
    }

    /// Declared order; each agent may consume the preceding result's payload.
    /// A non-retryable failure stops the step and flags the plan for abort.
    async fn run_sequential(
        &self,
        capabilities: &[Capability],
        query: &str,
        context: &ContextView,
        extra: &Value,
        deadline: Option<Instant>,
    ) -> (Vec<AgentResult>, bool) {
        let mut results: Vec<AgentResult> = Vec::with_capacity(capabilities.len());

        for &capability in capabilities {
            let prior = results
                .last()
                .filter(|r| r.is_success())
                .map(|r| r.payload.clone());
            let request = Self::request(query, context, extra, prior);
            let result = self.invoke_with_retry(capability, &request, deadline).await;
            let failed = !result.is_success();
            results.push(result);
            if failed {
                return (results, true);
            }
        }

        (results, false)
    }

    /// All branches run as independent tasks; completion order is
    /// unspecified, and a failing branch never cancels its siblings. Results
    /// come back in declared capability order.
    async fn run_parallel(
        &self,
        capabilities: &[Capability],
        query: &str,
        context: &ContextView,
        extra: &Value,
        deadline: Option<Instant>,
    ) -> Vec<AgentResult> {
        let handles: Vec<_> = capabilities
            .iter()
            .map(|&capability| {
                let request = Self::request(query, context, extra, None);
                let registry = self.registry.clone();
                let config = self.config.clone();
                tokio::spawn(async move {
                    invoke_with_retry(&registry, &config, capability, &request, deadline).await
                })
            })
            .collect();

        let joined = join_all(handles).await;
        joined
            .into_iter()
            .zip(capabilities)
            .map(|(joined, &capability)| match joined {
                Ok(result) => result,
                // A panicking agent task is isolated like any other failure.
                Err(err) => AgentResult {
                    capability,
                    status: ResultStatus::Failed,
                    payload: Value::Null,
                    error: Some(format!("agent task panicked: {err}")),
                    retryable: false,
                    elapsed_ms: 0,
                },
            })
            .collect()
    }

    /// Bounded refinement: feed the prior result back until the stop
    /// condition holds or the iteration bound is hit. Every iteration's
    /// result is kept for auditing.
    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        capability: Capability,
        max_iterations: u32,
        stop: &StopCondition,
        query: &str,
        context: &ContextView,
        extra: &Value,
        deadline: Option<Instant>,
    ) -> Vec<AgentResult> {
        let mut results: Vec<AgentResult> = Vec::new();

        for iteration in 0..max_iterations {
            let prior = results
                .last()
                .filter(|r| r.is_success())
                .map(|r| r.payload.clone());
            let request = Self::request(query, context, extra, prior);
            let result = self.invoke_with_retry(capability, &request, deadline).await;
            results.push(result);

            if Self::stop_satisfied(stop, &results) {
                debug!(iteration = iteration + 1, "loop stop condition satisfied");
                break;
            }
            if matches!(results.last().map(|r| r.status), Some(ResultStatus::Canceled)) {
                break;
            }
        }

        results
    }

    fn stop_satisfied(stop: &StopCondition, results: &[AgentResult]) -> bool {
        match stop {
            StopCondition::SuccessCount(n) => {
                results.iter().filter(|r| r.is_success()).count() >= *n as usize
            }
            StopCondition::PayloadContains(needle) => results
                .last()
                .map_or(false, |r| r.payload.to_string().contains(needle.as_str())),
        }
    }

    async fn invoke_with_retry(
        &self,
        capability: Capability,
        request: &AgentRequest,
        deadline: Option<Instant>,
    ) -> AgentResult {
        invoke_with_retry(&self.registry, &self.config, capability, request, deadline).await
    }
}

/// Retry wrapper: retry-eligible failures rerun with identical inputs, no
/// memory re-read between attempts.
async fn invoke_with_retry(
    registry: &AgentRegistry,
    config: &EngineConfig,
    capability: Capability,
    request: &AgentRequest,
    deadline: Option<Instant>,
) -> AgentResult {
    let mut attempt = 0;
    loop {
        let result = invoke_once(registry, config, capability, request, deadline).await;
        if result.is_success() || !result.retryable || attempt >= config.max_retries {
            return result;
        }
        attempt += 1;
        warn!(%capability, attempt, "retrying agent invocation");
    }
}

/// One bounded invocation. Failures and expiries are converted into
/// results; nothing escapes. Expiry caused by the plan deadline reports
/// Canceled, expiry of the per-invocation budget reports Timeout.
async fn invoke_once(
    registry: &AgentRegistry,
    config: &EngineConfig,
    capability: Capability,
    request: &AgentRequest,
    deadline: Option<Instant>,
) -> AgentResult {
    let Some(agent) = registry.get(capability) else {
        return AgentResult {
            capability,
            status: ResultStatus::Failed,
            payload: Value::Null,
            error: Some(format!("no agent registered for {capability}")),
            retryable: false,
            elapsed_ms: 0,
        };
    };

    let per_invocation = config.invocation_timeout();
    let (budget, deadline_bound) = match deadline {
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return AgentResult {
                    capability,
                    status: ResultStatus::Canceled,
                    payload: Value::Null,
                    error: Some("plan deadline exhausted before invocation".to_string()),
                    retryable: false,
                    elapsed_ms: 0,
                };
            }
            if remaining < per_invocation {
                (remaining, true)
            } else {
                (per_invocation, false)
            }
        }
        None => (per_invocation, false),
    };

    let start = Instant::now();
    match timeout(budget, agent.handle(request)).await {
        Ok(Ok(payload)) => AgentResult {
            capability,
            status: ResultStatus::Success,
            payload,
            error: None,
            retryable: false,
            elapsed_ms: start.elapsed().as_millis() as u64,
        },
        Ok(Err(err)) => AgentResult {
            capability,
            status: ResultStatus::Failed,
            payload: Value::Null,
            retryable: err.is_retryable(),
            error: Some(err.to_string()),
            elapsed_ms: start.elapsed().as_millis() as u64,
        },
        Err(_) if deadline_bound => AgentResult {
            capability,
            status: ResultStatus::Canceled,
            payload: Value::Null,
            error: Some("canceled by plan deadline".to_string()),
            retryable: false,
            elapsed_ms: start.elapsed().as_millis() as u64,
        },
        Err(_) => AgentResult {
            capability,
            status: ResultStatus::Timeout,
            payload: Value::Null,
            error: Some(format!("timed out after {budget:?}")),
            retryable: true,
            elapsed_ms: start.elapsed().as_millis() as u64,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::error::ConciergeError;
    use crate::memory::StudentProfile;
    use crate::plan::PlanBuilder;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedAgent {
        capability: Capability,
        delay: Duration,
        fail: bool,
        retryable: bool,
        fail_first_n: u32,
        calls: AtomicU32,
    }

    impl ScriptedAgent {
        fn ok(capability: Capability) -> Self {
            Self::with_delay(capability, Duration::ZERO)
        }

        fn with_delay(capability: Capability, delay: Duration) -> Self {
            Self {
                capability,
                delay,
                fail: false,
                retryable: false,
                fail_first_n: 0,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(capability: Capability, retryable: bool) -> Self {
            Self {
                fail: true,
                retryable,
                ..Self::ok(capability)
            }
        }

        fn flaky(capability: Capability, fail_first_n: u32) -> Self {
            Self {
                fail_first_n,
                retryable: true,
                ..Self::ok(capability)
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn capability(&self) -> Capability {
            self.capability
        }

        async fn handle(&self, request: &AgentRequest) -> crate::error::Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail || call < self.fail_first_n {
                if self.retryable {
                    return Err(ConciergeError::Tool("scripted failure".to_string()));
                }
                return Err(ConciergeError::Validation("scripted failure".to_string()));
            }
            Ok(json!({
                "call": call,
                "prior_seen": request.prior.is_some(),
            }))
        }
    }

    fn context() -> ContextView {
        ContextView {
            profile: StudentProfile::new("s1"),
            recent: vec![],
            summary: None,
        }
    }

    fn engine(agents: Vec<ScriptedAgent>, config: EngineConfig) -> ExecutionEngine {
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register(Arc::new(agent));
        }
        ExecutionEngine::new(Arc::new(registry), config)
    }

    fn run_step(capabilities: Vec<Capability>, mode: ExecMode) -> ExecutionPlan {
        ExecutionPlan {
            steps: vec![PlanStep::Run { capabilities, mode }],
        }
    }

    fn no_retry() -> EngineConfig {
        EngineConfig {
            max_retries: 0,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn sequential_chains_prior_payloads() {
        let engine = engine(
            vec![
                ScriptedAgent::ok(Capability::InterviewPrep),
                ScriptedAgent::ok(Capability::StudyPlanner),
            ],
            no_retry(),
        );
        let plan = run_step(
            vec![Capability::InterviewPrep, Capability::StudyPlanner],
            ExecMode::Sequential,
        );

        let report = engine
            .execute(&plan, "prep then plan", &context(), &Value::Null)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Complete);
        let results: Vec<_> = report.results().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].payload["prior_seen"], false);
        assert_eq!(results[1].payload["prior_seen"], true);
    }

    #[tokio::test]
    async fn sequential_failure_aborts_remaining_steps() {
        let engine = engine(
            vec![
                ScriptedAgent::failing(Capability::InterviewPrep, false),
                ScriptedAgent::ok(Capability::StudyPlanner),
            ],
            no_retry(),
        );
        let plan = ExecutionPlan {
            steps: vec![
                PlanStep::Run {
                    capabilities: vec![Capability::InterviewPrep],
                    mode: ExecMode::Sequential,
                },
                PlanStep::Run {
                    capabilities: vec![Capability::StudyPlanner],
                    mode: ExecMode::Sequential,
                },
            ],
        };

        let report = engine
            .execute(&plan, "q", &context(), &Value::Null)
            .await
            .unwrap();

        // Partial result surfaced: first step executed and failed, second
        // step never ran.
        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.results().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_isolates_failures_and_overlaps_waits() {
        let engine = engine(
            vec![
                ScriptedAgent::with_delay(Capability::InterviewPrep, Duration::from_millis(100)),
                ScriptedAgent::with_delay(Capability::ResourceCurator, Duration::from_millis(120)),
                ScriptedAgent::failing(Capability::ResumeOptimizer, false),
            ],
            no_retry(),
        );
        let capabilities = vec![
            Capability::InterviewPrep,
            Capability::ResourceCurator,
            Capability::ResumeOptimizer,
        ];
        let plan = run_step(capabilities.clone(), ExecMode::Parallel);

        let start = Instant::now();
        let report = engine
            .execute(&plan, "gather", &context(), &Value::Null)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        // Wall time tracks the slowest branch, not the sum of delays.
        assert!(elapsed >= Duration::from_millis(120));
        assert!(elapsed < Duration::from_millis(220), "elapsed {elapsed:?}");

        let results: Vec<_> = report.results().collect();
        assert_eq!(results.len(), 3);
        // Reassembled by declared tag order regardless of arrival.
        for (result, capability) in results.iter().zip(&capabilities) {
            assert_eq!(result.capability, *capability);
        }
        assert_eq!(
            results.iter().filter(|r| !r.is_success()).count(),
            1,
            "exactly the engineered failure"
        );
        assert_eq!(report.status, RunStatus::Partial);
    }

    #[tokio::test]
    async fn loop_stops_when_condition_satisfied() {
        let engine = engine(vec![ScriptedAgent::ok(Capability::InterviewPrep)], no_retry());
        let plan = run_step(
            vec![Capability::InterviewPrep],
            ExecMode::Loop {
                max_iterations: 10,
                stop: StopCondition::SuccessCount(3),
            },
        );

        let report = engine
            .execute(&plan, "drill", &context(), &Value::Null)
            .await
            .unwrap();

        assert_eq!(report.results().count(), 3);
        assert_eq!(report.status, RunStatus::Complete);
    }

    #[tokio::test]
    async fn loop_runs_to_bound_when_never_satisfied() {
        let engine = engine(vec![ScriptedAgent::ok(Capability::InterviewPrep)], no_retry());
        let plan = run_step(
            vec![Capability::InterviewPrep],
            ExecMode::Loop {
                max_iterations: 10,
                stop: StopCondition::PayloadContains("never-present".to_string()),
            },
        );

        let report = engine
            .execute(&plan, "drill", &context(), &Value::Null)
            .await
            .unwrap();

        assert_eq!(report.results().count(), 10);
    }

    #[tokio::test]
    async fn loop_feeds_back_prior_results() {
        let engine = engine(vec![ScriptedAgent::ok(Capability::InterviewPrep)], no_retry());
        let plan = run_step(
            vec![Capability::InterviewPrep],
            ExecMode::Loop {
                max_iterations: 3,
                stop: StopCondition::SuccessCount(3),
            },
        );

        let report = engine
            .execute(&plan, "drill", &context(), &Value::Null)
            .await
            .unwrap();

        let results: Vec<_> = report.results().collect();
        assert_eq!(results[0].payload["prior_seen"], false);
        assert_eq!(results[1].payload["prior_seen"], true);
        assert_eq!(results[2].payload["prior_seen"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_a_result_not_a_fault() {
        let config = EngineConfig {
            invocation_timeout_seconds: 1,
            ..no_retry()
        };
        let engine = engine(
            vec![ScriptedAgent::with_delay(
                Capability::InterviewPrep,
                Duration::from_secs(2),
            )],
            config,
        );

        let plan = run_step(vec![Capability::InterviewPrep], ExecMode::Sequential);
        let report = engine
            .execute(&plan, "slow", &context(), &Value::Null)
            .await
            .unwrap();

        let results: Vec<_> = report.results().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ResultStatus::Timeout);
        assert_eq!(report.status, RunStatus::Partial);
    }

    #[tokio::test(start_paused = true)]
    async fn plan_deadline_cancels_in_flight_and_pending_invocations() {
        let config = EngineConfig {
            max_retries: 0,
            plan_deadline_seconds: Some(1),
            ..EngineConfig::default()
        };
        let engine = engine(
            vec![
                ScriptedAgent::with_delay(Capability::InterviewPrep, Duration::from_secs(5)),
                ScriptedAgent::ok(Capability::StudyPlanner),
            ],
            config,
        );
        let plan = run_step(
            vec![Capability::InterviewPrep, Capability::StudyPlanner],
            ExecMode::Sequential,
        );

        let report = engine
            .execute(&plan, "slow", &context(), &Value::Null)
            .await
            .unwrap();

        let results: Vec<_> = report.results().collect();
        assert_eq!(results[0].status, ResultStatus::Canceled);
        // Sequential abort: the pending invocation never ran.
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn retry_eligible_failure_is_retried_with_same_inputs() {
        let config = EngineConfig {
            max_retries: 1,
            ..EngineConfig::default()
        };
        let engine = engine(
            vec![ScriptedAgent::flaky(Capability::InterviewPrep, 1)],
            config,
        );
        let plan = run_step(vec![Capability::InterviewPrep], ExecMode::Sequential);

        let report = engine
            .execute(&plan, "flaky", &context(), &Value::Null)
            .await
            .unwrap();

        let results: Vec<_> = report.results().collect();
        assert_eq!(results[0].status, ResultStatus::Success);
        // Second call (index 1) produced the success.
        assert_eq!(results[0].payload["call"], 1);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_not_retried() {
        let config = EngineConfig {
            max_retries: 3,
            ..EngineConfig::default()
        };
        let engine = engine(
            vec![ScriptedAgent::failing(Capability::InterviewPrep, false)],
            config,
        );
        let plan = run_step(vec![Capability::InterviewPrep], ExecMode::Sequential);

        let report = engine
            .execute(&plan, "broken", &context(), &Value::Null)
            .await
            .unwrap();

        let results: Vec<_> = report.results().collect();
        assert_eq!(results[0].status, ResultStatus::Failed);
        assert!(!results[0].retryable);
    }

    #[tokio::test]
    async fn missing_agent_is_an_isolated_failure() {
        let engine = engine(vec![], no_retry());
        let plan = run_step(vec![Capability::ResumeOptimizer], ExecMode::Sequential);

        let report = engine
            .execute(&plan, "q", &context(), &Value::Null)
            .await
            .unwrap();

        let results: Vec<_> = report.results().collect();
        assert_eq!(results[0].status, ResultStatus::Failed);
        assert!(results[0].error.as_deref().unwrap().contains("no agent registered"));
    }

    #[tokio::test]
    async fn clarification_step_invokes_no_agent() {
        let engine = engine(vec![ScriptedAgent::ok(Capability::InterviewPrep)], no_retry());
        let builder = PlanBuilder::new(10);
        let plan = builder.build("what's the weather like", &context());

        let report = engine
            .execute(&plan, "what's the weather like", &context(), &Value::Null)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::NeedsClarification);
        assert_eq!(report.results().count(), 0);
        assert!(matches!(report.steps[0], StepOutcome::Clarification { .. }));
    }
}
