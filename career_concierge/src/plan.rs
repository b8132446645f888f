//! Execution plans and the request-routing plan builder.
//!
//! The builder is pure with respect to execution: it reads the student's
//! context view but invokes no agent and mutates nothing. Routing is a
//! deterministic classification over the closed capability set; a request it
//! cannot place yields an explicit clarification step instead of a guess.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::Capability;
use crate::error::{ConciergeError, Result};
use crate::memory::ContextView;

/// Stop predicate for Loop steps, evaluated against each AgentResult. A
/// closed set keeps plans serializable and termination decidable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopCondition {
    /// Stop once this many iterations have succeeded.
    SuccessCount(u32),
    /// Stop once a payload's text contains this needle.
    PayloadContains(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecMode {
    Sequential,
    Parallel,
    Loop {
        max_iterations: u32,
        stop: StopCondition,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanStep {
    /// Invoke the named capabilities under the given mode.
    Run {
        capabilities: Vec<Capability>,
        mode: ExecMode,
    },
    /// Unroutable request: ask instead of guessing.
    Clarify { question: String },
}

/// Ordered, per-request invocation plan. Built fresh each request, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(ConciergeError::Validation("plan has no steps".to_string()));
        }
        for step in &self.steps {
            if let PlanStep::Run { capabilities, mode } = step {
                if capabilities.is_empty() {
                    return Err(ConciergeError::Validation(
                        "plan step names no capability".to_string(),
                    ));
                }
                if let ExecMode::Loop { max_iterations, .. } = mode {
                    if *max_iterations == 0 {
                        return Err(ConciergeError::Validation(
                            "loop step must allow at least one iteration".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

static UNTIL_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"until\s+i\s+(?:get|solve|answer)\s+(\d+)").unwrap());

const GATHER_CUES: [&str; 5] = ["find", "across", "gather", "collect", "compare"];
const BROADCAST_PHRASES: [&str; 3] =
    ["multiple platforms", "multiple sources", "across platforms"];
const PIPELINE_CUES: [&str; 3] = ["prepare", "get ready", "end to end"];

pub struct PlanBuilder {
    loop_max_iterations: u32,
}

impl PlanBuilder {
    pub fn new(loop_max_iterations: u32) -> Self {
        Self { loop_max_iterations }
    }

    /// Map a request to an execution plan. `_context` keeps the routing
    /// signature explicit about what the classifier may read; the default
    /// keyword classifier only needs the query.
    pub fn build(&self, query: &str, _context: &ContextView) -> ExecutionPlan {
        let lower = query.to_lowercase();
        let mut matched = Self::match_capabilities(&lower);

        let broadcast = BROADCAST_PHRASES.iter().any(|p| lower.contains(p));
        if broadcast {
            // A multi-platform sweep spans the information-gathering pair
            // even when only one of them was named.
            for capability in [Capability::InterviewPrep, Capability::ResourceCurator] {
                if !matched.contains(&capability) {
                    matched.push(capability);
                }
            }
            matched.sort_by_key(|c| Capability::ALL.iter().position(|a| a == c));
        }

        let step = if lower.contains("until") {
            match matched.as_slice() {
                [capability] => PlanStep::Run {
                    capabilities: vec![*capability],
                    mode: ExecMode::Loop {
                        max_iterations: self.loop_max_iterations,
                        stop: self.stop_condition(&lower),
                    },
                },
                _ => Self::clarify(&matched),
            }
        } else {
            match matched.len() {
                0 => Self::clarify(&matched),
                1 => PlanStep::Run {
                    capabilities: matched,
                    mode: ExecMode::Sequential,
                },
                _ if broadcast || GATHER_CUES.iter().any(|c| lower.contains(c)) => PlanStep::Run {
                    capabilities: matched,
                    mode: ExecMode::Parallel,
                },
                _ if PIPELINE_CUES.iter().any(|c| lower.contains(c)) => PlanStep::Run {
                    capabilities: matched,
                    mode: ExecMode::Sequential,
                },
                _ => Self::clarify(&matched),
            }
        };

        debug!(?step, "built execution plan");
        ExecutionPlan { steps: vec![step] }
    }

    fn match_capabilities(lower: &str) -> Vec<Capability> {
        let mut matched = Vec::new();
        let keyword_sets: [(Capability, &[&str]); 4] = [
            (
                Capability::InterviewPrep,
                &["problem", "dsa", "algorithm", "interview", "leetcode"],
            ),
            (Capability::ResumeOptimizer, &["resume", "cv", "ats"]),
            (
                Capability::ResourceCurator,
                &["resource", "learn", "course", "material", "tutorial"],
            ),
            (
                Capability::StudyPlanner,
                &["plan", "schedule", "week", "roadmap"],
            ),
        ];
        for (capability, keywords) in keyword_sets {
            if keywords.iter().any(|kw| lower.contains(kw)) {
                matched.push(capability);
            }
        }
        matched
    }

    fn stop_condition(&self, lower: &str) -> StopCondition {
        match UNTIL_COUNT_RE
            .captures(lower)
            .and_then(|c| c[1].parse::<u32>().ok())
        {
            Some(n) if n >= 1 => StopCondition::SuccessCount(n),
            // No parseable target: run the bounded refinement to its limit.
            _ => StopCondition::SuccessCount(self.loop_max_iterations),
        }
    }

    fn clarify(matched: &[Capability]) -> PlanStep {
        let question = if matched.is_empty() {
            "I can help with interview prep, resume review, learning resources, or study \
             planning. Which of these are you after?"
                .to_string()
        } else {
            let names = matched
                .iter()
                .map(Capability::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            format!("Your request touches several areas ({names}). Which should I start with?")
        };
        PlanStep::Clarify { question }
    }
}
