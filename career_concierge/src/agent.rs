//! Agent capabilities and the built-in specialist agents.
//!
//! Each agent implements exactly one declared capability. Domain knowledge
//! (problem catalog, ATS keyword groups, resource catalog) lives in static
//! tables; narrative advice and external lookups go through the capability
//! traits in `tools`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ConciergeError, Result};
use crate::memory::{ContextView, SkillLevel};
use crate::tools::{ModelInference, SearchProvider};

/// The closed capability set. Routing is a tagged dispatch over these
/// variants, never a best-effort dynamic lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    InterviewPrep,
    ResumeOptimizer,
    ResourceCurator,
    StudyPlanner,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::InterviewPrep,
        Capability::ResumeOptimizer,
        Capability::ResourceCurator,
        Capability::StudyPlanner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::InterviewPrep => "interview_prep",
            Capability::ResumeOptimizer => "resume_optimizer",
            Capability::ResourceCurator => "resource_curator",
            Capability::StudyPlanner => "study_planner",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for one agent invocation: the request text, the bounded memory
/// view, caller-supplied extras (e.g. resume text), and the payload of the
/// preceding invocation for sequential chaining and loop feedback.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub query: String,
    pub context: ContextView,
    pub extra: Value,
    pub prior: Option<Value>,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn capability(&self) -> Capability;
    async fn handle(&self, request: &AgentRequest) -> Result<Value>;
}

/// Capability-keyed agent set consumed by the execution engine.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<Capability, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all four built-in specialists wired to the given
    /// capability backends.
    pub fn with_defaults(
        model: Arc<dyn ModelInference>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(InterviewPrepAgent::new(model.clone())));
        registry.register(Arc::new(ResumeOptimizerAgent::new(model)));
        registry.register(Arc::new(ResourceCuratorAgent::new(search)));
        registry.register(Arc::new(StudyPlannerAgent::new()));
        registry
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.capability(), agent);
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn Agent>> {
        self.agents.get(&capability).cloned()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.agents.keys().copied().collect()
    }
}

// --- Interview preparation ---

#[derive(Debug, Clone, Serialize)]
struct Problem {
    name: &'static str,
    topic: &'static str,
    difficulty: &'static str,
}

static PROBLEM_CATALOG: Lazy<Vec<Problem>> = Lazy::new(|| {
    vec![
        Problem { name: "Two Sum", topic: "array", difficulty: "easy" },
        Problem { name: "Valid Parentheses", topic: "stack", difficulty: "easy" },
        Problem { name: "Merge Two Sorted Lists", topic: "linked list", difficulty: "easy" },
        Problem { name: "LRU Cache", topic: "design", difficulty: "medium" },
        Problem { name: "Binary Tree Level Order", topic: "tree", difficulty: "medium" },
        Problem { name: "Longest Substring", topic: "string", difficulty: "medium" },
        Problem { name: "Product of Array Except Self", topic: "array", difficulty: "medium" },
        Problem { name: "Median of Two Sorted Arrays", topic: "binary search", difficulty: "hard" },
        Problem { name: "Word Ladder II", topic: "graph", difficulty: "hard" },
    ]
});

/// Recommends DSA problems for the student's level and topic.
pub struct InterviewPrepAgent {
    model: Arc<dyn ModelInference>,
}

impl InterviewPrepAgent {
    pub fn new(model: Arc<dyn ModelInference>) -> Self {
        Self { model }
    }

    /// Difficulty from the request wording, falling back to the profile's
    /// strongest skill estimate.
    fn difficulty(query: &str, context: &ContextView) -> &'static str {
        let query = query.to_lowercase();
        if query.contains("easy") || query.contains("beginner") {
            return "easy";
        }
        if query.contains("hard") || query.contains("advanced") {
            return "hard";
        }
        if query.contains("medium") {
            return "medium";
        }
        match context.profile.skills.values().max() {
            Some(SkillLevel::Advanced) => "hard",
            Some(SkillLevel::Beginner) => "easy",
            _ => "medium",
        }
    }

    fn topic_filter(query: &str) -> Option<String> {
        let query = query.to_lowercase();
        PROBLEM_CATALOG
            .iter()
            .map(|p| p.topic)
            .find(|topic| query.contains(topic))
            .map(str::to_string)
    }
}

#[async_trait]
impl Agent for InterviewPrepAgent {
    fn capability(&self) -> Capability {
        Capability::InterviewPrep
    }

    async fn handle(&self, request: &AgentRequest) -> Result<Value> {
        let difficulty = Self::difficulty(&request.query, &request.context);
        let topic = Self::topic_filter(&request.query);

        let problems: Vec<&Problem> = PROBLEM_CATALOG
            .iter()
            .filter(|p| p.difficulty == difficulty)
            .filter(|p| topic.as_deref().map_or(true, |t| p.topic == t))
            .collect();

        // Loop feedback: count how many rounds this drill has run.
        let iteration = request
            .prior
            .as_ref()
            .and_then(|p| p.get("iteration"))
            .and_then(Value::as_u64)
            .map_or(1, |n| n + 1);

        let advice = self
            .model
            .invoke(
                Capability::InterviewPrep,
                &format!("Coach a student through {difficulty} problems: {}", request.query),
            )
            .await?;

        debug!(difficulty, count = problems.len(), "recommended problems");
        Ok(json!({
            "difficulty": difficulty,
            "topic": topic,
            "iteration": iteration,
            "problems": problems,
            "advice": advice,
        }))
    }
}

// --- Resume optimization ---

static ATS_KEYWORDS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        (
            "technical_skills",
            vec![
                "python", "java", "c++", "javascript", "rust", "sql", "react", "aws",
                "docker", "kubernetes",
            ],
        ),
        (
            "soft_skills",
            vec!["leadership", "communication", "teamwork", "problem-solving", "analytical"],
        ),
        (
            "action_verbs",
            vec!["developed", "implemented", "designed", "optimized", "led", "managed", "created"],
        ),
    ])
});

/// Scores resume text against ATS keyword groups and suggests improvements.
pub struct ResumeOptimizerAgent {
    model: Arc<dyn ModelInference>,
}

impl ResumeOptimizerAgent {
    pub fn new(model: Arc<dyn ModelInference>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Agent for ResumeOptimizerAgent {
    fn capability(&self) -> Capability {
        Capability::ResumeOptimizer
    }

    async fn handle(&self, request: &AgentRequest) -> Result<Value> {
        let resume = request
            .extra
            .get("resume")
            .and_then(Value::as_str)
            .unwrap_or(&request.query)
            .to_lowercase();

        if resume.trim().is_empty() {
            return Err(ConciergeError::Validation("no resume text supplied".to_string()));
        }

        let mut found: HashMap<&str, Vec<&str>> = HashMap::new();
        for (group, keywords) in ATS_KEYWORDS.iter() {
            let hits: Vec<&str> = keywords
                .iter()
                .copied()
                .filter(|kw| resume.contains(kw))
                .collect();
            found.insert(*group, hits);
        }

        let tech_count = found.get("technical_skills").map_or(0, Vec::len);
        let ats_score = (tech_count * 5 + 20).min(100);

        let mut strengths = Vec::new();
        if tech_count > 0 {
            strengths.push(format!("Found {tech_count} relevant technical skills"));
        }
        if !found.get("action_verbs").map_or(true, Vec::is_empty) {
            strengths.push("Uses concrete action verbs".to_string());
        }

        let mut suggestions = Vec::new();
        if tech_count < 5 {
            suggestions.push("Add more technical skills relevant to the role".to_string());
        }
        if found.get("soft_skills").map_or(true, Vec::is_empty) {
            suggestions.push("Mention collaboration or leadership experience".to_string());
        }

        let advice = self
            .model
            .invoke(Capability::ResumeOptimizer, &format!("ATS score {ats_score}: tighten the resume"))
            .await?;

        Ok(json!({
            "ats_score": ats_score,
            "keyword_analysis": found,
            "strengths": strengths,
            "suggestions": suggestions,
            "advice": advice,
        }))
    }
}

// --- Resource curation ---

/// Gathers learning resources through the search capability.
pub struct ResourceCuratorAgent {
    search: Arc<dyn SearchProvider>,
}

impl ResourceCuratorAgent {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Agent for ResourceCuratorAgent {
    fn capability(&self) -> Capability {
        Capability::ResourceCurator
    }

    async fn handle(&self, request: &AgentRequest) -> Result<Value> {
        let hits = self.search.search(&request.query).await?;
        debug!(count = hits.len(), "curated resources");
        Ok(json!({
            "query": request.query,
            "resources": hits,
        }))
    }
}

// --- Study planning ---

static WEEKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*week").unwrap());
static HOURS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*hour").unwrap());

/// Builds a weekly study schedule from the request and profile.
pub struct StudyPlannerAgent;

impl StudyPlannerAgent {
    pub fn new() -> Self {
        Self
    }

    fn focus_areas(query: &str, context: &ContextView) -> Vec<String> {
        let query = query.to_lowercase();
        let mut areas = Vec::new();
        for area in ["dsa", "system design", "behavioral"] {
            if query.contains(area) {
                areas.push(area.to_string());
            }
        }
        if areas.is_empty() {
            areas.extend(context.profile.skills.keys().cloned());
        }
        if areas.is_empty() {
            areas = vec!["dsa".to_string(), "system design".to_string()];
        }
        areas
    }
}

impl Default for StudyPlannerAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for StudyPlannerAgent {
    fn capability(&self) -> Capability {
        Capability::StudyPlanner
    }

    async fn handle(&self, request: &AgentRequest) -> Result<Value> {
        let parse = |re: &Regex, default: u32| {
            re.captures(&request.query.to_lowercase())
                .and_then(|c| c[1].parse::<u32>().ok())
                .unwrap_or(default)
        };
        let weeks = parse(&WEEKS_RE, 4).clamp(1, 52);
        let hours_per_day = parse(&HOURS_RE, 4).clamp(1, 12);

        let focus = Self::focus_areas(&request.query, &request.context);
        let schedule: Vec<Value> = (1..=weeks)
            .map(|week| {
                json!({
                    "week": week,
                    "focus": focus[(week as usize - 1) % focus.len()],
                    "activities": [
                        "Practice coding problems",
                        "Mock interviews",
                        "Resume review",
                    ],
                })
            })
            .collect();

        Ok(json!({
            "duration_weeks": weeks,
            "hours_per_day": hours_per_day,
            "weekly_schedule": schedule,
            "milestones": [
                format!("Week {}: first full mock interview", (weeks + 1) / 2),
                format!("Week {weeks}: ready for on-site rounds"),
            ],
        }))
    }
}
