//! Career concierge core: a coordinator routing student requests across a
//! closed set of coaching agents, backed by a partitioned memory bank.
//!
//! The public surface is small: build a [`Coordinator`], call
//! [`Coordinator::process`], read the [`Response`]. Everything else is the
//! plumbing behind that call.

pub mod agent;
pub mod cli;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod memory;
pub mod plan;
pub mod settings;
pub mod telemetry;
pub mod tools;

pub use agent::{Agent, AgentRegistry, AgentRequest, Capability};
pub use coordinator::{CapabilityReport, Coordinator, Response};
pub use engine::{AgentResult, EngineReport, ExecutionEngine, ResultStatus, RunStatus};
pub use error::{ConciergeError, Result};
pub use memory::{ContextView, InteractionRecord, MemoryBank, SkillLevel, StudentProfile};
pub use plan::{ExecMode, ExecutionPlan, PlanBuilder, PlanStep, StopCondition};
pub use settings::Settings;
