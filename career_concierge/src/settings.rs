//! Configuration management with environment variable support and validation.

use anyhow::{anyhow, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Memory bank configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// "in_memory" or "sled". In-memory operation is ephemeral and must be
    /// chosen explicitly.
    pub provider: String,
    pub persistence_path: Option<PathBuf>,
    /// Raw records returned alongside the compacted summary.
    pub recent_window: usize,
    /// Uncompacted-tail length that triggers compaction.
    pub compaction_threshold: usize,
    /// Upper bound on the compacted digest, in characters.
    pub summary_max_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            provider: "in_memory".to_string(),
            persistence_path: None,
            recent_window: 10,
            compaction_threshold: 50,
            summary_max_chars: 2_000,
        }
    }
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded wait for a single agent invocation.
    pub invocation_timeout_seconds: u64,
    /// Retries applied to retry-eligible failures, same inputs each attempt.
    pub max_retries: u32,
    /// Optional whole-plan deadline. Propagates to in-flight invocations.
    pub plan_deadline_seconds: Option<u64>,
    /// Safety bound for Loop steps when the request names no tighter one.
    pub loop_max_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_seconds: 30,
            max_retries: 1,
            plan_deadline_seconds: None,
            loop_max_iterations: 10,
        }
    }
}

impl EngineConfig {
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_seconds)
    }

    pub fn plan_deadline(&self) -> Option<Duration> {
        self.plan_deadline_seconds.map(Duration::from_secs)
    }
}

/// Main settings structure with all configuration sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub memory: MemoryConfig,
    pub engine: EngineConfig,
    pub otlp_endpoint: Option<String>,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Local config file, if present
            .add_source(File::with_name("concierge").required(false))
            // Environment variables with CONCIERGE_ prefix
            .add_source(
                Environment::with_prefix("CONCIERGE")
                    .separator("__")
                    .list_separator(",")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings for consistency.
    pub fn validate(&self) -> Result<()> {
        match self.memory.provider.as_str() {
            "in_memory" => {}
            "sled" => {
                if self.memory.persistence_path.is_none() {
                    return Err(anyhow!(
                        "memory.provider = \"sled\" requires memory.persistence_path"
                    ));
                }
            }
            other => return Err(anyhow!("Unknown memory provider: {other}")),
        }

        if self.memory.recent_window == 0 {
            return Err(anyhow!("memory.recent_window cannot be 0"));
        }
        if self.memory.compaction_threshold == 0 {
            return Err(anyhow!("memory.compaction_threshold cannot be 0"));
        }
        if self.memory.summary_max_chars == 0 {
            return Err(anyhow!("memory.summary_max_chars cannot be 0"));
        }
        if self.memory.compaction_threshold <= self.memory.recent_window {
            warn!(
                threshold = self.memory.compaction_threshold,
                window = self.memory.recent_window,
                "compaction threshold is not larger than the recent window; \
                 compaction will fire on nearly every append"
            );
        }

        if self.engine.invocation_timeout_seconds == 0 {
            return Err(anyhow!("engine.invocation_timeout_seconds cannot be 0"));
        }
        if self.engine.loop_max_iterations == 0 {
            return Err(anyhow!("engine.loop_max_iterations cannot be 0"));
        }

        Ok(())
    }
}
