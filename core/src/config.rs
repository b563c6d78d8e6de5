//! Layered configuration. Defaults ship baked into the binary
//! (`config/default.toml`), overridable by an optional file and then by
//! `MARCUS_`-prefixed environment variables.

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{MarcusError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub lease: LeaseConfig,
    pub reconciler: ReconcilerConfig,
    pub project: ProjectConfig,
    pub scheduler: SchedulerConfig,
    pub events: EventsConfig,
    pub kanban: KanbanConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeaseConfig {
    pub default_duration_hours: f64,
    pub ticker_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    pub deadline_seconds: u64,
    pub score_weights: ScoreWeights,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoreWeights {
    pub skill: f64,
    pub priority: f64,
    pub impact: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    pub durable: bool,
    pub fsync_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KanbanConfig {
    pub retry: KanbanRetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KanbanRetryConfig {
    pub attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_factor: f64,
}

impl Config {
    /// Load the baked-in defaults, then layer an optional config file (path
    /// from `MARCUS_CONFIG_FILE`) and `MARCUS_`-prefixed environment
    /// overrides on top.
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder().add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        if let Ok(path) = std::env::var("MARCUS_CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&path).required(false).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("MARCUS").separator("_").try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| MarcusError::InvalidConfig(e.to_string()))?;

        built
            .try_deserialize()
            .map_err(|e| MarcusError::InvalidConfig(e.to_string()))
    }

    /// Build from a specific file, bypassing the baked-in defaults. Mainly
    /// for tests that want a known-minimal configuration.
    pub fn from_file(path: &str) -> Result<Self> {
        let built = ConfigBuilder::builder()
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .build()
            .map_err(|e| MarcusError::InvalidConfig(e.to_string()))?;

        built
            .try_deserialize()
            .map_err(|e| MarcusError::InvalidConfig(e.to_string()))
    }
}
