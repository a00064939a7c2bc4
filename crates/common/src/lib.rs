//! NutriForge Common Library
//!
//! Shared code for the NutriForge enrichment pipeline:
//! - Food record and queue entry models, repository and in-memory store
//! - Quality scoring and review flagging
//! - Enrichment queue, worker and retry scheduler
//! - Nutrient-data provider clients (USDA, OpenAI, mock)
//! - Error types, configuration, metrics

pub mod config;
pub mod db;
pub mod enrichment;
pub mod errors;
pub mod intake;
pub mod metrics;
pub mod nutrients;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod review;
pub mod scoring;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{open_store, DbPool, FoodStore, MemoryStore, PipelineStore, Repository};
pub use errors::{AppError, Result};
pub use provider::NutrientProvider;
pub use queue::EnrichmentQueue;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
