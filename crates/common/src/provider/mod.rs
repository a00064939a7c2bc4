//! Nutrient-data provider abstraction
//!
//! Provides a unified interface over the external lookup services:
//! - USDA FoodData Central
//! - OpenAI chat completions (estimated values)
//! - Mock provider for tests and offline runs

mod mock;
mod openai;
mod usda;

pub use mock::MockProvider;
pub use openai::OpenAIProvider;
pub use usda::UsdaProvider;

use crate::config::ProviderConfig;
use crate::db::models::FoodRecord;
use crate::errors::{AppError, Result};
use crate::nutrients::Nutrients;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;

/// What a provider is asked to look up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodQuery {
    pub name: String,
    pub brand: Option<String>,
    pub serving_description: Option<String>,
    pub category: Option<String>,
}

impl FoodQuery {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            brand: None,
            serving_description: None,
            category: None,
        }
    }

    /// Search text: brand and name
    pub fn search_text(&self) -> String {
        match self.brand.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(brand) => format!("{} {}", brand, self.name.trim()),
            None => self.name.trim().to_string(),
        }
    }
}

impl From<&FoodRecord> for FoodQuery {
    fn from(food: &FoodRecord) -> Self {
        Self {
            name: food.name.clone(),
            brand: food.brand.clone(),
            serving_description: food.serving_description.clone(),
            category: food.category.clone(),
        }
    }
}

/// Outcome of a successful provider call
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderLookup {
    Found(Nutrients),
    /// The provider answered but has no data for this food
    NoMatch,
}

/// Trait for nutrient lookups
#[async_trait]
pub trait NutrientProvider: Send + Sync {
    async fn lookup(&self, query: &FoodQuery) -> Result<ProviderLookup>;

    /// Wait until a request may be sent. Callers that bound `lookup` with a
    /// timeout await this first.
    async fn acquire(&self) {}

    /// Short provider name, also written to `foods.source`
    fn name(&self) -> &str;
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Wraps a provider with a process-local request rate limit
pub struct RateLimitedProvider {
    inner: Arc<dyn NutrientProvider>,
    limiter: DirectLimiter,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn NutrientProvider>, per_second: NonZeroU32) -> Self {
        Self {
            inner,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }
}

#[async_trait]
impl NutrientProvider for RateLimitedProvider {
    /// Expects [`acquire`](NutrientProvider::acquire) to have been awaited
    async fn lookup(&self, query: &FoodQuery) -> Result<ProviderLookup> {
        self.inner.lookup(query).await
    }

    async fn acquire(&self) {
        self.limiter.until_ready().await;
        self.inner.acquire().await;
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Create a provider based on configuration
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn NutrientProvider>> {
    let provider: Arc<dyn NutrientProvider> = match config.kind.as_str() {
        "usda" => Arc::new(UsdaProvider::new(
            require_key(config)?,
            config.api_base.clone(),
        )?),
        "openai" => Arc::new(OpenAIProvider::new(
            require_key(config)?,
            config.model.clone(),
            config.api_base.clone(),
        )?),
        "mock" => Arc::new(MockProvider::new()),
        other => {
            return Err(AppError::Configuration {
                message: format!("Unknown provider kind: {}", other),
            })
        }
    };

    match NonZeroU32::new(config.requests_per_second) {
        Some(rps) if config.kind != "mock" => Ok(Arc::new(RateLimitedProvider::new(provider, rps))),
        _ => Ok(provider),
    }
}

fn require_key(config: &ProviderConfig) -> Result<String> {
    config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Configuration {
            message: format!("provider.api_key is required for {}", config.kind),
        })
}

/// Build an HTTP client for provider calls.
///
/// The worker wraps each call in its own timeout; this one only bounds a
/// call made outside the worker.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent(concat!("nutriforge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_search_text_includes_brand() {
        let mut q = FoodQuery::named("  Greek Yogurt ");
        assert_eq!(q.search_text(), "Greek Yogurt");
        q.brand = Some("Fage".into());
        assert_eq!(q.search_text(), "Fage Greek Yogurt");
        q.brand = Some("   ".into());
        assert_eq!(q.search_text(), "Greek Yogurt");
    }

    #[test]
    fn test_create_provider_requires_key() {
        let config = ProviderConfig {
            kind: "usda".into(),
            api_key: None,
            ..ProviderConfig::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(AppError::Configuration { .. })
        ));

        let config = ProviderConfig {
            kind: "carrier-pigeon".into(),
            ..ProviderConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_create_mock_provider() {
        let config = ProviderConfig {
            kind: "mock".into(),
            ..ProviderConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn test_rate_limited_provider_spaces_calls() {
        let inner = Arc::new(MockProvider::new().with_food("rice", Nutrients::default()));
        let limited = RateLimitedProvider::new(inner, NonZeroU32::new(2).unwrap());
        let query = FoodQuery::named("rice");

        let start = Instant::now();
        for _ in 0..3 {
            limited.acquire().await;
            limited.lookup(&query).await.unwrap();
        }
        // burst of two, the third call waits for a replenished cell (~500ms)
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
