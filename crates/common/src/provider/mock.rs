//! Mock provider for testing and offline runs

use super::{FoodQuery, NutrientProvider, ProviderLookup};
use crate::errors::{AppError, Result};
use crate::nutrients::Nutrients;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Found(Nutrients),
    Fail(String),
    Hang,
}

/// Deterministic provider keyed on the lowercased food name.
///
/// Unknown names are a `NoMatch`.
#[derive(Debug, Default)]
pub struct MockProvider {
    scripted: HashMap<String, Scripted>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_food(mut self, name: &str, nutrients: Nutrients) -> Self {
        self.scripted.insert(key(name), Scripted::Found(nutrients));
        self
    }

    /// Lookups for `name` return a provider error
    pub fn with_failure(mut self, name: &str, message: &str) -> Self {
        self.scripted
            .insert(key(name), Scripted::Fail(message.to_string()));
        self
    }

    /// Lookups for `name` never return
    pub fn with_hang(mut self, name: &str) -> Self {
        self.scripted.insert(key(name), Scripted::Hang);
        self
    }

    /// Sleep before answering every lookup
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of lookups made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[async_trait]
impl NutrientProvider for MockProvider {
    async fn lookup(&self, query: &FoodQuery) -> Result<ProviderLookup> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.scripted.get(&key(&query.name)) {
            Some(Scripted::Found(n)) => Ok(ProviderLookup::Found(n.clone())),
            Some(Scripted::Fail(message)) => Err(AppError::ProviderError {
                provider: "mock".to_string(),
                message: message.clone(),
            }),
            Some(Scripted::Hang) => {
                std::future::pending::<()>().await;
                Ok(ProviderLookup::NoMatch)
            }
            None => Ok(ProviderLookup::NoMatch),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
