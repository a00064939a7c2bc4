//! OpenAI chat-completions client
//!
//! Asks the model for a JSON object with the record's nutrient columns.
//! Estimates are treated like any other provider data: the scorer decides
//! whether they are plausible.

use super::{http_client, FoodQuery, NutrientProvider, ProviderLookup};
use crate::errors::{AppError, Result};
use crate::nutrients::Nutrients;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a nutrition database. Reply with one JSON object and nothing else. \
Keys: found (boolean), calories, protein_g, carbs_g, fat_g, fiber_g, sugar_g, sodium_mg, \
potassium_mg, calcium_mg, iron_mg, magnesium_mg, phosphorus_mg, zinc_mg, vitamin_a_mcg, \
vitamin_c_mg, vitamin_d_mcg, vitamin_e_mg, vitamin_k_mcg, vitamin_b6_mg, vitamin_b12_mcg, \
folate_mcg. Values are numbers per the stated serving (per 100 g if none is given); \
use null for anything you do not know. Set found to false if the food is not recognizable.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Estimate {
    #[serde(default = "default_found")]
    found: bool,
    #[serde(flatten)]
    nutrients: Nutrients,
}

fn default_found() -> bool {
    true
}

/// OpenAI-backed provider
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn user_prompt(query: &FoodQuery) -> String {
        let mut prompt = format!("Food: {}", query.name.trim());
        if let Some(brand) = &query.brand {
            prompt.push_str(&format!("\nBrand: {}", brand));
        }
        if let Some(category) = &query.category {
            prompt.push_str(&format!("\nCategory: {}", category));
        }
        if let Some(serving) = &query.serving_description {
            prompt.push_str(&format!("\nServing: {}", serving));
        }
        prompt
    }

    fn provider_error(message: String) -> AppError {
        AppError::ProviderError {
            provider: "openai".to_string(),
            message,
        }
    }
}

fn parse_estimate(content: &str) -> Result<ProviderLookup> {
    let estimate: Estimate = serde_json::from_str(content.trim()).map_err(|e| {
        OpenAIProvider::provider_error(format!("Model returned invalid JSON: {}", e))
    })?;

    if !estimate.found || estimate.nutrients == Nutrients::default() {
        return Ok(ProviderLookup::NoMatch);
    }
    Ok(ProviderLookup::Found(estimate.nutrients))
}

#[async_trait]
impl NutrientProvider for OpenAIProvider {
    async fn lookup(&self, query: &FoodQuery) -> Result<ProviderLookup> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_prompt(query),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited {
                service: "openai".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::provider_error(format!("API error {}: {}", status, body)));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Self::provider_error(format!("Failed to parse response: {}", e)))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Self::provider_error("Empty response".to_string()))?;

        parse_estimate(&content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
