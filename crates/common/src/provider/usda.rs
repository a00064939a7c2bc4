//! USDA FoodData Central client
//!
//! Uses the search endpoint and takes the first hit. FDC reports values
//! per 100 g; when the hit carries a gram/millilitre serving size the
//! values are scaled to that serving.

use super::{http_client, FoodQuery, NutrientProvider, ProviderLookup};
use crate::errors::{AppError, Result};
use crate::nutrients::{Nutrient, Nutrients};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.nal.usda.gov";

/// FDC nutrient ids, first match wins
const NUTRIENT_IDS: &[(u32, Nutrient)] = &[
    (1008, Nutrient::Calories),
    // Atwater general / specific energy, used by Foundation foods
    (2047, Nutrient::Calories),
    (2048, Nutrient::Calories),
    (1003, Nutrient::Protein),
    (1005, Nutrient::Carbs),
    (1004, Nutrient::Fat),
    (1079, Nutrient::Fiber),
    (2000, Nutrient::Sugar),
    (1063, Nutrient::Sugar),
    (1093, Nutrient::Sodium),
    (1092, Nutrient::Potassium),
    (1087, Nutrient::Calcium),
    (1089, Nutrient::Iron),
    (1090, Nutrient::Magnesium),
    (1091, Nutrient::Phosphorus),
    (1095, Nutrient::Zinc),
    (1106, Nutrient::VitaminA),
    (1162, Nutrient::VitaminC),
    (1114, Nutrient::VitaminD),
    (1109, Nutrient::VitaminE),
    (1185, Nutrient::VitaminK),
    (1175, Nutrient::VitaminB6),
    (1178, Nutrient::VitaminB12),
    (1190, Nutrient::Folate),
    (1177, Nutrient::Folate),
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    foods: Vec<SearchFood>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchFood {
    fdc_id: u64,
    description: String,
    serving_size: Option<f64>,
    serving_size_unit: Option<String>,
    #[serde(default)]
    food_nutrients: Vec<SearchNutrient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNutrient {
    nutrient_id: u32,
    value: Option<f64>,
}

impl SearchFood {
    fn nutrients(&self) -> Nutrients {
        let mut out = Nutrients::default();
        for (id, nutrient) in NUTRIENT_IDS {
            if out.get(*nutrient).is_some() {
                continue;
            }
            let value = self
                .food_nutrients
                .iter()
                .find(|n| n.nutrient_id == *id)
                .and_then(|n| n.value);
            out.set(*nutrient, value);
        }

        if let Some(factor) = self.serving_factor() {
            for nutrient in Nutrient::ALL {
                if let Some(v) = out.get(nutrient) {
                    out.set(nutrient, Some(round2(v * factor)));
                }
            }
        }
        out
    }

    fn serving_factor(&self) -> Option<f64> {
        let size = self.serving_size.filter(|s| s.is_finite() && *s > 0.0)?;
        match self.serving_size_unit.as_deref()?.to_ascii_lowercase().as_str() {
            "g" | "grm" | "ml" | "mlt" => Some(size / 100.0),
            _ => None,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// FoodData Central search client
pub struct UsdaProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl UsdaProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl NutrientProvider for UsdaProvider {
    async fn lookup(&self, query: &FoodQuery) -> Result<ProviderLookup> {
        let url = format!("{}/fdc/v1/foods/search", self.base_url);
        let text = query.search_text();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", text.as_str()),
                ("pageSize", "1"),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::ProviderError {
                provider: "usda".to_string(),
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited {
                service: "usda".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderError {
                provider: "usda".to_string(),
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: SearchResponse = response.json().await.map_err(|e| AppError::ProviderError {
            provider: "usda".to_string(),
            message: format!("Failed to parse response: {}", e),
        })?;

        let Some(hit) = result.foods.into_iter().next() else {
            return Ok(ProviderLookup::NoMatch);
        };

        let nutrients = hit.nutrients();
        debug!(
            fdc_id = hit.fdc_id,
            description = %hit.description,
            "USDA match"
        );

        if nutrients == Nutrients::default() {
            return Ok(ProviderLookup::NoMatch);
        }
        Ok(ProviderLookup::Found(nutrients))
    }

    fn name(&self) -> &str {
        "usda"
    }
}
