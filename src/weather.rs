//! Current-weather lookups.
//!
//! The engine only needs a temperature, humidity, day/night flag and a
//! condition text per city. [`HttpWeatherProvider`] fetches these from a
//! WeatherAPI-style `current.json` endpoint.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::WeatherError;

// ---

/// Current conditions for a city.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub temp_c: f64,
    pub humidity_pct: f64,
    pub is_night: bool,
    pub condition_text: String,
}

/// Source of current weather conditions.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn get_current(&self, city_query: &str) -> Result<WeatherReport, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current: CurrentBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    temp_c: f64,
    humidity: f64,
    is_day: u8,
    condition: ConditionBlock,
}

#[derive(Debug, Deserialize)]
struct ConditionBlock {
    text: String,
}

/// Weather provider backed by an HTTP API.
#[derive(Debug, Clone)]
pub struct HttpWeatherProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpWeatherProvider {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl WeatherProvider for HttpWeatherProvider {
    async fn get_current(&self, city_query: &str) -> Result<WeatherReport, WeatherError> {
        // ---
        let api_key = self.api_key.as_deref().ok_or(WeatherError::MissingApiKey)?;

        tracing::debug!("Fetching current weather for '{}'", city_query);

        let body: serde_json::Value = self
            .client
            .get(&self.api_url)
            .query(&[("key", api_key), ("q", city_query), ("lang", "es")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_current(body)
    }
}

/// Decode a `current.json` payload into a [`WeatherReport`].
fn parse_current(body: serde_json::Value) -> Result<WeatherReport, WeatherError> {
    // ---
    let parsed: CurrentResponse =
        serde_json::from_value(body).map_err(|e| WeatherError::Malformed(e.to_string()))?;

    let current = parsed.current;
    if !current.temp_c.is_finite() || !current.humidity.is_finite() {
        return Err(WeatherError::Malformed("non-finite temperature or humidity".to_string()));
    }

    Ok(WeatherReport {
        temp_c: current.temp_c,
        humidity_pct: current.humidity,
        is_night: current.is_day == 0,
        condition_text: current.condition.text,
    })
}
