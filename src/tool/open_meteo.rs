use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::WeatherConfig;

/// Shared HTTP client for the Open-Meteo forecast and geocoding APIs
#[derive(Clone, Debug)]
pub struct OpenMeteo {
    client: reqwest::Client,
    forecast_url: String,
    geocoding_url: String,
}

impl OpenMeteo {
    pub fn new(config: &WeatherConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            forecast_url: config.forecast_url.clone(),
            geocoding_url: config.geocoding_url.clone(),
        }
    }

    pub async fn forecast(&self, params: &[(&str, String)]) -> anyhow::Result<Value> {
        self.get_json(&self.forecast_url, params).await
    }

    pub async fn geocode(&self, params: &[(&str, String)]) -> anyhow::Result<Value> {
        self.get_json(&self.geocoding_url, params).await
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> anyhow::Result<Value> {
        let url = reqwest::Url::parse_with_params(url, params)?;
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Decode validated tool arguments into their typed struct
pub fn decode<T: DeserializeOwned>(args: Map<String, Value>) -> anyhow::Result<T> {
    Ok(serde_json::from_value(Value::Object(args))?)
}

/// Encode a tool result as JSON
pub fn encode<T: Serialize>(value: &T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Wire name of a serde unit variant (e.g. `TemperatureUnit::Fahrenheit` -> "fahrenheit")
pub fn wire_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}
