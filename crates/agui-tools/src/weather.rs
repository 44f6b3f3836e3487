//! get_weather: informational tool backed by an optional HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{Tool, ToolContext, ToolOutput};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY_CHARS: usize = 4_000;

pub struct GetWeatherTool {
    client: reqwest::Client,
}

impl GetWeatherTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GetWeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct Params {
    location: String,
}

/// Reply used when no weather service is configured.
pub fn placeholder_forecast(location: &str) -> String {
    format!("Weather for {location}: no weather service configured, forecast unavailable.")
}

#[async_trait]
impl Tool for GetWeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City or place name"
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let p: Params = serde_json::from_value(params)?;

        let Some(url) = context.config.weather_api_url() else {
            return Ok(ToolOutput::text(placeholder_forecast(&p.location)));
        };

        debug!(location = %p.location, "get_weather");

        let resp = match self
            .client
            .get(url)
            .query(&[("location", p.location.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutput::error(format!("Weather lookup failed: {e}"))),
        };

        let status = resp.status();
        if !status.is_success() {
            return Ok(ToolOutput::error(format!(
                "Weather service returned HTTP {status} for {}",
                p.location
            )));
        }

        let body = resp.text().await?;
        let content = match body.char_indices().nth(MAX_BODY_CHARS) {
            Some((cut, _)) => format!("{}...\n[truncated]", &body[..cut]),
            None => body,
        };
        Ok(ToolOutput::text(content))
    }
}
