use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parley_agent::{Tool, WeatherQuery, WeatherReport};
use parley_core::WEATHER_TOOL;
use reqwest::Client;
use serde_json::Value;

/// `weather.get` backed by an HTTP forecast service.
///
/// Calls `GET {base_url}/forecast?location=..&date=..` and expects
/// `{location_label, date, summary, temp_c}` back.
pub struct HttpWeatherTool {
    http: Client,
    forecast_url: String,
}

impl HttpWeatherTool {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, forecast_url: format!("{}/forecast", base_url.trim_end_matches('/')) })
    }
}

#[async_trait]
impl Tool for HttpWeatherTool {
    fn name(&self) -> &'static str {
        WEATHER_TOOL
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let query: WeatherQuery =
            serde_json::from_value(input).context("weather.get arguments are malformed")?;

        let mut params = vec![("location", query.location.clone())];
        if let Some(date) = query.date {
            params.push(("date", date.format("%Y-%m-%d").to_string()));
        }

        let body: Value = self
            .http
            .get(&self.forecast_url)
            .query(&params)
            .send()
            .await
            .context("forecast request failed")?
            .error_for_status()
            .context("forecast service returned an error status")?
            .json()
            .await
            .context("forecast response was not valid JSON")?;

        let report = WeatherReport::from_value(body).context("forecast response is incomplete")?;
        Ok(serde_json::to_value(report)?)
    }
}
