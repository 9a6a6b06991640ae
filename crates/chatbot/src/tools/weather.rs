use serde::Deserialize;
use serde_json::Value;

use super::ToolContext;
use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Deserialize)]
pub struct WeatherArgs {
    pub latitude: f64,
    pub longitude: f64,
}

/// Current conditions plus an hourly and daily outlook from open-meteo
pub async fn get_weather(ctx: &ToolContext, args: WeatherArgs) -> AgentResult<Value> {
    let url = format!("{}/v1/forecast", ctx.weather_host.trim_end_matches('/'));
    let response = ctx
        .http
        .get(&url)
        .query(&[
            ("latitude", args.latitude.to_string()),
            ("longitude", args.longitude.to_string()),
            ("current", "temperature_2m".to_string()),
            ("hourly", "temperature_2m".to_string()),
            ("daily", "sunrise,sunset".to_string()),
            ("timezone", "auto".to_string()),
        ])
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AgentError::ExecutionError(format!("weather lookup failed: {}", e)))?;

    response
        .json::<Value>()
        .await
        .map_err(|e| AgentError::ExecutionError(format!("invalid weather response: {}", e)))
}
