//! Weather lookup tool backed by the Open-Meteo APIs.
//!
//! Two requests: geocode the city name to coordinates, then fetch the
//! current conditions for those coordinates. Neither API needs a key.
//!
//! Results use the `{status, weather_info}` / `{status, error_message}`
//! shape so the model can tell a lookup miss from a real answer.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use wayfarer_core::error::ToolError;
use wayfarer_core::tool::{Tool, ToolContext, ToolResult};

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,weather_code,wind_speed_10m,wind_direction_10m";

pub struct WeatherLookupTool {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WeatherLookupTool {
    /// `timeout_secs == 0` keeps the client default.
    pub fn new(timeout_secs: u64) -> Self {
        let mut builder = reqwest::Client::builder();
        if timeout_secs > 0 {
            builder = builder.timeout(std::time::Duration::from_secs(timeout_secs));
        }
        Self {
            client: builder.build().unwrap_or_else(|_| reqwest::Client::new()),
            geocoding_url: GEOCODING_URL.into(),
            forecast_url: FORECAST_URL.into(),
        }
    }

    /// Point the tool at different endpoints (self-hosted Open-Meteo).
    pub fn with_endpoints(mut self, geocoding_url: impl Into<String>, forecast_url: impl Into<String>) -> Self {
        self.geocoding_url = geocoding_url.into();
        self.forecast_url = forecast_url.into();
        self
    }

    async fn get_json(&self, request: reqwest::RequestBuilder) -> Result<Value, ToolError> {
        let response = request.send().await.map_err(|e| self.failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.failed(format!("Open-Meteo returned HTTP {status}")));
        }
        response.json().await.map_err(|e| self.failed(e.to_string()))
    }

    fn failed(&self, reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason,
        }
    }
}

impl Default for WeatherLookupTool {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl Tool for WeatherLookupTool {
    fn name(&self) -> &str {
        "weather_lookup"
    }

    fn description(&self) -> &str {
        "Retrieves the current weather report for a specified city. Returns a status of \
         'success' with weather_info (condition, temperature, humidity, wind speed and \
         direction), or 'error' with an error_message."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "The name of the city (e.g., \"New York\", \"London\", \"Tokyo\")"
                }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &mut ToolContext) -> Result<ToolResult, ToolError> {
        let city = arguments["city"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'city' argument".into()))?;

        info!(city, "weather_lookup called");

        let geo = self
            .get_json(self.client.get(&self.geocoding_url).query(&[
                ("name", city),
                ("count", "1"),
                ("language", "en"),
                ("format", "json"),
            ]))
            .await?;
        debug!(response = %geo, "Geocoding response");

        let Some(location) = first_location(&geo) else {
            warn!(city, "Geocoding returned no results");
            return Ok(ToolResult::failure(not_found(city).to_string()));
        };

        let latitude = location.latitude.to_string();
        let longitude = location.longitude.to_string();
        let forecast = self
            .get_json(self.client.get(&self.forecast_url).query(&[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("current", CURRENT_FIELDS),
            ]))
            .await?;
        debug!(response = %forecast, "Forecast response");

        match build_report(&location, &forecast) {
            Some(report) => Ok(ToolResult::json(report)),
            None => Err(self.failed("forecast response is missing current conditions".into())),
        }
    }
}

/// A geocoding hit.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country: Option<String>,
}

/// The first geocoding result, if any.
pub fn first_location(geo: &Value) -> Option<GeoLocation> {
    let first = geo["results"].as_array()?.first()?;
    serde_json::from_value(first.clone()).ok()
}

/// Payload returned when a city cannot be geocoded.
pub fn not_found(city: &str) -> Value {
    json!({
        "status": "error",
        "error_message": format!("Weather information for {city} not found!"),
    })
}

/// Assemble the success payload from a forecast response.
pub fn build_report(location: &GeoLocation, forecast: &Value) -> Option<Value> {
    let current = forecast.get("current")?;
    let code = current["weather_code"].as_i64()?;
    let wind_degrees = current["wind_direction_10m"].as_f64()?;

    Some(json!({
        "status": "success",
        "weather_info": {
            "city": location.name,
            "condition": describe_weather_code(code),
            "temperature_c": current["temperature_2m"],
            "humidity": current["relative_humidity_2m"],
            "wind_speed": current["wind_speed_10m"],
            "wind_direction": compass_direction(wind_degrees),
        }
    }))
}

/// Map a WMO weather code to a short description.
pub fn describe_weather_code(code: i64) -> &'static str {
    match code {
        0 => "Sunny",
        1 => "Mainly Clear",
        2 => "Partly Cloudy",
        3 => "Overcast",
        _ => "Cloudy",
    }
}

/// Map a bearing in degrees to one of eight compass points.
pub fn compass_direction(degrees: f64) -> &'static str {
    const DIRECTIONS: [&str; 8] = [
        "North",
        "North East",
        "East",
        "South East",
        "South",
        "South West",
        "West",
        "North West",
    ];
    let normalized = (degrees + 22.5).rem_euclid(360.0);
    DIRECTIONS[((normalized / 45.0) as usize).min(7)]
}
