//! Built-in tools: weather, flight status, place suggestions and time.
//!
//! The HTTP tools return the upstream JSON body verbatim; the model reads
//! it directly.

use crate::connector::RestConnector;
use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use multichat_ai::{ToolArgs, ToolDescriptor, ToolError, ToolInvoker, ToolRegistry};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Tool name for current weather.
pub const WEATHER_TOOL: &str = "get_weather";
/// Tool name for flight status.
pub const FLIGHT_STATUS_TOOL: &str = "get_flight_status";
/// Tool name for place suggestions.
pub const PLACE_SUGGESTIONS_TOOL: &str = "get_place_suggestions";
/// Tool name for the current time.
pub const CURRENT_TIME_TOOL: &str = "get_current_time";

fn default_weather_url() -> String {
    "https://api.weatherapi.com/v1".to_string()
}

fn default_flights_url() -> String {
    "http://api.aviationstack.com/v1".to_string()
}

fn default_places_url() -> String {
    "https://atlas.microsoft.com".to_string()
}

/// Weather API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// API key.
    pub api_key: String,
    /// Weather API base URL.
    #[serde(default = "default_weather_url")]
    pub base_url: String,
}

/// Flight tracking API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightsConfig {
    /// API access key.
    pub api_key: String,
    /// Flight tracking API base URL.
    #[serde(default = "default_flights_url")]
    pub base_url: String,
}

/// Maps search API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacesConfig {
    /// Subscription key.
    pub api_key: String,
    /// Maps API base URL.
    #[serde(default = "default_places_url")]
    pub base_url: String,
    /// Optional comma-separated ISO country codes restricting results.
    #[serde(default)]
    pub country_set: Option<String>,
}

/// Which built-in tools to register. Unconfigured HTTP tools are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Enables `get_weather`.
    #[serde(default)]
    pub weather: Option<WeatherConfig>,
    /// Enables `get_flight_status`.
    #[serde(default)]
    pub flights: Option<FlightsConfig>,
    /// Enables `get_place_suggestions`.
    #[serde(default)]
    pub places: Option<PlacesConfig>,
}

fn required_str<'a>(args: &'a ToolArgs, key: &str, tool: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ConnectorError::InvalidParameters {
                operation: tool.to_string(),
                reason: format!("'{key}' must be a non-empty string"),
            }
            .into_tool_error(tool)
        })
}

/// Current weather for a city.
#[derive(Debug, Clone)]
pub struct WeatherTool {
    connector: RestConnector,
    api_key: String,
}

impl WeatherTool {
    /// Creates the tool.
    #[must_use]
    pub fn new(client: Client, config: &WeatherConfig) -> Self {
        Self {
            connector: RestConnector::new(client, "weatherapi", config.base_url.clone()),
            api_key: config.api_key.clone(),
        }
    }

    /// Returns the descriptor registering this tool.
    #[must_use]
    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor::new(
            WEATHER_TOOL,
            "Gets the current weather for a city",
            Arc::new(self),
        )
        .with_parameter_schema(json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "name of the city" }
            },
            "required": ["city"]
        }))
    }
}

#[async_trait]
impl ToolInvoker for WeatherTool {
    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let city = required_str(args, "city", WEATHER_TOOL)?;
        self.connector
            .get_text("current.json", &[("key", self.api_key.as_str()), ("q", city), ("aqi", "no")])
            .await
            .map_err(|e| e.into_tool_error(WEATHER_TOOL))
    }
}

/// Live status of a flight by IATA number.
#[derive(Debug, Clone)]
pub struct FlightStatusTool {
    connector: RestConnector,
    api_key: String,
}

impl FlightStatusTool {
    /// Creates the tool.
    #[must_use]
    pub fn new(client: Client, config: &FlightsConfig) -> Self {
        Self {
            connector: RestConnector::new(client, "aviationstack", config.base_url.clone()),
            api_key: config.api_key.clone(),
        }
    }

    /// Returns the descriptor registering this tool.
    #[must_use]
    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor::new(
            FLIGHT_STATUS_TOOL,
            "Gets the live status of a flight",
            Arc::new(self),
        )
        .with_parameter_schema(json!({
            "type": "object",
            "properties": {
                "flight_number": {
                    "type": "string",
                    "description": "IATA flight number, e.g. AT200"
                }
            },
            "required": ["flight_number"]
        }))
    }
}

#[async_trait]
impl ToolInvoker for FlightStatusTool {
    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let flight = required_str(args, "flight_number", FLIGHT_STATUS_TOOL)?;
        let flight = flight.replace(' ', "").to_uppercase();
        self.connector
            .get_text(
                "flights",
                &[
                    ("access_key", self.api_key.as_str()),
                    ("flight_iata", flight.as_str()),
                ],
            )
            .await
            .map_err(|e| e.into_tool_error(FLIGHT_STATUS_TOOL))
    }
}

/// Places of a given type near a named location.
///
/// The location is geocoded first; the fuzzy search is then centred on the
/// first match.
#[derive(Debug, Clone)]
pub struct PlaceSuggestionsTool {
    connector: RestConnector,
    api_key: String,
    country_set: Option<String>,
}

impl PlaceSuggestionsTool {
    /// Creates the tool.
    #[must_use]
    pub fn new(client: Client, config: &PlacesConfig) -> Self {
        Self {
            connector: RestConnector::new(client, "azure_maps", config.base_url.clone()),
            api_key: config.api_key.clone(),
            country_set: config.country_set.clone(),
        }
    }

    /// Returns the descriptor registering this tool.
    #[must_use]
    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor::new(
            PLACE_SUGGESTIONS_TOOL,
            "Gets the place suggestions for a given location",
            Arc::new(self),
        )
        .with_parameter_schema(json!({
            "type": "object",
            "properties": {
                "place_type": { "type": "string", "description": "type of the place" },
                "location": { "type": "string", "description": "name of the location" }
            },
            "required": ["place_type", "location"]
        }))
    }

    async fn geocode(&self, location: &str) -> Result<Option<(f64, f64)>, ConnectorError> {
        let body = self
            .connector
            .get_json(
                "search/address/json",
                &[
                    ("api-version", "1.0"),
                    ("subscription-key", self.api_key.as_str()),
                    ("query", location),
                    ("limit", "1"),
                ],
            )
            .await?;
        Ok(first_position(&body))
    }
}

/// Extracts the first result's coordinates from a maps search response.
#[must_use]
pub fn first_position(body: &serde_json::Value) -> Option<(f64, f64)> {
    let position = body.pointer("/results/0/position")?;
    Some((position.get("lat")?.as_f64()?, position.get("lon")?.as_f64()?))
}

#[async_trait]
impl ToolInvoker for PlaceSuggestionsTool {
    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let place_type = required_str(args, "place_type", PLACE_SUGGESTIONS_TOOL)?;
        let location = required_str(args, "location", PLACE_SUGGESTIONS_TOOL)?;

        let Some((lat, lon)) = self
            .geocode(location)
            .await
            .map_err(|e| e.into_tool_error(PLACE_SUGGESTIONS_TOOL))?
        else {
            debug!(location, "no geocoding match");
            return Ok(format!("No location found matching '{location}'."));
        };

        let lat = lat.to_string();
        let lon = lon.to_string();
        let mut query = vec![
            ("api-version", "1.0"),
            ("subscription-key", self.api_key.as_str()),
            ("query", place_type),
            ("lat", lat.as_str()),
            ("lon", lon.as_str()),
            ("language", "en-US"),
        ];
        if let Some(countries) = &self.country_set {
            query.push(("countrySet", countries.as_str()));
        }

        self.connector
            .get_text("search/fuzzy/json", &query)
            .await
            .map_err(|e| e.into_tool_error(PLACE_SUGGESTIONS_TOOL))
    }
}

/// Current UTC date and time; no network.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTimeTool;

impl CurrentTimeTool {
    /// Returns the descriptor registering this tool.
    #[must_use]
    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor::new(
            CURRENT_TIME_TOOL,
            "Gets the current date and time in UTC",
            Arc::new(self),
        )
    }
}

/// Formats a timestamp the way the time tool reports it.
#[must_use]
pub fn format_time(now: DateTime<Utc>) -> String {
    now.format("%A, %B %-d, %Y %H:%M:%S UTC").to_string()
}

#[async_trait]
impl ToolInvoker for CurrentTimeTool {
    async fn invoke(&self, _args: &ToolArgs) -> Result<String, ToolError> {
        Ok(format_time(Utc::now()))
    }
}

/// Builds the registry of built-in tools.
///
/// The time tool is always present; HTTP tools are added when configured.
///
/// # Errors
///
/// Returns `ToolError::DuplicateName` if two tools share a name.
pub fn builtin_registry(client: &Client, config: &ToolsConfig) -> Result<ToolRegistry, ToolError> {
    let mut builder = ToolRegistry::builder().register(CurrentTimeTool.descriptor())?;
    if let Some(weather) = &config.weather {
        builder = builder.register(WeatherTool::new(client.clone(), weather).descriptor())?;
    }
    if let Some(flights) = &config.flights {
        builder = builder.register(FlightStatusTool::new(client.clone(), flights).descriptor())?;
    }
    if let Some(places) = &config.places {
        builder = builder.register(PlaceSuggestionsTool::new(client.clone(), places).descriptor())?;
    }
    Ok(builder.build())
}
