//! Built-in tools for multichat.
//!
//! This crate provides:
//!
//! - **REST connector**: Shared authenticated GET against upstream APIs
//! - **Tools**: Weather, flight status, place suggestions and current time,
//!   registered into a `ToolRegistry`

pub mod connector;
pub mod error;
pub mod tools;

pub use connector::{ConnectorInfo, RestConnector};
pub use error::ConnectorError;
pub use tools::{
    CurrentTimeTool, FlightStatusTool, FlightsConfig, PlaceSuggestionsTool, PlacesConfig,
    ToolsConfig, WeatherConfig, WeatherTool, builtin_registry,
};
