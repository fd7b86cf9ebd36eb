use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::transport::stdio;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt, tool, tool_handler, tool_router};
use serde::Serialize;
use tracing::{info, warn};

use crate::agent::registry::render_result;
use crate::tool::date::{CurrentDateArgs, today_in};
use crate::tool::geocoding::{LocationsArgs, get_locations};
use crate::tool::open_meteo::OpenMeteo;
use crate::tool::weather::{ForecastArgs, get_weather_forecast};

const INSTRUCTIONS: &str = "Weather tools backed by Open-Meteo. \
    Resolve a place with get_locations, then pass its coordinates to get_weather_forecast. \
    Use get_current_date to anchor relative dates like 'tomorrow'.";

/// MCP server exposing the weather tools over stdio
#[derive(Clone)]
pub struct WeatherServer {
    api: OpenMeteo,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl WeatherServer {
    pub fn new(api: OpenMeteo) -> Self {
        Self {
            api,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Get the daily weather forecast for the provided coordinates. Includes the requested daily variables (by default cloud cover, precipitation probability and sum, humidity, minimum and maximum temperature) in Fahrenheit, inches and mph unless other units are requested."
    )]
    async fn get_weather_forecast(
        &self,
        Parameters(args): Parameters<ForecastArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!(
            "Call:   {}({}, {})",
            ForecastArgs::TOOL_NAME,
            args.latitude,
            args.longitude
        );
        let result = get_weather_forecast(&self.api, args).await;
        respond(ForecastArgs::TOOL_NAME, result)
    }

    #[tool(
        description = "Get the current date in ISO8601 (YYYY-MM-DD) format for the specified timezone."
    )]
    async fn get_current_date(
        &self,
        Parameters(args): Parameters<CurrentDateArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!("Call:   {}({})", CurrentDateArgs::TOOL_NAME, args.timezone);
        respond(CurrentDateArgs::TOOL_NAME, Ok(today_in(&args.timezone)))
    }

    #[tool(
        description = "Get location information (coordinates, timezone, country, administrative regions) for places matching a name."
    )]
    async fn get_locations(
        &self,
        Parameters(args): Parameters<LocationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!("Call:   {}({})", LocationsArgs::TOOL_NAME, args.name);
        let result = get_locations(&self.api, args).await;
        respond(LocationsArgs::TOOL_NAME, result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for WeatherServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.instructions = Some(INSTRUCTIONS.into());
        info
    }
}

/// Serialize a tool result as JSON text content, mapping failures to internal errors
fn respond<T: Serialize>(tool: &str, result: anyhow::Result<T>) -> Result<CallToolResult, McpError> {
    let value = result.map_err(|e| {
        warn!("Result: {} failed: {:#}", tool, e);
        McpError::internal_error(format!("{} failed: {:#}", tool, e), None)
    })?;
    let value = serde_json::to_value(value).map_err(|e| McpError::internal_error(e.to_string(), None))?;
    let text = render_result(&value);
    info!("Result: {} -> {}", tool, text);
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Serve the weather tools on stdin/stdout until the client disconnects
pub async fn serve(api: OpenMeteo) -> anyhow::Result<()> {
    info!("Starting MCP weather server on stdio");
    let service = WeatherServer::new(api).serve(stdio()).await?;
    service.waiting().await?;
    info!("MCP client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeatherConfig;

    #[test]
    fn test_router_lists_weather_tools() {
        let server = WeatherServer::new(OpenMeteo::new(&WeatherConfig::default()));
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["get_current_date", "get_locations", "get_weather_forecast"]
        );
    }

    #[test]
    fn test_server_info_enables_tools() {
        let server = WeatherServer::new(OpenMeteo::new(&WeatherConfig::default()));
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("get_locations"));
    }

    #[test]
    fn test_respond_renders_json_text() {
        let result = respond("get_current_date", Ok("2026-10-18")).unwrap();
        assert_eq!(result.is_error, Some(false));
        let text = result.content[0].as_text().unwrap().text.clone();
        assert_eq!(text, "2026-10-18");
    }

    #[test]
    fn test_respond_maps_errors() {
        let err = respond::<String>("get_locations", Err(anyhow::anyhow!("offline"))).unwrap_err();
        assert!(err.message.contains("get_locations failed: offline"));
    }
}
