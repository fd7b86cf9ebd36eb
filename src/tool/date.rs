use async_trait::async_trait;
use chrono::{Local, Utc};
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::open_meteo::decode;
use crate::agent::{Tool, ToolDefinition};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CurrentDateArgs {
    /// Timezone for the date (e.g. 'America/New_York').
    pub timezone: String,
}

impl CurrentDateArgs {
    pub const TOOL_NAME: &'static str = "get_current_date";
}

/// Today's date (YYYY-MM-DD) in an IANA timezone, falling back to the local date
/// for "auto" or unknown zones
pub fn today_in(timezone: &str) -> String {
    match timezone.parse::<Tz>() {
        Ok(tz) => Utc::now().with_timezone(&tz).date_naive().to_string(),
        Err(_) => {
            debug!("Unknown timezone '{}', using local date", timezone);
            Local::now().date_naive().to_string()
        }
    }
}

pub struct GetCurrentDate;

#[async_trait]
impl Tool for GetCurrentDate {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::from_args::<CurrentDateArgs>(
            CurrentDateArgs::TOOL_NAME,
            "Get the current date in ISO8601 (YYYY-MM-DD) format for the specified timezone.",
        )
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<Value> {
        let args: CurrentDateArgs = decode(args)?;
        Ok(Value::String(today_in(&args.timezone)))
    }
}
