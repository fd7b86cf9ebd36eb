use std::collections::BTreeMap;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::date::today_in;
use super::open_meteo::{OpenMeteo, decode, encode, wire_name};
use crate::agent::{Tool, ToolDefinition};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WeatherArgs {
    /// Coordinate latitude in degrees.
    pub latitude: f64,
    /// Coordinate longitude in degrees.
    pub longitude: f64,
}

impl WeatherArgs {
    pub const TOOL_NAME: &'static str = "get_weather";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentTemperature {
    pub temperature: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// Daily variables accepted by the forecast API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WeatherVariable {
    CloudCoverMax,
    CloudCoverMean,
    CloudCoverMin,
    PrecipitationHours,
    PrecipitationProbabilityMax,
    PrecipitationSum,
    RainSum,
    #[serde(rename = "relative_humidity_2m_max")]
    RelativeHumidityMax,
    #[serde(rename = "relative_humidity_2m_mean")]
    RelativeHumidityMean,
    #[serde(rename = "relative_humidity_2m_min")]
    RelativeHumidityMin,
    ShowersSum,
    SnowfallSum,
    Sunrise,
    Sunset,
    #[serde(rename = "temperature_2m_max")]
    TemperatureMax,
    #[serde(rename = "temperature_2m_min")]
    TemperatureMin,
    #[serde(rename = "wind_gusts_10m_max")]
    WindGustsMax,
    #[serde(rename = "wind_gusts_10m_min")]
    WindGustsMin,
    #[serde(rename = "wind_speed_10m_max")]
    WindSpeedMax,
    #[serde(rename = "wind_speed_10m_min")]
    WindSpeedMin,
}

const DEFAULT_VARIABLES: [WeatherVariable; 6] = [
    WeatherVariable::CloudCoverMean,
    WeatherVariable::PrecipitationProbabilityMax,
    WeatherVariable::PrecipitationSum,
    WeatherVariable::RelativeHumidityMean,
    WeatherVariable::TemperatureMax,
    WeatherVariable::TemperatureMin,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    #[default]
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrecipitationUnit {
    Mm,
    #[default]
    Inch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WindSpeedUnit {
    Kmh,
    #[default]
    Mph,
    Ms,
    Kn,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    #[default]
    Iso8601,
    Unixtime,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ForecastArgs {
    /// Coordinate latitude in degrees.
    pub latitude: f64,
    /// Coordinate longitude in degrees.
    pub longitude: f64,
    /// Timezone for the forecast (e.g. 'America/New_York', default: "auto")
    pub timezone: Option<String>,
    /// Start date in ISO8601 (YYYY-MM-DD) format (default: today)
    pub start_date: Option<String>,
    /// End date in ISO8601 (YYYY-MM-DD) format (default: today)
    pub end_date: Option<String>,
    /// Daily weather variables to include (default: cloud cover, precipitation
    /// probability and sum, mean humidity, min/max temperature)
    pub weather_variables: Option<Vec<WeatherVariable>>,
    /// Time format (default: iso8601)
    pub time_format: Option<TimeFormat>,
    /// Temperature unit (default: fahrenheit)
    pub temperature_unit: Option<TemperatureUnit>,
    /// Precipitation unit (default: inch)
    pub precipitation_unit: Option<PrecipitationUnit>,
    /// Wind speed unit (default: mph)
    pub wind_speed_unit: Option<WindSpeedUnit>,
}

impl ForecastArgs {
    pub const TOOL_NAME: &'static str = "get_weather_forecast";
}

/// Forecast with daily values pivoted to date -> variable -> value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherForecast {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub timezone: Option<String>,
    pub timezone_abbreviation: Option<String>,
    pub daily_units: BTreeMap<String, String>,
    pub daily: BTreeMap<String, BTreeMap<String, Value>>,
}

pub async fn get_weather(api: &OpenMeteo, args: WeatherArgs) -> anyhow::Result<CurrentTemperature> {
    let params = [
        ("latitude", args.latitude.to_string()),
        ("longitude", args.longitude.to_string()),
        ("current", "temperature_2m".to_string()),
    ];
    let data = api.forecast(&params).await?;
    parse_current(&data)
}

pub fn parse_current(data: &Value) -> anyhow::Result<CurrentTemperature> {
    let current = data
        .get("current")
        .ok_or_else(|| anyhow::anyhow!("Forecast response has no 'current' block"))?;
    let temperature = current
        .get("temperature_2m")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("Forecast response has no current temperature"))?;
    let unit = data
        .pointer("/current_units/temperature_2m")
        .and_then(Value::as_str)
        .unwrap_or("°C")
        .to_string();

    Ok(CurrentTemperature {
        temperature,
        unit,
        time: current.get("time").and_then(Value::as_str).map(str::to_string),
    })
}

/// Requested variables with duplicates removed, first occurrence wins
fn resolve_variables(requested: Option<&[WeatherVariable]>) -> Vec<WeatherVariable> {
    let requested = match requested {
        Some(vars) if !vars.is_empty() => vars,
        _ => &DEFAULT_VARIABLES[..],
    };
    let mut unique = Vec::with_capacity(requested.len());
    for var in requested {
        if !unique.contains(var) {
            unique.push(*var);
        }
    }
    unique
}

pub fn forecast_params(args: &ForecastArgs, variables: &[WeatherVariable]) -> Vec<(&'static str, String)> {
    let timezone = args.timezone.clone().unwrap_or_else(|| "auto".to_string());
    let today = today_in(&timezone);
    let daily = variables.iter().map(wire_name).collect::<Vec<_>>().join(",");

    vec![
        ("latitude", args.latitude.to_string()),
        ("longitude", args.longitude.to_string()),
        ("start_date", args.start_date.clone().unwrap_or_else(|| today.clone())),
        ("end_date", args.end_date.clone().unwrap_or(today)),
        ("timezone", timezone),
        ("daily", daily),
        ("timeformat", wire_name(&args.time_format.unwrap_or_default())),
        ("temperature_unit", wire_name(&args.temperature_unit.unwrap_or_default())),
        ("precipitation_unit", wire_name(&args.precipitation_unit.unwrap_or_default())),
        ("wind_speed_unit", wire_name(&args.wind_speed_unit.unwrap_or_default())),
    ]
}

/// Pivot Open-Meteo's column arrays into rows keyed by date (or row index if `time` is absent)
pub fn pivot_daily(
    daily: &Value,
    variables: &[WeatherVariable],
) -> BTreeMap<String, BTreeMap<String, Value>> {
    let mut rows: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();

    let keys: Vec<String> = match daily.get("time").and_then(Value::as_array) {
        Some(times) => times
            .iter()
            .map(|t| match t {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        None => Vec::new(),
    };

    for var in variables {
        let name = wire_name(var);
        let Some(column) = daily.get(&name).and_then(Value::as_array) else {
            continue;
        };
        for (i, value) in column.iter().enumerate() {
            let key = keys.get(i).cloned().unwrap_or_else(|| i.to_string());
            rows.entry(key).or_default().insert(name.clone(), value.clone());
        }
    }

    rows
}

pub fn build_forecast(args: &ForecastArgs, variables: &[WeatherVariable], data: &Value) -> WeatherForecast {
    let daily_units = data
        .get("daily_units")
        .and_then(Value::as_object)
        .map(|units| {
            units
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);

    WeatherForecast {
        latitude: data.get("latitude").and_then(Value::as_f64).unwrap_or(args.latitude),
        longitude: data.get("longitude").and_then(Value::as_f64).unwrap_or(args.longitude),
        elevation: data.get("elevation").and_then(Value::as_f64),
        timezone: text("timezone"),
        timezone_abbreviation: text("timezone_abbreviation"),
        daily_units,
        daily: pivot_daily(data.get("daily").unwrap_or(&Value::Null), variables),
    }
}

pub async fn get_weather_forecast(api: &OpenMeteo, args: ForecastArgs) -> anyhow::Result<WeatherForecast> {
    let variables = resolve_variables(args.weather_variables.as_deref());
    let params = forecast_params(&args, &variables);
    let data = api.forecast(&params).await?;
    Ok(build_forecast(&args, &variables, &data))
}

pub struct GetWeather {
    api: OpenMeteo,
}

impl GetWeather {
    pub fn new(api: OpenMeteo) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetWeather {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::from_args::<WeatherArgs>(
            WeatherArgs::TOOL_NAME,
            "Get current temperature for provided coordinates in celsius.",
        )
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<Value> {
        encode(&get_weather(&self.api, decode(args)?).await?)
    }
}

pub struct GetWeatherForecast {
    api: OpenMeteo,
}

impl GetWeatherForecast {
    pub fn new(api: OpenMeteo) -> Self {
        Self { api }
    }
}

pub const FORECAST_DESCRIPTION: &str = "Get the daily weather forecast for the provided coordinates. \
Includes the requested daily variables (by default cloud cover, precipitation probability and sum, \
humidity, minimum and maximum temperature) in Fahrenheit, inches and mph unless other units are requested.";

#[async_trait]
impl Tool for GetWeatherForecast {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::from_args::<ForecastArgs>(ForecastArgs::TOOL_NAME, FORECAST_DESCRIPTION)
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<Value> {
        encode(&get_weather_forecast(&self.api, decode(args)?).await?)
    }
}
