use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::open_meteo::{OpenMeteo, decode, encode};
use crate::agent::{Tool, ToolDefinition};

/// Default number of matches returned by `get_locations`
const DEFAULT_LOCATION_COUNT: u32 = 10;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CoordinatesArgs {
    /// Location city (e.g. Berlin).
    pub location_name: String,
    /// ISO-3166-1 alpha2 country code (e.g. DE).
    pub country_code: Option<String>,
}

impl CoordinatesArgs {
    pub const TOOL_NAME: &'static str = "get_coordinates";
}

/// Best match for a place name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub name: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LocationsArgs {
    /// Name of the location (e.g. city name).
    pub name: String,
    /// Optional ISO-3166-1 alpha2 country code to narrow down the search (e.g. US).
    pub country_code: Option<String>,
    /// Maximum number of matches (default: 10)
    pub count: Option<u32>,
}

impl LocationsArgs {
    pub const TOOL_NAME: &'static str = "get_locations";
}

/// Location record as returned by the geocoding API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LocationInfo {
    /// Unique identifier for the location
    pub id: u64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters
    pub elevation: Option<f64>,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub country: String,
    /// ISO-3166-1 alpha2 country code
    #[serde(default)]
    pub country_code: String,
    /// State or province
    pub admin1: Option<String>,
    /// County or district
    pub admin2: Option<String>,
    pub admin3: Option<String>,
    pub admin4: Option<String>,
    pub postcodes: Option<Vec<String>>,
    pub population: Option<u64>,
}

fn geocoding_params(name: &str, country_code: Option<&str>, count: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("name", name.to_string()),
        ("count", count.to_string()),
        ("language", "en".to_string()),
        ("format", "json".to_string()),
    ];
    if let Some(code) = country_code {
        params.push(("countryCode", code.to_string()));
    }
    params
}

/// Geocoding results, empty when the API reports no match
pub fn parse_locations(data: &Value) -> anyhow::Result<Vec<LocationInfo>> {
    match data.get("results") {
        Some(results) => Ok(serde_json::from_value(results.clone())?),
        None => Ok(Vec::new()),
    }
}

/// First geocoding match reduced to name, country and coordinates
pub fn first_coordinates(query: &str, data: &Value) -> anyhow::Result<Coordinates> {
    let first = data
        .get("results")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .ok_or_else(|| anyhow::anyhow!("No location found for '{}'", query))?;

    let field = |key: &str| {
        first
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Geocoding result is missing '{}'", key))
    };

    Ok(Coordinates {
        name: field("name")?.as_str().unwrap_or_default().to_string(),
        country: first
            .get("country")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        latitude: field("latitude")?
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("latitude is not a number"))?,
        longitude: field("longitude")?
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("longitude is not a number"))?,
    })
}

pub async fn get_coordinates(api: &OpenMeteo, args: CoordinatesArgs) -> anyhow::Result<Coordinates> {
    let params = geocoding_params(&args.location_name, args.country_code.as_deref(), 1);
    let data = api.geocode(&params).await?;
    first_coordinates(&args.location_name, &data)
}

pub async fn get_locations(api: &OpenMeteo, args: LocationsArgs) -> anyhow::Result<Vec<LocationInfo>> {
    let params = geocoding_params(
        &args.name,
        args.country_code.as_deref(),
        args.count.unwrap_or(DEFAULT_LOCATION_COUNT),
    );
    let data = api.geocode(&params).await?;
    parse_locations(&data)
}

pub struct GetCoordinates {
    api: OpenMeteo,
}

impl GetCoordinates {
    pub fn new(api: OpenMeteo) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetCoordinates {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::from_args::<CoordinatesArgs>(
            CoordinatesArgs::TOOL_NAME,
            "Get the longitude and latitude coordinates for a location.",
        )
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<Value> {
        encode(&get_coordinates(&self.api, decode(args)?).await?)
    }
}

pub struct GetLocations {
    api: OpenMeteo,
}

impl GetLocations {
    pub fn new(api: OpenMeteo) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetLocations {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::from_args::<LocationsArgs>(
            LocationsArgs::TOOL_NAME,
            "Get location information (coordinates, timezone, country, administrative regions) for places matching a name.",
        )
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<Value> {
        encode(&get_locations(&self.api, decode(args)?).await?)
    }
}
