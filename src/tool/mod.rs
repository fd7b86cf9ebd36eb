pub mod date;
pub mod geocoding;
pub mod open_meteo;
pub mod weather;

use crate::agent::registry::RegistryBuilder;
use open_meteo::OpenMeteo;

/// Register the weather agent's tools
pub fn register_weather_tools(builder: RegistryBuilder, api: &OpenMeteo) -> RegistryBuilder {
    builder
        .tool(geocoding::GetCoordinates::new(api.clone()))
        .tool(geocoding::GetLocations::new(api.clone()))
        .tool(weather::GetWeather::new(api.clone()))
        .tool(weather::GetWeatherForecast::new(api.clone()))
        .tool(date::GetCurrentDate)
}
