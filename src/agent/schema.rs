//! Argument checks against a tool's advertised `parameters` JSON schema,
//! `$defs` and `$ref`s included.

use jsonschema::JSONSchema;
use serde_json::{Map, Value};
use tracing::warn;

/// Errors reported per failed validation, the rest are dropped
const MAX_REPORTED_ERRORS: usize = 3;

/// Validate `args` against `parameters`, returning a human-readable reason on failure.
///
/// Explicit nulls for optional parameters are treated as absent. A schema that does
/// not compile is logged and skipped.
pub fn validate(parameters: &Value, args: &Map<String, Value>) -> Result<(), String> {
    if !parameters.is_object() {
        return Ok(());
    }
    let compiled = match JSONSchema::compile(parameters) {
        Ok(compiled) => compiled,
        Err(e) => {
            warn!("Invalid tool schema: {}", e);
            return Ok(());
        }
    };

    let instance = Value::Object(without_optional_nulls(parameters, args));
    if let Err(errors) = compiled.validate(&instance) {
        let reasons: Vec<String> = errors
            .take(MAX_REPORTED_ERRORS)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{} at {}", err, path)
                }
            })
            .collect();
        return Err(reasons.join("; "));
    }
    Ok(())
}

fn without_optional_nulls(parameters: &Value, args: &Map<String, Value>) -> Map<String, Value> {
    let required: Vec<&str> = parameters
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    args.iter()
        .filter(|(name, value)| !value.is_null() || required.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::parameters_of;
    use crate::tool::geocoding::LocationsArgs;
    use crate::tool::weather::ForecastArgs;
    use serde_json::json;

    fn weather_params() -> Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": {"type": "number"},
                "longitude": {"type": "number"},
                "days": {"type": ["integer", "null"]},
                "unit": {"type": "string", "enum": ["celsius", "fahrenheit"]}
            },
            "required": ["latitude", "longitude"]
        })
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_accepts_valid_arguments() {
        let result = validate(
            &weather_params(),
            &args(json!({"latitude": 48.85, "longitude": 2, "unit": "celsius"})),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate(&weather_params(), &args(json!({"latitude": 48.85}))).unwrap_err();
        assert!(err.contains("\"longitude\" is a required property"), "{}", err);
    }

    #[test]
    fn test_null_required_is_rejected() {
        let err = validate(
            &weather_params(),
            &args(json!({"latitude": null, "longitude": 2.35})),
        )
        .unwrap_err();
        assert!(err.contains("/latitude"), "{}", err);
    }

    #[test]
    fn test_type_mismatch_reports_path() {
        let err = validate(
            &weather_params(),
            &args(json!({"latitude": "48.85", "longitude": 2.35})),
        )
        .unwrap_err();
        assert!(err.contains("is not of type \"number\""), "{}", err);
        assert!(err.ends_with("at /latitude"), "{}", err);
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let params = weather_params();
        assert!(validate(&params, &args(json!({"latitude": 0, "longitude": 0, "days": 3}))).is_ok());
        assert!(validate(&params, &args(json!({"latitude": 0, "longitude": 0, "days": 3.5}))).is_err());
    }

    #[test]
    fn test_optional_null_is_accepted() {
        let params = json!({
            "type": "object",
            "properties": {"country_code": {"type": "string"}},
            "required": []
        });
        assert!(validate(&params, &args(json!({"country_code": null}))).is_ok());
    }

    #[test]
    fn test_enum_violation() {
        let params = weather_params();
        let bad = args(json!({"latitude": 1, "longitude": 2, "unit": "kelvin"}));
        assert!(validate(&params, &bad).unwrap_err().contains("/unit"));
    }

    #[test]
    fn test_extra_parameters() {
        let mut params = weather_params();
        let extra = args(json!({"latitude": 1, "longitude": 2, "altitude": 3}));
        assert!(validate(&params, &extra).is_ok());

        params["additionalProperties"] = json!(false);
        assert!(validate(&params, &extra).unwrap_err().contains("altitude"));
    }

    #[test]
    fn test_forecast_schema_follows_refs() {
        let params = parameters_of::<ForecastArgs>();
        let ok = args(json!({
            "latitude": 48.85,
            "longitude": 2.35,
            "temperature_unit": "celsius",
            "weather_variables": ["temperature_2m_max", "precipitation_sum"]
        }));
        assert!(validate(&params, &ok).is_ok());

        let unit = args(json!({"latitude": 1.0, "longitude": 2.0, "temperature_unit": "kelvin"}));
        assert!(validate(&params, &unit).unwrap_err().contains("/temperature_unit"));

        let variable = args(json!({"latitude": 1.0, "longitude": 2.0, "weather_variables": ["sunshine"]}));
        assert!(validate(&params, &variable).unwrap_err().contains("/weather_variables/0"));
    }

    #[test]
    fn test_locations_count_minimum() {
        let params = parameters_of::<LocationsArgs>();
        assert!(validate(&params, &args(json!({"name": "Paris", "count": 3}))).is_ok());
        let err = validate(&params, &args(json!({"name": "Paris", "count": -1}))).unwrap_err();
        assert!(err.contains("/count"), "{}", err);
    }
}
