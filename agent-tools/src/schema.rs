//! Argument normalisation and structural validation against a descriptor.

use agent_primitives::ToolDescriptor;
use serde_json::{Map, Value};

/// Shapes arguments before validation.
///
/// Parameterless tools always receive `{}`. Otherwise keys the schema does
/// not declare are dropped, and explicit `null`s for optional parameters are
/// removed so they read as "not supplied".
#[must_use]
pub fn normalize(descriptor: &ToolDescriptor, mut arguments: Map<String, Value>) -> Map<String, Value> {
    if descriptor.parameters().is_empty() {
        return Map::new();
    }
    arguments.retain(|key, value| match descriptor.parameter(key) {
        Some(param) => param.is_required() || !value.is_null(),
        None => false,
    });
    arguments
}

/// Checks that every required parameter is present and every supplied value
/// has the declared JSON type.
///
/// # Errors
///
/// Returns a human-readable description of the first violation.
pub fn validate(descriptor: &ToolDescriptor, arguments: &Map<String, Value>) -> Result<(), String> {
    for param in descriptor.parameters() {
        match arguments.get(param.name()) {
            None if param.is_required() => {
                return Err(format!("missing required parameter `{}`", param.name()));
            }
            None => {}
            Some(value) if !param.ty().matches(value) => {
                return Err(format!(
                    "parameter `{}` must be of type {}, got {}",
                    param.name(),
                    param.ty(),
                    json_type(value)
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Validates loosely typed arguments: anything but an object is rejected.
///
/// # Errors
///
/// Returns a description of why the value is not a valid argument object.
pub fn validate_value(descriptor: &ToolDescriptor, arguments: &Value) -> Result<(), String> {
    match arguments {
        Value::Object(map) => validate(descriptor, map),
        Value::Null => validate(descriptor, &Map::new()),
        other => Err(format!("arguments must be a JSON object, got {}", json_type(other))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_primitives::{ParamType, ParameterSpec};
    use serde_json::json;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor::builder("course_schedule", "Weekly schedule")
            .parameter(ParameterSpec::required("course", ParamType::String))
            .parameter(ParameterSpec::optional("week", ParamType::Integer))
            .build()
            .unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let normalized = normalize(&descriptor(), object(json!({"course": "db", "colour": "red"})));
        assert_eq!(Value::Object(normalized), json!({"course": "db"}));
    }

    #[test]
    fn parameterless_tools_receive_empty_object() {
        let bare = ToolDescriptor::builder("get_current_time", "Now").build().unwrap();
        assert!(normalize(&bare, object(json!({"tz": "UTC"}))).is_empty());
    }

    #[test]
    fn missing_required_parameter_is_reported() {
        let err = validate(&descriptor(), &Map::new()).expect_err("missing");
        assert!(err.contains("course"));
    }

    #[test]
    fn wrong_type_is_reported() {
        let err = validate(&descriptor(), &object(json!({"course": "db", "week": "two"})))
            .expect_err("type");
        assert!(err.contains("week") && err.contains("integer"));
    }

    #[test]
    fn null_optional_is_treated_as_absent() {
        let normalized = normalize(&descriptor(), object(json!({"course": "db", "week": null})));
        assert!(validate(&descriptor(), &normalized).is_ok());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = validate_value(&descriptor(), &json!([1, 2])).expect_err("array");
        assert!(err.contains("object"));
    }
}
