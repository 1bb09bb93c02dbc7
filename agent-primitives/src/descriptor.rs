//! Tool descriptors: the immutable, indexable description of a callable tool.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// JSON type accepted by a tool parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// JSON string.
    String,
    /// Integral JSON number.
    Integer,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// Any JSON value, including `null`.
    Any,
}

impl ParamType {
    /// Parses a type label, accepting the common short aliases used in
    /// hand-written catalogs (`str`, `int`, `float`, `bool`, `list`, `dict`).
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let ty = match label.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Self::String,
            "integer" | "int" => Self::Integer,
            "number" | "float" | "double" => Self::Number,
            "boolean" | "bool" => Self::Boolean,
            "array" | "list" => Self::Array,
            "object" | "dict" | "map" => Self::Object,
            "any" | "" => Self::Any,
            _ => return None,
        };
        Some(ty)
    }

    /// Canonical lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    /// Returns `true` when `value` has this JSON type.
    ///
    /// Integral floats such as `3.0` are accepted as integers.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|v| v.fract() == 0.0)
            }
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a tool's ordered parameter schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    name: String,
    #[serde(rename = "type")]
    ty: ParamType,
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl ParameterSpec {
    /// Creates a required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: None,
        }
    }

    /// Creates an optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    /// Attaches a human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected JSON type.
    #[must_use]
    pub const fn ty(&self) -> ParamType {
        self.ty
    }

    /// Whether callers must supply the parameter.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Immutable description of a callable tool.
///
/// Descriptors are the unit of retrieval: their textual fields feed the
/// embedding index and their parameter schema drives argument validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptor")]
pub struct ToolDescriptor {
    name: String,
    #[serde(rename = "server", skip_serializing_if = "Option::is_none")]
    owning_server: Option<String>,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    keywords: BTreeSet<String>,
    parameters: Vec<ParameterSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    examples: Vec<String>,
}

impl ToolDescriptor {
    /// Starts building a descriptor.
    #[must_use]
    pub fn builder(name: impl Into<String>, description: impl Into<String>) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder {
            name: name.into(),
            description: description.into(),
            owning_server: None,
            category: None,
            keywords: BTreeSet::new(),
            parameters: Vec::new(),
            examples: Vec::new(),
        }
    }

    /// Unique tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the backend expected to serve this tool, if declared.
    #[must_use]
    pub fn owning_server(&self) -> Option<&str> {
        self.owning_server.as_deref()
    }

    /// Free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Optional category label.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Keyword set, iterated in sorted order.
    #[must_use]
    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }

    /// Ordered parameter schema.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Looks up a parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|param| param.name == name)
    }

    /// First required parameter in schema order.
    #[must_use]
    pub fn first_required(&self) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|param| param.required)
    }

    /// Example queries this tool answers.
    #[must_use]
    pub fn examples(&self) -> &[String] {
        &self.examples
    }

    /// Coerces loosely shaped arguments into an argument object.
    ///
    /// Objects pass through and `null` becomes `{}`. Any other value is bound
    /// to the first required parameter, or to the sole parameter when nothing
    /// is required; it is dropped when the tool takes no parameters.
    #[must_use]
    pub fn bind_arguments(&self, value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            scalar => {
                let target = self.first_required().or(match self.parameters.as_slice() {
                    [only] => Some(only),
                    _ => None,
                });
                let mut map = Map::new();
                if let Some(param) = target {
                    map.insert(param.name.clone(), scalar);
                }
                map
            }
        }
    }
}

/// Builder for [`ToolDescriptor`].
#[derive(Debug)]
pub struct ToolDescriptorBuilder {
    name: String,
    description: String,
    owning_server: Option<String>,
    category: Option<String>,
    keywords: BTreeSet<String>,
    parameters: Vec<ParameterSpec>,
    examples: Vec<String>,
}

impl ToolDescriptorBuilder {
    /// Declares the owning backend.
    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.owning_server = Some(server.into());
        self
    }

    /// Sets the category label.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Adds a keyword.
    #[must_use]
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.insert(keyword.into());
        self
    }

    /// Appends a parameter to the schema.
    #[must_use]
    pub fn parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Appends an example query.
    #[must_use]
    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Finalises the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] when the name or description is
    /// blank, or when two parameters share a name.
    pub fn build(self) -> Result<ToolDescriptor> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(Error::invalid_descriptor("", "tool name cannot be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(Error::invalid_descriptor(name, "description cannot be empty"));
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if param.name.trim().is_empty() {
                return Err(Error::invalid_descriptor(name, "parameter name cannot be empty"));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(Error::invalid_descriptor(
                    name,
                    format!("parameter `{}` declared twice", param.name),
                ));
            }
        }

        Ok(ToolDescriptor {
            name,
            owning_server: self.owning_server.filter(|s| !s.trim().is_empty()),
            description: self.description,
            category: self.category.filter(|s| !s.trim().is_empty()),
            keywords: self.keywords,
            parameters: self.parameters,
            examples: self.examples,
        })
    }
}

/// Wire shape of a descriptor as written in catalog files.
#[derive(Deserialize)]
struct RawDescriptor {
    name: String,
    #[serde(default)]
    server: Option<String>,
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    examples: Vec<String>,
}

impl TryFrom<RawDescriptor> for ToolDescriptor {
    type Error = Error;

    fn try_from(raw: RawDescriptor) -> Result<Self> {
        let parameters = parse_parameters(&raw.name, raw.parameters)?;
        let mut builder = Self::builder(raw.name, raw.description);
        if let Some(server) = raw.server {
            builder = builder.server(server);
        }
        if let Some(category) = raw.category {
            builder = builder.category(category);
        }
        for keyword in raw.keywords {
            builder = builder.keyword(keyword);
        }
        for param in parameters {
            builder = builder.parameter(param);
        }
        for example in raw.examples {
            builder = builder.example(example);
        }
        builder.build()
    }
}

/// Accepts either an ordered object (`name -> "type"` or
/// `name -> {type, required, description}`) or a list of
/// `{name, type, required, description}` entries.
fn parse_parameters(tool: &str, value: Value) -> Result<Vec<ParameterSpec>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => map
            .into_iter()
            .map(|(name, spec)| parse_parameter(tool, name, &spec))
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_descriptor(tool, "parameter entry without a name"))?
                    .to_owned();
                parse_parameter(tool, name, &item)
            })
            .collect(),
        other => Err(Error::invalid_descriptor(
            tool,
            format!("`parameters` must be an object or a list, got {other}"),
        )),
    }
}

fn parse_parameter(tool: &str, name: String, spec: &Value) -> Result<ParameterSpec> {
    let (label, required, description) = match spec {
        Value::String(label) => (label.as_str(), true, None),
        Value::Object(fields) => (
            fields.get("type").and_then(Value::as_str).unwrap_or("any"),
            fields.get("required").and_then(Value::as_bool).unwrap_or(true),
            fields
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned),
        ),
        other => {
            return Err(Error::invalid_descriptor(
                tool,
                format!("parameter `{name}` has unsupported spec {other}"),
            ));
        }
    };

    let ty = ParamType::parse(label).ok_or_else(|| {
        Error::invalid_descriptor(tool, format!("parameter `{name}` has unknown type `{label}`"))
    })?;

    Ok(ParameterSpec {
        name,
        ty,
        required,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_parameters_keep_declaration_order() {
        let descriptor: ToolDescriptor = serde_json::from_value(json!({
            "name": "course_schedule",
            "server": "academic",
            "description": "Look up the weekly schedule for a course",
            "keywords": ["schedule", "course"],
            "parameters": {
                "zeta": "string",
                "alpha": {"type": "int", "required": false}
            }
        }))
        .expect("descriptor");

        let names: Vec<_> = descriptor.parameters().iter().map(ParameterSpec::name).collect();
        assert_eq!(names, ["zeta", "alpha"]);
        assert_eq!(descriptor.parameters()[1].ty(), ParamType::Integer);
        assert!(!descriptor.parameters()[1].is_required());
        assert_eq!(descriptor.owning_server(), Some("academic"));
        assert_eq!(descriptor.first_required().map(ParameterSpec::name), Some("zeta"));
    }

    #[test]
    fn list_parameters_are_accepted() {
        let descriptor: ToolDescriptor = serde_json::from_value(json!({
            "name": "calculate",
            "description": "Evaluate arithmetic",
            "parameters": [{"name": "expression", "type": "str"}]
        }))
        .expect("descriptor");
        assert_eq!(descriptor.parameters().len(), 1);
        assert!(descriptor.parameters()[0].is_required());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_value::<ToolDescriptor>(json!({
            "name": "bad",
            "description": "x",
            "parameters": {"a": "tensor"}
        }))
        .expect_err("unknown type");
        assert!(err.to_string().contains("tensor"));
    }

    #[test]
    fn builder_rejects_duplicate_parameters() {
        let err = ToolDescriptor::builder("t", "d")
            .parameter(ParameterSpec::required("a", ParamType::String))
            .parameter(ParameterSpec::optional("a", ParamType::Integer))
            .build()
            .expect_err("duplicate");
        assert!(matches!(err, Error::InvalidDescriptor { .. }));
    }

    #[test]
    fn scalars_bind_to_first_required_parameter() {
        let descriptor = ToolDescriptor::builder("calculate", "Evaluate arithmetic")
            .parameter(ParameterSpec::optional("precision", ParamType::Integer))
            .parameter(ParameterSpec::required("expression", ParamType::String))
            .build()
            .unwrap();
        let bound = descriptor.bind_arguments(json!("2 + 2"));
        assert_eq!(bound.get("expression"), Some(&json!("2 + 2")));
        assert!(descriptor.bind_arguments(Value::Null).is_empty());

        let bare = ToolDescriptor::builder("get_current_time", "Now").build().unwrap();
        assert!(bare.bind_arguments(json!("ignored")).is_empty());
    }

    #[test]
    fn integer_accepts_integral_floats() {
        assert!(ParamType::Integer.matches(&json!(3)));
        assert!(ParamType::Integer.matches(&json!(3.0)));
        assert!(!ParamType::Integer.matches(&json!(3.5)));
        assert!(!ParamType::String.matches(&json!(3)));
    }
}
