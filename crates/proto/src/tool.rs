use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Absolute point in time; accepts relative phrases resolved by the router.
    Timestamp,
}

impl ParamType {
    /// JSON-schema type keyword for this parameter type.
    pub fn json_type(self) -> &'static str {
        match self {
            ParamType::String | ParamType::Timestamp => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    /// Returns whether `value` has the JSON shape this type requires.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::String | ParamType::Timestamp => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamType::Timestamp => write!(f, "timestamp"),
            other => write!(f, "{}", other.json_type()),
        }
    }
}

/// One declared tool argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
    /// Closed set of accepted string values, empty when unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    /// Element schema for array parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
}

impl ParamSpec {
    /// Declares a required parameter.
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: description.into(),
            allowed: Vec::new(),
            items: None,
        }
    }

    /// Declares an optional parameter.
    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    /// Restricts a string parameter to the given values.
    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Sets the element schema of an array parameter.
    pub fn with_items(mut self, items: Value) -> Self {
        self.items = Some(items);
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut prop = json!({
            "type": self.param_type.json_type(),
            "description": self.description,
        });
        if self.param_type == ParamType::Timestamp {
            prop["format"] = json!("date-time");
        }
        if !self.allowed.is_empty() {
            prop["enum"] = json!(self.allowed);
        }
        if self.param_type == ParamType::Array {
            prop["items"] = self.items.clone().unwrap_or_else(|| json!({}));
        }
        prop
    }
}

/// Declared contract of a tool: unique name, description, ordered parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolSchema {
    /// Creates a schema without parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Appends a parameter declaration, keeping declaration order.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Looks up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Renders the parameter list as a JSON-schema object for function calling.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.parameters {
            properties.insert(spec.name.clone(), spec.to_json_schema());
            if spec.required {
                required.push(Value::String(spec.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// A tool call selected by the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id for this call.
    pub id: String,
    /// Target tool name.
    pub name: String,
    /// Named arguments.
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Creates a tool call with a generated id.
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    /// Creates a tool call from a JSON object literal; non-objects yield no arguments.
    pub fn from_json(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(name, arguments)
    }
}

/// Outcome of one dispatched tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Associated tool call id.
    pub call_id: String,
    /// Tool name that produced this result.
    pub tool_name: String,
    /// Whether the handler completed its work.
    pub success: bool,
    /// Short human-readable outcome or error description.
    pub message: String,
    /// Structured result data (`null` on failure).
    pub payload: Value,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: true,
            message: message.into(),
            payload,
        }
    }

    /// Creates a failed tool result.
    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: false,
            message: error.into(),
            payload: Value::Null,
        }
    }
}
