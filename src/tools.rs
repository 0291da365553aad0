//! Tool Port: a uniform descriptor + validate + execute contract the engine
//! dispatches through, plus a process-wide registry tools are looked up in.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::types::ToolDescriptor;

/// Output of a tool's `execute`.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send>> + Send + Sync>;

/// A single registered tool: its advertised shape plus the handler the
/// engine invokes. The engine — not the tool — decides when `execute` runs.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: convert_schema_to_json_schema(schema),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Check `input` against the tool's schema: every property in the
    /// schema's `required` array must be present. This is a structural
    /// check, not a full JSON Schema validator — types aren't checked,
    /// matching the depth of validation the schema-generation side offers.
    pub fn validate(&self, input: &Value) -> Result<()> {
        let Some(schema) = self.input_schema.as_object() else {
            return Ok(());
        };
        let Some(required) = schema.get("required").and_then(Value::as_array) else {
            return Ok(());
        };
        let provided = input.as_object();
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            let present = provided
                .map(|obj| obj.contains_key(field_name))
                .unwrap_or(false);
            if !present {
                return Err(Error::validation(format!(
                    "missing required field: {field_name}"
                )));
            }
        }
        Ok(())
    }

    pub async fn execute(&self, input: Value) -> Result<ToolOutput> {
        (self.handler)(input).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Process-wide, read-mostly tool lookup. Registration happens at startup;
/// concurrent reads during a run are safe, concurrent registration during a
/// run is undefined (per the concurrency model).
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Tool) {
        self.tools
            .write()
            .unwrap()
            .insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .unwrap()
            .values()
            .map(|t| t.descriptor())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// SCHEMA HELPERS
// ============================================================================

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str.to_lowercase().as_str() {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({ "type": json_type })
}

/// Accepts either a full JSON Schema object (passed through) or the
/// simplified notation: `{ "field": "type" }` or
/// `{ "field": { "type": "...", "optional": bool, "default": ... } }`.
fn convert_schema_to_json_schema(schema: Value) -> Value {
    if let Some(obj) = schema.as_object() {
        if obj.contains_key("type") && obj.contains_key("properties") {
            return schema;
        }
    }

    let mut properties = Map::new();
    let mut required = Vec::new();

    if let Some(obj) = schema.as_object() {
        for (name, value) in obj {
            match value {
                Value::String(type_str) => {
                    properties.insert(name.clone(), type_to_json_schema(type_str));
                    required.push(Value::String(name.clone()));
                }
                Value::Object(field_obj) => {
                    let mut field_obj = field_obj.clone();
                    let is_optional = field_obj
                        .remove("optional")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    let explicit_required = field_obj
                        .remove("required")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(!is_optional);
                    let has_default = field_obj.contains_key("default");

                    if let Some(type_str) = field_obj.get("type").and_then(Value::as_str) {
                        field_obj.insert("type".into(), type_to_json_schema(type_str)["type"].clone());
                    }

                    if explicit_required && !has_default && !is_optional {
                        required.push(Value::String(name.clone()));
                    }
                    properties.insert(name.clone(), Value::Object(field_obj));
                }
                _ => {}
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Builder for simple tools; `.param()` accumulates simplified-notation
/// fields, `.schema()` takes over with a full JSON Schema.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn param(mut self, name: impl Into<String>, type_str: impl Into<String>) -> Self {
        if !self.schema.is_object() || self.schema.as_object().unwrap().contains_key("type") {
            self.schema = Value::Object(Map::new());
        }
        self.schema
            .as_object_mut()
            .unwrap()
            .insert(name.into(), Value::String(type_str.into()));
        self
    }

    pub fn build(self, handler: ToolHandler) -> Tool {
        Tool::new(self.name, self.description, self.schema, handler)
    }
}

pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder {
        name: name.into(),
        description: description.into(),
        schema: Value::Object(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> ToolHandler {
        Arc::new(|input: Value| {
            Box::pin(async move { Ok(ToolOutput::ok(input.to_string())) })
        })
    }

    #[test]
    fn test_type_conversion() {
        assert_eq!(type_to_json_schema("string")["type"], "string");
        assert_eq!(type_to_json_schema("int")["type"], "integer");
        assert_eq!(type_to_json_schema("unknown")["type"], "string");
    }

    #[test]
    fn test_simple_schema_conversion() {
        let schema = serde_json::json!({ "path": "string", "recursive": "bool" });
        let converted = convert_schema_to_json_schema(schema);
        assert_eq!(converted["type"], "object");
        assert_eq!(converted["properties"]["path"]["type"], "string");
        assert!(
            converted["required"]
                .as_array()
                .unwrap()
                .contains(&Value::String("path".into()))
        );
    }

    #[test]
    fn test_full_schema_passthrough() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "x": { "type": "number" } },
            "required": ["x"]
        });
        let converted = convert_schema_to_json_schema(schema.clone());
        assert_eq!(converted, schema);
    }

    #[test]
    fn test_validate_missing_required_field() {
        let t = tool("read", "reads a file")
            .param("path", "string")
            .build(echo_handler());
        assert!(t.validate(&serde_json::json!({})).is_err());
        assert!(t.validate(&serde_json::json!({"path": "a.txt"})).is_ok());
    }

    #[tokio::test]
    async fn test_tool_execute() {
        let t = tool("echo", "echoes input").build(echo_handler());
        let output = t.execute(serde_json::json!({"a": 1})).await.unwrap();
        assert!(!output.is_error);
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(tool("echo", "echoes input").build(echo_handler()));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_descriptors() {
        let registry = ToolRegistry::new();
        registry.register(
            tool("read", "reads a file")
                .param("path", "string")
                .build(echo_handler()),
        );
        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "read");
    }
}
