//! Tool Surface: the two MCP tool descriptors an [`crate::orchestrator::Orchestrator`]
//! exposes, and the small wire types `mcp` adapts to `rmcp`'s own.

use crate::spec::SpecContext;
use serde_json::{json, Value};

/// A tool as advertised to the agent, independent of any specific transport.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One piece of a [`ToolResult`]. Only plain text is produced by this crate.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text(String),
}

/// The outcome of one tool call, transport-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolResult {
    #[must_use]
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: true,
        }
    }
}

/// The JSON Schema shared by both tools: a single required `code` string
/// holding the body of an `async () => { ... }` function.
fn code_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": "JavaScript source for an async, zero-argument function: `async () => { ... }` or `async function() { ... }`. The function's return value (or thrown error) becomes the tool result."
            }
        },
        "required": ["code"],
        "additionalProperties": false
    })
}

pub fn build_search_tool(name: &str, context: Option<&SpecContext>) -> ToolDescriptor {
    let description = match context {
        Some(context) if !context.tags.is_empty() => format!(
            "Explore the API surface by running JavaScript against the fully-dereferenced \
             OpenAPI document, available as the `spec` global (`spec.paths` maps each path to \
             its HTTP methods). Covers {} endpoint(s) across the following tags, ordered by \
             frequency: {}. Use this before `execute` to find the right path, method, and \
             parameter shape.",
            context.endpoint_count,
            context.tags.join(", ")
        ),
        Some(context) => format!(
            "Explore the API surface by running JavaScript against the fully-dereferenced \
             OpenAPI document, available as the `spec` global (`spec.paths` maps each path to \
             its HTTP methods). Covers {} endpoint(s). Use this before `execute` to find the \
             right path, method, and parameter shape.",
            context.endpoint_count
        ),
        None => "Explore the API surface by running JavaScript against the fully-dereferenced \
             OpenAPI document, available as the `spec` global (`spec.paths` maps each path to \
             its HTTP methods). Use this before `execute` to find the right path, method, and \
             parameter shape."
            .to_string(),
    };

    ToolDescriptor {
        name: name.to_string(),
        description,
        input_schema: code_input_schema(),
    }
}

pub fn build_execute_tool(name: &str, namespace: &str) -> ToolDescriptor {
    let description = format!(
        "Run JavaScript that calls the live API through `await {namespace}.request({{ method, \
         path, query, body, headers }})`, which returns `{{ status, headers, body }}`. Only \
         relative paths are allowed; full URLs are rejected. Use `search` first to learn the \
         available paths and shapes.",
    );

    ToolDescriptor {
        name: name.to_string(),
        description,
        input_schema: code_input_schema(),
    }
}
