//! MCP Transport Adapter: exposes an [`Orchestrator`] over `rmcp`'s stdio
//! JSON-RPC transport. The two tools it advertises are not known at compile
//! time — their names and descriptions are derived from the orchestrator's
//! configuration and spec context — so this is a manual `ServerHandler` impl
//! rather than the `#[tool_router]`/`#[tool]` macro pattern used for a fixed
//! tool set.

use crate::orchestrator::Orchestrator;
use crate::tools::{ToolContent, ToolDescriptor, ToolResult as BridgeToolResult};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    LoggingLevel, LoggingMessageNotification, LoggingMessageNotificationParam,
    PaginatedRequestParams, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};
use std::borrow::Cow;
use std::sync::Arc;

/// Adapts an [`Orchestrator`]'s two-tool surface to `rmcp`'s `ServerHandler`.
#[derive(Clone)]
pub struct ToolBridgeServer {
    orchestrator: Arc<Orchestrator>,
}

impl ToolBridgeServer {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    async fn tool_list(&self) -> Vec<Tool> {
        self.orchestrator
            .tools()
            .await
            .into_iter()
            .map(to_rmcp_tool)
            .collect()
    }
}

fn to_rmcp_tool(descriptor: ToolDescriptor) -> Tool {
    let schema = match descriptor.input_schema {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Tool {
        name: Cow::Owned(descriptor.name),
        title: None,
        description: Some(Cow::Owned(descriptor.description)),
        input_schema: Arc::new(schema),
        output_schema: None,
        annotations: None,
        execution: None,
        icons: None,
        meta: None,
    }
}

fn to_call_tool_result(result: BridgeToolResult) -> CallToolResult {
    let content = result
        .content
        .into_iter()
        .map(|c| match c {
            ToolContent::Text(text) => Content::text(text),
        })
        .collect();
    if result.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

fn extract_code(request: &CallToolRequestParams) -> Result<String, rmcp::ErrorData> {
    let arguments = request
        .arguments
        .as_ref()
        .ok_or_else(|| rmcp::ErrorData::invalid_params("missing arguments", None))?;
    match arguments.get("code") {
        Some(serde_json::Value::String(code)) => Ok(code.clone()),
        _ => Err(rmcp::ErrorData::invalid_params(
            "`code` argument must be a string",
            None,
        )),
    }
}

impl ServerHandler for ToolBridgeServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = "toolbridge: a two-tool interface onto a REST API described by an \
             OpenAPI document.\n\n\
             WORKFLOW:\n\
             1. search -> run JavaScript against the `spec` global to find the path, method, \
                and parameter shape you need.\n\
             2. execute -> run JavaScript that calls `await <namespace>.request({ method, \
                path, query, body, headers })` to make the actual call.\n\n\
             Each call runs one async function body in a fresh, isolated sandbox: no state \
             (variables, globals) survives between calls, so pass everything you need through \
             the code string itself. `execute` enforces a per-call request count cap, rejects \
             absolute URLs and scheme-qualified paths, and strips credential-bearing headers \
             (Authorization, Cookie, Host, and similar) that sandboxed code cannot forward."
            .to_string();

        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            server_info: Implementation {
                name: "toolbridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_logging()
                .build(),
            instructions: Some(instructions),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::ErrorData> {
        Ok(ListToolsResult {
            tools: self.tool_list().await,
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let tool_name = request.name.to_string();
        let code = extract_code(&request)?;
        let peer = context.peer.clone();

        let result = self.orchestrator.call_tool(&tool_name, code).await;

        if result.is_error {
            let _ = peer
                .send_notification(
                    LoggingMessageNotification::new(LoggingMessageNotificationParam {
                        level: LoggingLevel::Warning,
                        logger: Some("toolbridge".to_string()),
                        data: serde_json::json!({ "tool": tool_name, "error": true }),
                    })
                    .into(),
                )
                .await;
        }

        Ok(to_call_tool_result(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{HandlerRequest, HandlerResponse, ResponseBody};
    use crate::orchestrator::{OrchestratorConfig, SpecSource};
    use futures::future::BoxFuture;

    fn stub_handler() -> crate::bridge::RequestHandler {
        Arc::new(|_req: HandlerRequest| -> BoxFuture<'static, Result<HandlerResponse, String>> {
            Box::pin(async {
                Ok(HandlerResponse {
                    status: 200,
                    headers: vec![],
                    body: ResponseBody::Text("{}".to_string()),
                })
            })
        })
    }

    fn server() -> ToolBridgeServer {
        let config = OrchestratorConfig::new(
            SpecSource::Value(serde_json::json!({ "paths": {} })),
            stub_handler(),
        );
        let orchestrator = Arc::new(Orchestrator::new(config).unwrap());
        ToolBridgeServer::new(orchestrator)
    }

    #[tokio::test]
    async fn lists_search_and_execute_tools() {
        let server = server();
        let tools = server.tool_list().await;
        let names: Vec<String> = tools.iter().map(|t| t.name.to_string()).collect();
        assert!(names.contains(&"search".to_string()));
        assert!(names.contains(&"execute".to_string()));
    }

    #[test]
    fn extract_code_rejects_missing_arguments() {
        let request = CallToolRequestParams {
            meta: None,
            name: Cow::Borrowed("search"),
            arguments: None,
            task: None,
        };
        assert!(extract_code(&request).is_err());
    }

    #[test]
    fn extract_code_rejects_non_string_code() {
        let mut args = serde_json::Map::new();
        args.insert("code".to_string(), serde_json::json!(42));
        let request = CallToolRequestParams {
            meta: None,
            name: Cow::Borrowed("search"),
            arguments: Some(args),
            task: None,
        };
        assert!(extract_code(&request).is_err());
    }

    #[test]
    fn extract_code_accepts_string_code() {
        let mut args = serde_json::Map::new();
        args.insert("code".to_string(), serde_json::json!("async () => 1"));
        let request = CallToolRequestParams {
            meta: None,
            name: Cow::Borrowed("search"),
            arguments: Some(args),
            task: None,
        };
        assert_eq!(extract_code(&request).unwrap(), "async () => 1");
    }
}
