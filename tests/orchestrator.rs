//! End-to-end tests for the orchestrator: search against a processed spec,
//! execute against an in-memory API stub, and the egress guarantees that
//! only `execute`'s request bridge (not raw sandbox code) can enforce.

mod common;

use common::{petstore_spec, Route, TestApi};
use serde_json::json;
use toolbridge::tools::ToolContent;

fn text_of(result: &toolbridge::tools::ToolResult) -> String {
    result
        .content
        .iter()
        .map(|c| match c {
            ToolContent::Text(text) => text.as_str(),
        })
        .collect()
}

#[tokio::test]
async fn search_sees_dereferenced_schema_not_raw_ref() {
    let api = TestApi::new(petstore_spec(), "api", vec![]);
    let result = api
        .orchestrator
        .search("async () => spec.paths['/pets'].post.requestBody.content['application/json'].schema".to_string())
        .await;

    assert!(!result.is_error, "{result:?}");
    let text = text_of(&result);
    assert!(text.contains("\"properties\""));
    assert!(!text.contains("$ref"));
}

#[tokio::test]
async fn search_tags_reflect_spec_context() {
    let api = TestApi::new(petstore_spec(), "api", vec![]);
    // tool descriptions are enriched from the spec once it has been
    // resolved; a `search` call (or `list_tools` after one) warms the cache.
    let warm_up = api.orchestrator.search("async () => 1".to_string()).await;
    assert!(!warm_up.is_error, "{warm_up:?}");

    let tools = api.orchestrator.tools().await;
    let search_tool = tools.iter().find(|t| t.name == "search").unwrap();
    assert!(search_tool.description.contains("pets"));
}

#[tokio::test]
async fn execute_reaches_the_stub_api_and_returns_its_body() {
    let api = TestApi::new(
        petstore_spec(),
        "api",
        vec![Route {
            method: "GET",
            path: "/pets",
            status: 200,
            body: json!([{"name": "fido"}]),
        }],
    );

    let result = api
        .orchestrator
        .execute(
            "async () => (await api.request({ method: 'GET', path: '/pets' })).body".to_string(),
        )
        .await;

    assert!(!result.is_error, "{result:?}");
    assert_eq!(api.request_count(), 1);
}

#[tokio::test]
async fn execute_rejects_absolute_url_before_reaching_the_stub() {
    let api = TestApi::new(petstore_spec(), "api", vec![]);
    let result = api
        .orchestrator
        .execute(
            "async () => await api.request({ method: 'GET', path: 'http://evil.example/x' })"
                .to_string(),
        )
        .await;

    assert!(result.is_error);
    assert_eq!(api.request_count(), 0, "bridge must reject before dispatch");
}

#[tokio::test]
async fn execute_enforces_request_count_cap_per_call() {
    let api = TestApi::with_max_requests(
        petstore_spec(),
        "api",
        vec![Route {
            method: "GET",
            path: "/pets",
            status: 200,
            body: json!([]),
        }],
        2,
    );

    let code = "async () => { \
        for (let i = 0; i < 3; i++) { await api.request({ method: 'GET', path: '/pets' }); } \
        return 'done'; \
    }";
    let result = api.orchestrator.execute(code.to_string()).await;
    assert!(result.is_error);
}

#[tokio::test]
async fn sandbox_state_does_not_leak_between_execute_calls() {
    let api = TestApi::new(petstore_spec(), "api", vec![]);

    let first = api
        .orchestrator
        .execute("async () => { globalThis.counter = 1; return 'ok'; }".to_string())
        .await;
    assert!(!first.is_error);

    let second = api
        .orchestrator
        .execute("async () => typeof globalThis.counter".to_string())
        .await;
    assert!(!second.is_error);
}

#[tokio::test]
async fn call_tool_dispatches_to_configured_names() {
    let api = TestApi::new(petstore_spec(), "api", vec![]);
    api.orchestrator
        .set_tool_names("find_endpoints", "call_endpoint")
        .await;

    let result = api
        .orchestrator
        .call_tool("find_endpoints", "async () => 1".to_string())
        .await;
    assert!(!result.is_error, "{result:?}");

    let result = api
        .orchestrator
        .call_tool("search", "async () => 1".to_string())
        .await;
    assert!(result.is_error, "old tool name should no longer resolve");
}
