//! Common test utilities for toolbridge integration tests.
//!
//! Provides `TestApi`, an in-memory `RequestHandler` stub backed by a small
//! fixed route table, plus a minimal petstore-shaped OpenAPI document to
//! drive `search`.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use toolbridge::bridge::{HandlerRequest, HandlerResponse, RequestHandler, ResponseBody};
use toolbridge::orchestrator::{Orchestrator, OrchestratorConfig, SpecSource};

/// One registered route: replies with a fixed status/body whenever a request
/// matches `method` + `path` exactly (query strings are ignored).
#[derive(Clone)]
pub struct Route {
    pub method: &'static str,
    pub path: &'static str,
    pub status: u16,
    pub body: Value,
}

/// An in-memory stand-in for an embedder's HTTP handler. Records every
/// request it receives so tests can assert on headers/bodies actually sent.
pub struct TestApi {
    pub orchestrator: Orchestrator,
    pub received: Arc<Mutex<Vec<HandlerRequest>>>,
}

impl TestApi {
    /// Builds an orchestrator wired to `routes`, with `spec` as the raw
    /// OpenAPI document and `namespace` as the `execute` binding name.
    pub fn new(spec: Value, namespace: &str, routes: Vec<Route>) -> Self {
        Self::with_max_requests(spec, namespace, routes, 50)
    }

    /// Like [`TestApi::new`], with an explicit per-execution request cap.
    pub fn with_max_requests(
        spec: Value,
        namespace: &str,
        routes: Vec<Route>,
        max_requests: u32,
    ) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler = make_handler(Arc::clone(&received), routes);

        let mut config = OrchestratorConfig::new(SpecSource::Value(spec), handler);
        config.namespace = namespace.to_string();
        config.max_requests = max_requests;

        Self {
            orchestrator: Orchestrator::new(config).expect("valid namespace"),
            received,
        }
    }

    pub fn request_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

fn make_handler(received: Arc<Mutex<Vec<HandlerRequest>>>, routes: Vec<Route>) -> RequestHandler {
    let routes: HashMap<(String, String), (u16, Value)> = routes
        .into_iter()
        .map(|r| {
            (
                (r.method.to_string(), r.path.to_string()),
                (r.status, r.body),
            )
        })
        .collect();

    Arc::new(move |request: HandlerRequest| {
        received.lock().unwrap().push(HandlerRequest {
            url: request.url.clone(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });

        let path = request
            .url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| format!("/{path}"))
            .unwrap_or(request.url.clone());
        let path = path.split('?').next().unwrap_or(&path).to_string();

        let routes = routes.clone();
        Box::pin(async move {
            match routes.get(&(request.method.clone(), path.clone())) {
                Some((status, body)) => Ok(HandlerResponse {
                    status: *status,
                    headers: vec![("content-type".to_string(), "application/json".to_string())],
                    body: ResponseBody::Text(body.to_string()),
                }),
                None => Ok(HandlerResponse {
                    status: 404,
                    headers: vec![],
                    body: ResponseBody::Text(json!({"error": "not found"}).to_string()),
                }),
            }
        })
    })
}

/// A small petstore-shaped document with a `$ref`-resolved schema, enough to
/// exercise `search` end-to-end.
pub fn petstore_spec() -> Value {
    json!({
        "paths": {
            "/pets": {
                "get": {
                    "tags": ["pets"],
                    "summary": "List pets",
                    "responses": {
                        "200": { "description": "ok", "content": { "application/json": {
                            "schema": { "$ref": "#/components/schemas/PetList" }
                        }}}
                    }
                },
                "post": {
                    "tags": ["pets"],
                    "summary": "Create a pet",
                    "requestBody": {
                        "content": { "application/json": {
                            "schema": { "$ref": "#/components/schemas/Pet" }
                        }}
                    }
                }
            },
            "/pets/{id}": {
                "get": {
                    "tags": ["pets"],
                    "summary": "Get a pet by id",
                    "parameters": [{"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}]
                }
            }
        },
        "components": {
            "schemas": {
                "Pet": { "type": "object", "properties": { "name": { "type": "string" } } },
                "PetList": { "type": "array", "items": { "$ref": "#/components/schemas/Pet" } }
            }
        }
    })
}
