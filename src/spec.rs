//! Spec Processor: dereferences and flattens an OpenAPI document once per
//! orchestrator instance so agent `search` code sees a fully resolved tree.

use crate::error::SpecError;
use crate::types::AncestorChain;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Keys that must never be copied while walking an untrusted JSON tree —
/// prototype-pollution defence for any downstream JS consumer of the result.
const UNSAFE_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

const HTTP_METHODS: [&str; 5] = ["get", "post", "put", "patch", "delete"];

/// A single HTTP operation with every `$ref` in its shape resolved inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedOperation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(rename = "requestBody", skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses: Option<Value>,
}

/// The flattened OpenAPI document. Serialises to exactly `{ "paths": { ... } }`;
/// `info`, `servers`, and `components` are omitted because everything has
/// been inlined into each operation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessedSpec {
    pub paths: HashMap<String, HashMap<String, ProcessedOperation>>,
}

/// Summary data derived once from a `ProcessedSpec`, used only to enrich the
/// `search` tool's description.
#[derive(Debug, Clone)]
pub struct SpecContext {
    pub tags: Vec<String>,
    pub endpoint_count: usize,
}

/// Cross-branch memoisation cache for `resolve_refs`. Keyed by the raw
/// `$ref` pointer string. Distinct from `AncestorChain`, which tracks the
/// current recursion branch rather than global completion.
type RefMemo = HashMap<String, Value>;

/// Dereferences and flattens `doc` into a `ProcessedSpec`.
///
/// Iterates `doc.paths`, computing `full_path = base_path + path`, and for
/// each HTTP method present on a path item, copies `summary`/`description`/
/// `tags` verbatim and resolves `parameters`/`requestBody`/`responses`
/// independently through [`resolve_refs`], sharing one memo across the
/// whole call.
pub fn process_spec(doc: &Value, max_ref_depth: usize) -> Result<ProcessedSpec, SpecError> {
    let root = doc.as_object().ok_or_else(|| {
        tracing::warn!(code = SpecError::NotAnObject.code(), "spec document root is not an object");
        SpecError::NotAnObject
    })?;
    let base_path = extract_server_base_path(doc);

    let mut memo = RefMemo::new();
    let mut paths: HashMap<String, HashMap<String, ProcessedOperation>> = HashMap::new();

    let Some(doc_paths) = root.get("paths").and_then(Value::as_object) else {
        return Ok(ProcessedSpec::default());
    };

    for (path, item) in doc_paths {
        let Some(item_obj) = item.as_object() else {
            continue;
        };
        let full_path = format!("{base_path}{path}");
        let mut methods = HashMap::new();

        for method in HTTP_METHODS {
            let Some(op) = item_obj.get(method) else {
                continue;
            };
            let op_obj = op.as_object();
            let ancestors = AncestorChain::new();

            let resolve_field = |key: &str, memo: &mut RefMemo| -> Option<Value> {
                op_obj
                    .and_then(|o| o.get(key))
                    .map(|v| resolve_refs(v, doc, &ancestors, max_ref_depth, memo))
            };

            let operation = ProcessedOperation {
                summary: op_obj.and_then(|o| o.get("summary")).cloned(),
                description: op_obj.and_then(|o| o.get("description")).cloned(),
                tags: op_obj.and_then(|o| o.get("tags")).cloned(),
                parameters: resolve_field("parameters", &mut memo),
                request_body: resolve_field("requestBody", &mut memo),
                responses: resolve_field("responses", &mut memo),
            };
            methods.insert(method.to_string(), operation);
        }

        if !methods.is_empty() {
            paths.insert(full_path, methods);
        }
    }

    tracing::debug!(endpoints = paths.len(), refs_cached = memo.len(), "spec dereferenced and flattened");
    Ok(ProcessedSpec { paths })
}

/// Pure recursive `$ref`-resolving walk over a JSON tree.
///
/// Ancestor chains are cloned and extended per `$ref` branch, never shared
/// across siblings — two sibling refs to the same target both resolve in
/// full rather than one poisoning the other as a false circular reference.
/// `memo` is shared across the whole call and caches by ref pointer so
/// repeated non-cyclic refs are only walked once.
pub fn resolve_refs(
    node: &Value,
    root: &Value,
    ancestors: &AncestorChain,
    max_ref_depth: usize,
    memo: &mut RefMemo,
) -> Value {
    match node {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_refs(item, root, ancestors, max_ref_depth, memo))
                .collect(),
        ),
        Value::Object(obj) => {
            if let Some(Value::String(ref_ptr)) = obj.get("$ref") {
                return resolve_ref_pointer(ref_ptr, root, ancestors, max_ref_depth, memo);
            }

            let mut out = Map::with_capacity(obj.len());
            for (key, value) in obj {
                if UNSAFE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(
                    key.clone(),
                    resolve_refs(value, root, ancestors, max_ref_depth, memo),
                );
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn resolve_ref_pointer(
    ref_ptr: &str,
    root: &Value,
    ancestors: &AncestorChain,
    max_ref_depth: usize,
    memo: &mut RefMemo,
) -> Value {
    if ancestors.contains(ref_ptr) {
        return serde_json::json!({ "$circular": ref_ptr });
    }
    if ancestors.len() == max_ref_depth {
        return serde_json::json!({ "$circular": ref_ptr, "$reason": "max depth exceeded" });
    }
    if let Some(cached) = memo.get(ref_ptr) {
        return cached.clone();
    }

    let Some(pointer_path) = ref_ptr.strip_prefix("#/") else {
        return serde_json::json!({ "$ref": ref_ptr, "$error": "unsupported ref target" });
    };

    let mut target = root;
    for segment in pointer_path.split('/') {
        if UNSAFE_KEYS.contains(&segment) {
            return serde_json::json!({ "$ref": ref_ptr, "$error": "unsafe ref path" });
        }
        let decoded = segment.replace("~1", "/").replace("~0", "~");
        match target {
            Value::Object(obj) => match obj.get(&decoded) {
                Some(next) => target = next,
                None => {
                    return serde_json::json!({ "$ref": ref_ptr, "$error": "ref target not found" })
                }
            },
            Value::Array(arr) => match decoded.parse::<usize>().ok().and_then(|i| arr.get(i)) {
                Some(next) => target = next,
                None => {
                    return serde_json::json!({ "$ref": ref_ptr, "$error": "ref target not found" })
                }
            },
            _ => return serde_json::json!({ "$ref": ref_ptr, "$error": "ref target not found" }),
        }
    }

    let branch_ancestors = ancestors.extended(ref_ptr);
    let resolved = resolve_refs(target, root, &branch_ancestors, max_ref_depth, memo);
    memo.insert(ref_ptr.to_string(), resolved.clone());
    resolved
}

/// Scans every operation of every path item, counting tag occurrences, and
/// returns tags sorted by descending frequency (ties broken by order of
/// first sighting).
pub fn extract_tags(doc: &Value) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();

    if let Some(paths) = doc.get("paths").and_then(Value::as_object) {
        for item in paths.values() {
            let Some(item_obj) = item.as_object() else {
                continue;
            };
            for method in HTTP_METHODS {
                let Some(tags) = item_obj
                    .get(method)
                    .and_then(|op| op.get("tags"))
                    .and_then(Value::as_array)
                else {
                    continue;
                };
                for tag in tags.iter().filter_map(Value::as_str) {
                    if !counts.contains_key(tag) {
                        first_seen.push(tag.to_string());
                    }
                    *counts.entry(tag.to_string()).or_insert(0) += 1;
                }
            }
        }
    }

    first_seen.sort_by(|a, b| counts[b].cmp(&counts[a]));
    first_seen
}

/// Returns the pathname portion of `doc.servers[0].url`, trailing slashes
/// stripped; `""` if absent or the URL has no path.
pub fn extract_server_base_path(doc: &Value) -> String {
    let Some(url) = doc
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
    else {
        return String::new();
    };

    // Strip a scheme+authority prefix if present; otherwise treat the whole
    // value as a path already.
    let path_start = url
        .find("://")
        .and_then(|scheme_end| url[scheme_end + 3..].find('/').map(|i| scheme_end + 3 + i));

    let path = match path_start {
        Some(idx) => &url[idx..],
        None if url.starts_with('/') => url,
        None => "",
    };

    path.trim_end_matches('/').to_string()
}

/// Derives a [`SpecContext`] from a processed spec and the original document
/// (tags are computed from the original document since `ProcessedSpec`
/// stores tags per-operation rather than as a deduplicated document-level
/// list).
pub fn build_spec_context(processed: &ProcessedSpec, doc: &Value) -> SpecContext {
    let endpoint_count = processed.paths.values().map(HashMap::len).sum();
    SpecContext {
        tags: extract_tags(doc),
        endpoint_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_tags_by_descending_frequency() {
        let doc = json!({
            "paths": {
                "/a": { "get": { "tags": ["pets"] } },
                "/b": { "get": { "tags": ["pets", "store"] }, "post": { "tags": ["store"] } },
                "/c": { "get": { "tags": ["users"] } }
            }
        });
        assert_eq!(extract_tags(&doc), vec!["store", "pets", "users"]);
    }

    #[test]
    fn server_base_path_strips_scheme_and_trailing_slash() {
        let doc = json!({ "servers": [{ "url": "https://api.example.com/v1/" }] });
        assert_eq!(extract_server_base_path(&doc), "/v1");
    }

    #[test]
    fn server_base_path_empty_when_no_servers() {
        let doc = json!({});
        assert_eq!(extract_server_base_path(&doc), "");
    }

    #[test]
    fn resolves_simple_ref() {
        let doc = json!({
            "components": { "schemas": { "Pet": { "type": "object" } } }
        });
        let mut memo = RefMemo::new();
        let node = json!({ "$ref": "#/components/schemas/Pet" });
        let resolved = resolve_refs(&node, &doc, &AncestorChain::new(), 50, &mut memo);
        assert_eq!(resolved, json!({ "type": "object" }));
    }

    #[test]
    fn circular_schema_via_object_property_is_marked() {
        let doc = json!({
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": { "next": { "$ref": "#/components/schemas/Node" } }
                    }
                }
            }
        });
        let mut memo = RefMemo::new();
        let node = json!({ "$ref": "#/components/schemas/Node" });
        let resolved = resolve_refs(&node, &doc, &AncestorChain::new(), 50, &mut memo);
        assert_eq!(
            resolved["properties"]["next"],
            json!({ "$circular": "#/components/schemas/Node" })
        );
    }

    #[test]
    fn circular_schema_via_array_items_is_marked() {
        let doc = json!({
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": {
                            "children": { "type": "array", "items": { "$ref": "#/components/schemas/Node" } }
                        }
                    }
                }
            }
        });
        let mut memo = RefMemo::new();
        let node = json!({ "$ref": "#/components/schemas/Node" });
        let resolved = resolve_refs(&node, &doc, &AncestorChain::new(), 50, &mut memo);
        assert_eq!(
            resolved["properties"]["children"]["items"],
            json!({ "$circular": "#/components/schemas/Node" })
        );
    }

    #[test]
    fn sibling_refs_to_same_target_both_resolve_fully() {
        let doc = json!({
            "components": {
                "schemas": {
                    "Leaf": { "type": "string" },
                    "Pair": {
                        "type": "object",
                        "properties": {
                            "left": { "$ref": "#/components/schemas/Leaf" },
                            "right": { "$ref": "#/components/schemas/Leaf" }
                        }
                    }
                }
            }
        });
        let mut memo = RefMemo::new();
        let node = json!({ "$ref": "#/components/schemas/Pair" });
        let resolved = resolve_refs(&node, &doc, &AncestorChain::new(), 50, &mut memo);
        assert_eq!(resolved["properties"]["left"], json!({ "type": "string" }));
        assert_eq!(resolved["properties"]["right"], json!({ "type": "string" }));
    }

    #[test]
    fn max_depth_exceeded_marks_circular_with_reason() {
        let doc = json!({
            "components": {
                "schemas": {
                    "A": { "$ref": "#/components/schemas/B" },
                    "B": { "$ref": "#/components/schemas/A" }
                }
            }
        });
        let mut memo = RefMemo::new();
        let node = json!({ "$ref": "#/components/schemas/A" });
        let resolved = resolve_refs(&node, &doc, &AncestorChain::new(), 3, &mut memo);
        // Walks A -> B -> A -> B ... until depth cap; assert it terminates
        // and reports a reason rather than infinite-looping or panicking.
        let has_reason = resolved.get("$reason").is_some() || resolved.get("$circular").is_some();
        assert!(has_reason);
    }

    #[test]
    fn unsafe_ref_path_segment_is_rejected() {
        let doc = json!({ "__proto__": { "polluted": true } });
        let mut memo = RefMemo::new();
        let node = json!({ "$ref": "#/__proto__/polluted" });
        let resolved = resolve_refs(&node, &doc, &AncestorChain::new(), 50, &mut memo);
        assert_eq!(resolved["$error"], json!("unsafe ref path"));
    }

    #[test]
    fn unsafe_keys_are_skipped_during_plain_object_copy() {
        let doc = json!({});
        let mut memo = RefMemo::new();
        let node = json!({ "safe": 1, "__proto__": { "polluted": true }, "constructor": "x" });
        let resolved = resolve_refs(&node, &doc, &AncestorChain::new(), 50, &mut memo);
        assert_eq!(resolved, json!({ "safe": 1 }));
    }

    #[test]
    fn process_spec_prepends_server_base_path() {
        let doc = json!({
            "servers": [{ "url": "https://api.example.com/v1" }],
            "paths": {
                "/pets": { "get": { "summary": "list pets" } }
            }
        });
        let processed = process_spec(&doc, 50).unwrap();
        assert!(processed.paths.contains_key("/v1/pets"));
    }

    #[test]
    fn process_spec_discards_path_item_level_keys() {
        let doc = json!({
            "paths": {
                "/pets": {
                    "parameters": [{ "name": "shared", "in": "query" }],
                    "get": { "summary": "list pets" }
                }
            }
        });
        let processed = process_spec(&doc, 50).unwrap();
        let methods = &processed.paths["/pets"];
        assert_eq!(methods.len(), 1);
        assert!(methods.contains_key("get"));
    }

    #[test]
    fn process_spec_empty_paths() {
        let doc = json!({ "paths": {} });
        let processed = process_spec(&doc, 50).unwrap();
        assert!(processed.paths.is_empty());
    }

    #[test]
    fn process_spec_rejects_non_object_document() {
        let doc = json!("not an object");
        assert!(matches!(process_spec(&doc, 50), Err(SpecError::NotAnObject)));
    }

    #[test]
    fn process_spec_is_idempotent_on_ref_free_output() {
        let doc = json!({
            "paths": { "/pets": { "get": { "summary": "list pets" } } }
        });
        let processed = process_spec(&doc, 50).unwrap();
        let as_value = serde_json::to_value(&processed).unwrap();
        let rewrapped = json!({ "paths": as_value["paths"] });
        let reprocessed = process_spec(&rewrapped, 50).unwrap();
        assert_eq!(
            serde_json::to_value(&processed).unwrap(),
            serde_json::to_value(&reprocessed).unwrap()
        );
    }

    #[test]
    fn build_spec_context_counts_endpoints_and_tags() {
        let doc = json!({
            "paths": {
                "/pets": { "get": { "tags": ["pets"] }, "post": { "tags": ["pets"] } },
                "/users": { "get": { "tags": ["users"] } }
            }
        });
        let processed = process_spec(&doc, 50).unwrap();
        let context = build_spec_context(&processed, &doc);
        assert_eq!(context.endpoint_count, 3);
        assert_eq!(context.tags, vec!["pets", "users"]);
    }
}
