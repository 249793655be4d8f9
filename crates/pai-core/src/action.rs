//! Action Request Parsing
//!
//! Extracts tool and resource requests from free-text model output.
//!
//! Two passes, results unioned with structural de-duplication:
//! 1. Marker pass: after each `Tool Request(s):` / `Request Resource(s):`
//!    marker, the first well-formed JSON value (object or array) up to the
//!    next marker is taken.
//! 2. Standalone pass: every well-formed JSON value in the whole text is
//!    walked, and each object with the strict shape `{"name": str, "args":
//!    {...}}` (tool) or `{"Name": str, ...}` (resource) is taken, however
//!    deeply it is wrapped.
//!
//! Brackets are paired in a single pass that understands JSON strings and
//! escapes, so nested or back-to-back objects are matched correctly.
//! Malformed fragments are skipped.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::AgentError;
use crate::resource::ResourceRequest;
use crate::tool::ToolCallRequest;

/// Introduces tool requests in model output
pub const TOOL_MARKER: &str = "Tool Request(s):";
/// Introduces resource requests in model output
pub const RESOURCE_MARKER: &str = "Request Resource(s):";

/// Requests found in one response, in discovery order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedActions {
    pub tools: Vec<ToolCallRequest>,
    pub resources: Vec<ResourceRequest>,
}

impl ParsedActions {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty()
    }

    fn push_tool(&mut self, request: ToolCallRequest) {
        if !self.tools.contains(&request) {
            tracing::debug!(tool = %request.name, "Parsed tool request");
            self.tools.push(request);
        }
    }

    fn push_resource(&mut self, request: ResourceRequest) {
        if !self.resources.contains(&request) {
            tracing::debug!(request = ?request.0, "Parsed resource request");
            self.resources.push(request);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Marker {
    Tool,
    Resource,
}

/// Parse a model response. Never fails.
pub fn parse_actions(text: &str) -> ParsedActions {
    let mut actions = ParsedActions::default();

    for (marker, region) in marker_regions(text) {
        let Some(value) = first_json_value(region) else {
            tracing::warn!(marker = ?marker, "Marker without a well-formed JSON request");
            continue;
        };
        match marker {
            Marker::Tool => {
                for item in objects(value) {
                    if let Some(request) = marked_tool(item) {
                        actions.push_tool(request);
                    }
                }
            }
            Marker::Resource => {
                for item in objects(value) {
                    actions.push_resource(ResourceRequest(item));
                }
            }
        }
    }

    for value in json_values(text) {
        collect_shaped(value, &mut actions);
    }

    actions
}

/// Take every tool- or resource-shaped object in `value`. A shaped object is
/// taken whole and not searched further.
fn collect_shaped(value: Value, actions: &mut ParsedActions) {
    match value {
        Value::Object(item) => {
            if let Some(request) = standalone_tool(&item) {
                actions.push_tool(request);
            } else if standalone_resource(&item) {
                actions.push_resource(ResourceRequest(item));
            } else {
                for (_, nested) in item {
                    collect_shaped(nested, actions);
                }
            }
        }
        Value::Array(items) => {
            for nested in items {
                collect_shaped(nested, actions);
            }
        }
        _ => {}
    }
}

/// Text following each marker, cut at the next marker of either kind
fn marker_regions(text: &str) -> Vec<(Marker, &str)> {
    let mut hits: Vec<(usize, Marker, usize)> = text
        .match_indices(TOOL_MARKER)
        .map(|(i, m)| (i, Marker::Tool, m.len()))
        .chain(
            text.match_indices(RESOURCE_MARKER)
                .map(|(i, m)| (i, Marker::Resource, m.len())),
        )
        .collect();
    hits.sort_by_key(|(i, _, _)| *i);

    hits.iter()
        .enumerate()
        .map(|(n, &(start, marker, len))| {
            let end = hits.get(n + 1).map_or(text.len(), |(next, _, _)| *next);
            (marker, &text[start + len..end])
        })
        .collect()
}

/// Tool object after a marker: `name` is required, `args` defaults to `{}`
fn marked_tool(item: Map<String, Value>) -> Option<ToolCallRequest> {
    let name = item.get("name")?.as_str()?.to_string();
    let args = match item.get("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args.clone(),
        Some(_) => return None,
    };
    Some(ToolCallRequest { name, args })
}

fn standalone_tool(item: &Map<String, Value>) -> Option<ToolCallRequest> {
    let name = item.get("name")?.as_str()?;
    let args = item.get("args")?.as_object()?;
    Some(ToolCallRequest {
        name: name.to_string(),
        args: args.clone(),
    })
}

fn standalone_resource(item: &Map<String, Value>) -> bool {
    item.get("Name").is_some_and(Value::is_string)
}

/// An object, or the objects inside an array
fn objects(value: Value) -> Vec<Map<String, Value>> {
    match value {
        Value::Object(map) => vec![map],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn first_json_value(text: &str) -> Option<Value> {
    json_values(text).into_iter().next()
}

/// Every well-formed, outermost JSON object/array in `text`.
///
/// When a balanced span fails to parse, scanning resumes just inside it so
/// a valid object wrapped in stray braces is still found.
fn json_values(text: &str) -> Vec<Value> {
    let bytes = text.as_bytes();
    let closers = bracket_pairs(bytes);
    let mut values = Vec::new();
    let mut pos = 0;

    while let Some(offset) = bytes[pos..].iter().position(|b| matches!(b, b'{' | b'[')) {
        let start = pos + offset;
        let Some(&end) = closers.get(&start) else {
            pos = start + 1;
            continue;
        };
        match parse_fragment(&text[start..end]) {
            Ok(value) => {
                values.push(value);
                pos = end;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed JSON fragment");
                pos = start + 1;
            }
        }
    }
    values
}

fn parse_fragment(fragment: &str) -> Result<Value, AgentError> {
    serde_json::from_str(fragment).map_err(|e| AgentError::MalformedActionRequest(e.to_string()))
}

/// Map from each balanced opening bracket to one past its closing bracket.
///
/// One pass over the text. Quotes only count inside brackets, a mismatched
/// closer abandons every opener still pending, and unclosed openers get no
/// entry.
fn bracket_pairs(bytes: &[u8]) -> HashMap<usize, usize> {
    let mut pairs = HashMap::new();
    let mut pending: Vec<(usize, u8)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if !pending.is_empty() => in_string = true,
            b'{' => pending.push((i, b'}')),
            b'[' => pending.push((i, b']')),
            b'}' | b']' => match pending.pop() {
                Some((open, close)) if close == b => {
                    pairs.insert(open, i + 1);
                }
                Some(_) => pending.clear(),
                None => {}
            },
            _ => {}
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_plain_answer_has_no_actions() {
        let parsed = parse_actions("The capital of France is Paris. {not json} [1, 2]");
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_marker_tool_request() {
        let parsed = parse_actions("Tool Request(s):\n{\"name\":\"sum2num\",\"args\":{\"a\":2,\"b\":3}}");
        assert_eq!(parsed.tools, vec![tool("sum2num", json!({"a": 2, "b": 3}))]);
        assert!(parsed.resources.is_empty());
    }

    #[test]
    fn test_marker_and_identical_standalone_dedup() {
        let text = r#"Tool Request(s): {"name": "sum2num", "args": {"a": 1, "b": 2}}
Some prose, and again: {"name":"sum2num","args":{"b":2,"a":1}}"#;
        let parsed = parse_actions(text);
        assert_eq!(parsed.tools.len(), 1);
    }

    #[test]
    fn test_marker_accepts_missing_args_and_arrays() {
        let text = r#"Tool Request(s): [{"name": "datetime"}, {"name": "calculate", "args": {"expression": "1+1"}}, 7]"#;
        let parsed = parse_actions(text);
        assert_eq!(
            parsed.tools,
            vec![
                tool("datetime", json!({})),
                tool("calculate", json!({"expression": "1+1"})),
            ]
        );
    }

    #[test]
    fn test_standalone_requires_strict_shape() {
        let text = r#"{"name": "sum2num"} and {"name": "sum2num", "args": {"a": 1, "b": 1}} and {"tool": "x", "args": {}}"#;
        let parsed = parse_actions(text);
        assert_eq!(parsed.tools, vec![tool("sum2num", json!({"a": 1, "b": 1}))]);
    }

    #[test]
    fn test_back_to_back_and_nested_objects() {
        let text = r#"{"name":"a","args":{"x":{"y":"}"}}}{"name":"b","args":{}}"#;
        let parsed = parse_actions(text);
        assert_eq!(
            parsed.tools,
            vec![tool("a", json!({"x": {"y": "}"}})), tool("b", json!({}))]
        );
    }

    #[test]
    fn test_resource_requests() {
        let text = r#"Request Resource(s):
[{"Name": "X", "ID": "1"}, {"Name": "X", "ID": "1"}, {"Name": "Y"}]"#;
        let parsed = parse_actions(text);
        assert_eq!(parsed.resources.len(), 2);
        assert_eq!(parsed.resources[0].name(), Some("X"));
        assert_eq!(parsed.resources[1].name(), Some("Y"));
    }

    #[test]
    fn test_marked_resource_without_name_is_kept_for_dispatch() {
        let parsed = parse_actions(r#"Request Resource(s): {"Title": "oops"}"#);
        assert_eq!(parsed.resources.len(), 1);
        assert_eq!(parsed.resources[0].name(), None);
    }

    #[test]
    fn test_malformed_fragments_are_skipped() {
        let text = r#"Tool Request(s): {"name": "sum2num", "args": {"a": 1,}}
Request Resource(s): {"Name": "doc"}
{"name": broken}"#;
        let parsed = parse_actions(text);
        assert!(parsed.tools.is_empty());
        assert_eq!(parsed.resources.len(), 1);
    }

    #[test]
    fn test_marker_search_stops_at_next_marker() {
        let text = r#"Tool Request(s): nothing here
Request Resource(s): {"Name": "doc"}"#;
        let parsed = parse_actions(text);
        assert!(parsed.tools.is_empty());
        assert_eq!(parsed.resources.len(), 1);
    }

    #[test]
    fn test_object_inside_stray_braces_is_found() {
        let text = r#"{ see: {"name": "calculate", "args": {"expression": "2*3"}} }"#;
        let parsed = parse_actions(text);
        assert_eq!(parsed.tools, vec![tool("calculate", json!({"expression": "2*3"}))]);
    }

    #[test]
    fn test_fenced_json_and_mixed_requests() {
        let text = "I need two things.\n```json\n{\"name\": \"datetime\", \"args\": {}}\n```\n```json\n{\"Name\": \"handbook\"}\n```";
        let parsed = parse_actions(text);
        assert_eq!(parsed.tools.len(), 1);
        assert_eq!(parsed.resources.len(), 1);
    }

    #[test]
    fn test_wrapped_requests_are_found() {
        let parsed = parse_actions(r#"Here: {"calls": [{"name": "sum2num", "args": {"a": 1, "b": 2}}]}"#);
        assert_eq!(parsed.tools, vec![tool("sum2num", json!({"a": 1, "b": 2}))]);

        let text = r#"{"plan": {"steps": [{"Name": "handbook"}, {"name": "datetime", "args": {}}]},
"then": {"name": "sum2num", "args": {"b": 2, "a": 1}}}
and {"name": "sum2num", "args": {"a": 1, "b": 2}}"#;
        let parsed = parse_actions(text);
        assert_eq!(
            parsed.tools,
            vec![tool("datetime", json!({})), tool("sum2num", json!({"a": 1, "b": 2}))]
        );
        assert_eq!(parsed.resources.len(), 1);
        assert_eq!(parsed.resources[0].name(), Some("handbook"));
    }

    #[test]
    fn test_shaped_object_is_not_searched_further() {
        let parsed = parse_actions(r#"{"name": "echo", "args": {"inner": {"name": "datetime", "args": {}}}}"#);
        assert_eq!(parsed.tools.len(), 1);
        assert_eq!(parsed.tools[0].name, "echo");
    }

    #[test]
    fn test_unclosed_brackets_scan_once() {
        let text = format!("{}{{\"name\": \"datetime\", \"args\": {{}}}}", "{ [".repeat(20_000));
        let parsed = parse_actions(&text);
        assert_eq!(parsed.tools, vec![tool("datetime", json!({}))]);
    }

    #[test]
    fn test_bracket_pairs_handle_escapes() {
        let text = br#"{"a": "quote \" and brace }"} tail"#;
        assert_eq!(bracket_pairs(text).get(&0), Some(&29));
        assert!(bracket_pairs(b"{[}]").is_empty());
        assert!(bracket_pairs(b"{ open").is_empty());

        // prose quotes outside brackets do not start a string
        let pairs = bracket_pairs(br#"say "hi {"k": 1}"#);
        assert_eq!(pairs.get(&8), Some(&16));
    }
}
