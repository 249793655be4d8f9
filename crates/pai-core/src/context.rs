//! Prompt Context
//!
//! Pure text rendering for the agent loop: the capabilities banner appended
//! to the first prompt, and the follow-up prompt that carries action results
//! back to the model.

use serde::Serialize;

use crate::action::{RESOURCE_MARKER, TOOL_MARKER};
use crate::resource::{ResourceCallResult, ResourceMetadata};
use crate::tool::{ToolCallResult, ToolDescriptor};

/// Stands in for resource contents when nothing resolved
pub const NO_RESOURCE_CONTENT: &str = "No resource content found.";

/// Banner listing tools and resources plus the request protocol.
///
/// Empty when there is nothing to offer.
pub fn render_capabilities_banner(
    tools: &[ToolDescriptor],
    resources: &[ResourceMetadata],
) -> String {
    if tools.is_empty() && resources.is_empty() {
        return String::new();
    }

    format!(
        "Capabilities banner (tools/resources available this session):
- If the user's request doesn't need tools/resources, answer directly and concisely.
- Only request tools/resources when strictly needed.
- When you need one, reply with ONLY the JSON request block(s), no prose:
  {TOOL_MARKER}
  {{\"name\": \"<tool name>\", \"args\": {{\"<param>\": <value>}}}}
  {RESOURCE_MARKER}
  {{\"Name\": \"<resource name>\", \"ID\": \"<resource id>\"}}
- Once you have enough information, provide a final answer without further requests.

TOOLS:
{}

RESOURCES:
{}",
        pretty(tools),
        pretty(resources),
    )
}

/// Follow-up prompt embedding tool results and resolved resource contents
pub fn render_followup_prompt(
    original_prompt: &str,
    tool_results: &[ToolCallResult],
    resource_results: &[ResourceCallResult],
) -> String {
    let contents: Vec<&str> = resource_results
        .iter()
        .filter_map(ResourceCallResult::content)
        .filter(|c| !c.is_empty())
        .collect();
    let contents = if contents.is_empty() {
        NO_RESOURCE_CONTENT.to_string()
    } else {
        contents.join("\n")
    };

    format!(
        "You are given tool execution results and resource contents. Use these to proceed.

Tool results:
{}

Resource contents:
{contents}

If you still need more tools or resources, provide ONLY the JSON request(s) per protocol and no prose.
Otherwise, provide the best final answer based strictly on the above.
Original question: {original_prompt}",
        pretty(tool_results),
    )
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".into())
}
