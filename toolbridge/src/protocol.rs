//! Wire-level constants, frame builders, and the typed edges of the
//! line-delimited JSON-RPC tool protocol.
//!
//! Outgoing frames are built with `serde_json::json!` and serialized to a
//! single line. Incoming payloads stay `serde_json::Value` except where the
//! facade needs structure (`ToolDescriptor`, content blocks).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision reported in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Build an outgoing request frame carrying a correlation token.
pub fn request_frame(token: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": token,
        "method": method,
        "params": params,
    })
}

/// Build an outgoing notification frame. No token, no response expected.
pub fn notification_frame(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

/// A tool advertised by the server in a `tools/list` response.
///
/// Immutable once received; the set is refreshed only by listing again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within one connection.
    pub name: String,

    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Opaque parameter schema document, passed through untouched.
    #[serde(rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    /// Any additional server-provided metadata.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One content block in a `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Collect the text blocks of a `tools/call` result value.
pub fn text_blocks(result: &Value) -> Vec<&str> {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Concatenate all textual content of a failed tool result.
/// Returns `None` when the result carries no textual content.
pub fn error_text(result: &Value) -> Option<String> {
    let texts = text_blocks(result);
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}
