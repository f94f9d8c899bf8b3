use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::tools::{QueryService, ToolError, ToolName};

pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const SERVER_NAME: &str = "diamond-pricing-server";
pub const SERVER_VERSION: &str = "1.0.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const HANDLER_ERROR: i64 = -32000;

#[derive(Debug, Serialize)]
struct JsonRpcSuccess {
    jsonrpc: &'static str,
    id: Value,
    result: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcFailure {
    jsonrpc: &'static str,
    id: Value,
    error: JsonRpcError,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallParams {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
    LoggingSetLevel,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "initialize" => Some(Self::Initialize),
            "initialized" => Some(Self::Initialized),
            "ping" => Some(Self::Ping),
            "tools/list" => Some(Self::ToolsList),
            "tools/call" => Some(Self::ToolsCall),
            "logging/setLevel" => Some(Self::LoggingSetLevel),
            _ => None,
        }
    }
}

/// Routes JSON-RPC envelopes to the query handlers. Never fails: every outcome,
/// including handler errors, becomes a response envelope.
pub struct Dispatcher {
    queries: Arc<QueryService>,
    log_payloads: bool,
}

impl Dispatcher {
    pub fn new(queries: Arc<QueryService>, log_payloads: bool) -> Self {
        Self {
            queries,
            log_payloads,
        }
    }

    pub async fn handle(&self, message: Value) -> Value {
        let envelope = match message {
            Value::Object(envelope) => envelope,
            Value::Array(_) => {
                return jsonrpc_error(Value::Null, INVALID_REQUEST, "Batching is not supported", None)
            }
            _ => return jsonrpc_error(Value::Null, INVALID_REQUEST, "Invalid request", None),
        };

        let id = envelope.get("id").cloned().unwrap_or(Value::Null);
        let Some(method_name) = envelope.get("method").and_then(Value::as_str) else {
            return jsonrpc_error(id, INVALID_REQUEST, "Invalid request", None);
        };
        let Some(method) = Method::parse(method_name) else {
            return jsonrpc_error(
                id,
                METHOD_NOT_FOUND,
                format!("Unknown method: {method_name}"),
                None,
            );
        };

        let response = match method {
            Method::Initialize => jsonrpc_ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {}, "logging": {} },
                    "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
                }),
            ),
            Method::Initialized | Method::Ping | Method::LoggingSetLevel => jsonrpc_ok(id, json!({})),
            Method::ToolsList => jsonrpc_ok(id, json!({ "tools": tool_definitions() })),
            Method::ToolsCall => self.call_tool(id, envelope.get("params")).await,
        };

        debug!(method = %method_name, "MCP request handled");
        response
    }

    async fn call_tool(&self, id: Value, params: Option<&Value>) -> Value {
        let params = params
            .and_then(|value| serde_json::from_value::<ToolCallParams>(value.clone()).ok())
            .unwrap_or_default();

        let name = match params.name {
            Some(Value::String(name)) if !name.is_empty() => name,
            None | Some(Value::Null) | Some(Value::String(_)) => {
                return jsonrpc_error(id, INVALID_PARAMS, "Missing tool name", None)
            }
            Some(other) => other.to_string(),
        };
        let Some(tool) = ToolName::from_name(&name) else {
            return jsonrpc_error(id, METHOD_NOT_FOUND, format!("Unknown tool: {name}"), None);
        };

        let trace_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        let outcome = self
            .queries
            .call(tool, &params.arguments)
            .await
            .and_then(|output| {
                serde_json::to_value(output)
                    .map_err(|err| ToolError::Data(format!("Failed to encode tool output: {err}")))
            });
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                info!(trace_id = %trace_id, tool = tool.as_str(), elapsed_ms, "Tool call completed");
                if self.log_payloads {
                    let bytes = serde_json::to_vec(&result).map(|v| v.len()).unwrap_or(0);
                    debug!(trace_id = %trace_id, tool = tool.as_str(), response_bytes = bytes, "MCP tool response payload");
                }
                jsonrpc_ok(id, result)
            }
            Err(err) => {
                match &err {
                    ToolError::Validation(_) => {
                        warn!(trace_id = %trace_id, tool = tool.as_str(), elapsed_ms, "Tool call rejected: {err}")
                    }
                    ToolError::Data(_) => {
                        error!(trace_id = %trace_id, tool = tool.as_str(), elapsed_ms, "Dataset error: {err}")
                    }
                    ToolError::Upstream(_) => {
                        error!(trace_id = %trace_id, tool = tool.as_str(), elapsed_ms, "Upstream fetch failed: {err}")
                    }
                }
                jsonrpc_error(id, HANDLER_ERROR, err.to_string(), None)
            }
        }
    }
}

/// Response for input that never became an envelope.
pub fn parse_error(detail: impl Into<String>) -> Value {
    jsonrpc_error(
        Value::Null,
        PARSE_ERROR,
        "Parse error",
        Some(Value::String(detail.into())),
    )
}

pub fn tool_definitions() -> Vec<Value> {
    vec![
        tool_def(
            ToolName::GetDiamondPrice,
            "Get Diamond Price",
            "Get diamond price using interpolation",
            json!({
                "type": "object",
                "properties": {
                    "carat": { "type": "number", "minimum": 0.3, "maximum": 6.0 },
                    "color": { "type": "string", "enum": ["D", "E", "F", "G", "H", "I", "J", "K", "L", "M"] },
                    "clarity": { "type": "string", "enum": ["FL", "IF", "VVS1", "VVS2", "VS1", "VS2", "SI1", "SI2"] },
                    "shape": { "type": "string", "enum": ["round", "cushion"], "default": "round" }
                },
                "required": ["carat", "color", "clarity"]
            }),
        ),
        tool_def(
            ToolName::GetDcxIndex,
            "Get DCX Index",
            "Get latest Diamond Composite Index",
            json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        ),
        tool_def(
            ToolName::GetMarketDepth,
            "Get Market Depth",
            "Get market inventory depth",
            json!({
                "type": "object",
                "properties": {
                    "carat": { "type": "number", "minimum": 0.3, "maximum": 6.0 }
                },
                "additionalProperties": false
            }),
        ),
    ]
}

fn tool_def(tool: ToolName, title: &str, description: &str, input_schema: Value) -> Value {
    json!({
        "name": tool.as_str(),
        "title": title,
        "description": description,
        "inputSchema": input_schema,
    })
}

fn jsonrpc_ok(id: Value, result: Value) -> Value {
    let payload = JsonRpcSuccess {
        jsonrpc: "2.0",
        id,
        result,
    };
    serde_json::to_value(payload).unwrap_or_else(|_| json!({ "jsonrpc": "2.0", "id": null }))
}

fn jsonrpc_error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Value {
    let payload = JsonRpcFailure {
        jsonrpc: "2.0",
        id,
        error: JsonRpcError {
            code,
            message: message.into(),
            data,
        },
    };
    serde_json::to_value(payload).unwrap_or_else(|_| {
        json!({ "jsonrpc": "2.0", "id": null, "error": { "code": code, "message": "Failed building error response" } })
    })
}
