//! JSON-RPC 2.0 wire types, id correlation and error classification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request/response id. Requests issued by this client always carry
/// numeric ids; responses are matched on whatever the node echoes back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RpcId::Number(id),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: RpcId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Per-call outcome after classification. One explicit tri-state instead of
/// overloading null: a successful value, an application-level rejection, or a
/// null result (which the transport never exposes: it classifies as
/// retriable before this type is produced).
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCallResult {
    Result(Value),
    Error { code: i64, message: String },
    Null,
}

impl RpcCallResult {
    pub fn ok(&self) -> Option<&Value> {
        match self {
            RpcCallResult::Result(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("JSON-RPC server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("null result with null error for request {id} (node out of sync)")]
    NodeDesync { id: RpcId },

    #[error("response id {0} matches no outstanding request")]
    UnmatchedResponse(RpcId),

    #[error("no response received for request {0}")]
    MissingResponse(RpcId),

    #[error("duplicate response for request {0}")]
    DuplicateResponse(RpcId),

    #[error("invalid provider URI: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RpcError {
    /// Transient faults worth retrying: network/timeout trouble, JSON-RPC
    /// server-error codes, and the null/null desync signal. Protocol
    /// violations and malformed requests are final.
    pub fn is_retriable(&self) -> bool {
        match self {
            RpcError::Transport(_) | RpcError::Timeout(_) | RpcError::NodeDesync { .. } => true,
            RpcError::Server { code, .. } => is_retriable_code(*code),
            RpcError::UnmatchedResponse(_)
            | RpcError::MissingResponse(_)
            | RpcError::DuplicateResponse(_)
            | RpcError::InvalidUrl(_)
            | RpcError::Serialization(_) => false,
        }
    }
}

/// JSON-RPC server-fault convention: `-32603` (internal error) and the
/// implementation-defined server-error band `[-32099, -32000]`, both
/// inclusive. Everything else is an application-level rejection.
pub fn is_retriable_code(code: i64) -> bool {
    code == -32603 || (-32099..=-32000).contains(&code)
}

/// Re-associate batch responses with their requests strictly by id; the
/// network layer is free to reorder. Classifies each matched response:
///
/// * retriable-coded error or null/null → `Err` (the whole batch retries);
/// * any other error code → `RpcCallResult::Error` for that call only;
/// * a result value → `RpcCallResult::Result`.
pub fn match_batch(
    requests: &[JsonRpcRequest],
    responses: Vec<JsonRpcResponse>,
) -> Result<Vec<RpcCallResult>, RpcError> {
    let mut by_id: HashMap<RpcId, JsonRpcResponse> = HashMap::with_capacity(responses.len());
    for response in responses {
        let id = response.id.clone();
        if by_id.insert(id.clone(), response).is_some() {
            return Err(RpcError::DuplicateResponse(id));
        }
    }

    let mut results = Vec::with_capacity(requests.len());
    for request in requests {
        let response = by_id
            .remove(&request.id)
            .ok_or_else(|| RpcError::MissingResponse(request.id.clone()))?;
        results.push(classify_response(response)?);
    }

    if let Some(id) = by_id.into_keys().next() {
        return Err(RpcError::UnmatchedResponse(id));
    }
    Ok(results)
}

fn classify_response(response: JsonRpcResponse) -> Result<RpcCallResult, RpcError> {
    match (response.result, response.error) {
        (Some(value), None) if !value.is_null() => Ok(RpcCallResult::Result(value)),
        (_, Some(error)) if is_retriable_code(error.code) => Err(RpcError::Server {
            code: error.code,
            message: error.message,
        }),
        (_, Some(error)) => Ok(RpcCallResult::Error {
            code: error.code,
            message: error.message,
        }),
        // result absent or literally null, no error: the node is behind.
        (_, None) => Err(RpcError::NodeDesync { id: response.id }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(id: u64, result: Option<Value>, error: Option<(i64, &str)>) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: RpcId::Number(id),
            result,
            error: error.map(|(code, message)| JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    #[test]
    fn retriable_code_boundaries() {
        assert!(is_retriable_code(-32603));
        assert!(is_retriable_code(-32000));
        assert!(is_retriable_code(-32099));
        assert!(!is_retriable_code(-31999));
        assert!(!is_retriable_code(-32100));
        assert!(!is_retriable_code(-32602));
        assert!(!is_retriable_code(0));
    }

    #[test]
    fn matches_reordered_responses_by_id() {
        let requests = vec![
            JsonRpcRequest::new(1, "eth_getBlockByNumber", json!(["0x1", true])),
            JsonRpcRequest::new(2, "eth_getBlockByNumber", json!(["0x2", true])),
            JsonRpcRequest::new(3, "eth_getBlockByNumber", json!(["0x3", true])),
        ];
        let responses = vec![
            response(3, Some(json!("third")), None),
            response(1, Some(json!("first")), None),
            response(2, Some(json!("second")), None),
        ];
        let results = match_batch(&requests, responses).unwrap();
        assert_eq!(results[0], RpcCallResult::Result(json!("first")));
        assert_eq!(results[1], RpcCallResult::Result(json!("second")));
        assert_eq!(results[2], RpcCallResult::Result(json!("third")));
    }

    #[test]
    fn missing_response_is_fatal() {
        let requests = vec![
            JsonRpcRequest::new(1, "eth_blockNumber", json!([])),
            JsonRpcRequest::new(2, "eth_blockNumber", json!([])),
        ];
        let responses = vec![response(1, Some(json!("0x1")), None)];
        let err = match_batch(&requests, responses).unwrap_err();
        assert!(matches!(err, RpcError::MissingResponse(RpcId::Number(2))));
        assert!(!err.is_retriable());
    }

    #[test]
    fn unknown_response_id_is_a_protocol_violation() {
        let requests = vec![JsonRpcRequest::new(1, "eth_blockNumber", json!([]))];
        let responses = vec![
            response(1, Some(json!("0x1")), None),
            response(99, Some(json!("0x2")), None),
        ];
        let err = match_batch(&requests, responses).unwrap_err();
        assert!(matches!(err, RpcError::UnmatchedResponse(RpcId::Number(99))));
    }

    #[test]
    fn null_result_null_error_is_retriable() {
        let requests = vec![JsonRpcRequest::new(7, "eth_getBlockByNumber", json!([]))];
        let responses = vec![response(7, Some(Value::Null), None)];
        let err = match_batch(&requests, responses).unwrap_err();
        assert!(matches!(err, RpcError::NodeDesync { .. }));
        assert!(err.is_retriable());
    }

    #[test]
    fn application_error_does_not_abort_the_batch() {
        let requests = vec![
            JsonRpcRequest::new(1, "eth_call", json!([])),
            JsonRpcRequest::new(2, "eth_call", json!([])),
        ];
        let responses = vec![
            response(1, None, Some((-32602, "invalid params"))),
            response(2, Some(json!("0xabc")), None),
        ];
        let results = match_batch(&requests, responses).unwrap();
        assert_eq!(
            results[0],
            RpcCallResult::Error {
                code: -32602,
                message: "invalid params".to_string()
            }
        );
        assert_eq!(results[1], RpcCallResult::Result(json!("0xabc")));
    }

    #[test]
    fn retriable_server_error_aborts_the_batch_as_retriable() {
        let requests = vec![JsonRpcRequest::new(1, "eth_call", json!([]))];
        let responses = vec![response(1, None, Some((-32005, "rate limited")))];
        let err = match_batch(&requests, responses).unwrap_err();
        assert!(err.is_retriable());
    }

    #[test]
    fn request_wire_shape() {
        let req = JsonRpcRequest::new(5, "eth_blockNumber", json!([]));
        let wire = serde_json::to_string(&req).unwrap();
        assert!(wire.contains("\"jsonrpc\":\"2.0\""));
        assert!(wire.contains("\"id\":5"));
        let back: JsonRpcRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.id, RpcId::Number(5));
    }
}
