use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HarnessError, HarnessResult};

/// JSON-RPC version tag carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// JSONRPC 2.0 Request message
///
/// Field order is the wire order: `jsonrpc`, `id`, `method`, `params`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// JSONRPC version - MUST be exactly "2.0"
    pub jsonrpc: String,

    /// Request identifier, taken from the connection's counter
    pub id: u64,

    /// Method name to be invoked
    pub method: String,

    /// Parameters for the method
    #[serde(default)]
    pub params: Value,
}

/// JSONRPC 2.0 Error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error type indicator (must be integer)
    pub code: i64,

    /// Short error description
    pub message: String,

    /// Additional error information (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Pre-defined JSONRPC error codes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InternalError => "Internal error",
        }
    }
}

impl ErrorObject {
    /// Create an error object for a pre-defined code
    pub fn new(code: ErrorCode, data: Option<Value>) -> Self {
        Self {
            code: code as i64,
            message: code.message().to_string(),
            data,
        }
    }
}

/// JSONRPC 2.0 Response message
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    /// JSONRPC version - MUST be exactly "2.0"
    pub jsonrpc: String,

    /// Request identifier from the original request
    pub id: Value,

    /// Result value (present on success, may be `null`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error object (present on error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Request {
    /// Create a new request
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

impl Response {
    /// Create a success response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Value, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Build a response from a decoded JSON body
    ///
    /// `"result": null` is kept as `Some(Value::Null)` so that a null result
    /// is distinguishable from a missing one.
    pub fn from_value(value: Value) -> HarnessResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| HarnessError::Decode("response body must be a JSON object".to_string()))?;

        let jsonrpc = match obj.get("jsonrpc") {
            Some(Value::String(v)) => v.clone(),
            Some(other) => {
                return Err(HarnessError::Decode(format!(
                    "jsonrpc tag must be a string, got {}",
                    other
                )))
            }
            None => return Err(HarnessError::Decode("missing jsonrpc tag".to_string())),
        };

        let id = obj
            .get("id")
            .cloned()
            .ok_or_else(|| HarnessError::Decode("response has no id".to_string()))?;

        let result = obj.get("result").cloned();
        let error = match obj.get("error") {
            Some(e) => Some(
                serde_json::from_value::<ErrorObject>(e.clone())
                    .map_err(|e| HarnessError::Decode(format!("malformed error object: {}", e)))?,
            ),
            None => None,
        };

        if result.is_none() && error.is_none() {
            return Err(HarnessError::Decode(
                "response has neither result nor error".to_string(),
            ));
        }

        Ok(Self {
            jsonrpc,
            id,
            result,
            error,
        })
    }

    /// Numeric id, if the id is a non-negative integer
    pub fn id_u64(&self) -> Option<u64> {
        self.id.as_u64()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = Request::new(0, "initialize", json!({"processId": 1000}));

        let json = serde_json::to_string(&request).unwrap();
        let expected = r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"processId":1000}}"#;
        assert_eq!(json, expected);
    }

    #[test]
    fn test_response_success_from_value() {
        let response = Response::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {"ok": true}
        }))
        .unwrap();

        assert_eq!(response.id_u64(), Some(3));
        assert_eq!(response.result, Some(json!({"ok": true})));
        assert!(!response.is_error());
    }

    #[test]
    fn test_null_result_is_present() {
        let response = Response::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert_eq!(response.result, Some(Value::Null));
    }

    #[test]
    fn test_response_error_from_value() {
        let response = Response::from_value(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32700, "message": "Parse error", "data": {}}
        }))
        .unwrap();

        let error = response.error.unwrap();
        assert_eq!(error.code, -32700);
        assert_eq!(error.message, "Parse error");
        assert_eq!(response.id, Value::Null);
    }

    #[test]
    fn test_response_without_result_or_error() {
        let err = Response::from_value(json!({"jsonrpc": "2.0", "id": 1})).unwrap_err();
        assert!(matches!(err, HarnessError::Decode(_)));
    }

    #[test]
    fn test_non_object_body() {
        let err = Response::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, HarnessError::Decode(_)));
    }

    #[test]
    fn test_response_success_serialization() {
        let response = Response::success(json!(1), json!(19));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":1,"result":19}"#);
    }
}
