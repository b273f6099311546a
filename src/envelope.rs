//! Backend JSON envelopes.
//!
//! Resource endpoints answer with `{ success, data, message, errors,
//! pagination }`, with fields present or absent depending on the endpoint.
//! [`ApiEnvelope::into_result`] turns that into a strict `Result` right after
//! deserialization so nothing downstream inspects `success` by hand.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pagination block attached to list responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Current page, 1-based.
    #[serde(default)]
    pub current_page: u64,
    /// Page size.
    #[serde(default)]
    pub per_page: u64,
    /// Total number of records.
    #[serde(default)]
    pub total: u64,
    /// Last page number.
    #[serde(default)]
    pub last_page: u64,
}

/// Raw envelope as sent by the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    /// Whether the call succeeded.
    #[serde(default = "default_success")]
    pub success: bool,
    /// Payload; may be absent on failures.
    #[serde(default)]
    pub data: Option<T>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Validation errors: either a list or a `{ field: [messages] }` map.
    #[serde(default)]
    pub errors: Option<Value>,
    /// Pagination for list endpoints.
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

// Some endpoints omit `success` entirely when they succeed.
fn default_success() -> bool {
    true
}

/// A successful response with its optional pagination block.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    /// Payload.
    pub data: T,
    /// Pagination, for list endpoints.
    pub pagination: Option<Pagination>,
}

impl<T> ApiEnvelope<T> {
    /// Convert the envelope into a strict result.
    pub fn into_response(self) -> Result<ApiResponse<T>> {
        if !self.success {
            return Err(Error::Api {
                message: self
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
                errors: flatten_errors(self.errors.as_ref()),
            });
        }
        match self.data {
            Some(data) => Ok(ApiResponse {
                data,
                pagination: self.pagination,
            }),
            None => Err(Error::Decode("successful response carried no data".to_string())),
        }
    }

    /// Convert the envelope into its payload.
    pub fn into_result(self) -> Result<T> {
        self.into_response().map(|response| response.data)
    }
}

/// Decode an envelope from a JSON value and unwrap its payload.
pub fn decode_envelope<T: DeserializeOwned>(value: Value) -> Result<ApiResponse<T>> {
    let envelope: ApiEnvelope<T> = serde_json::from_value(value)?;
    envelope.into_response()
}

fn flatten_errors(errors: Option<&Value>) -> Vec<String> {
    match errors {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().flat_map(|v| flatten_errors(Some(v))).collect(),
        Some(Value::Object(fields)) => fields
            .iter()
            .flat_map(|(field, v)| {
                flatten_errors(Some(v))
                    .into_iter()
                    .map(move |msg| format!("{field}: {msg}"))
            })
            .collect(),
        Some(other) => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_with_pagination() {
        let value = json!({
            "success": true,
            "data": [1, 2, 3],
            "pagination": { "current_page": 1, "per_page": 3, "total": 9, "last_page": 3 }
        });
        let response: ApiResponse<Vec<u32>> = decode_envelope(value).unwrap();
        assert_eq!(response.data, vec![1, 2, 3]);
        assert_eq!(response.pagination.unwrap().last_page, 3);
    }

    #[test]
    fn test_missing_success_defaults_to_true() {
        let response: ApiResponse<String> = decode_envelope(json!({ "data": "ok" })).unwrap();
        assert_eq!(response.data, "ok");
    }

    #[test]
    fn test_failure_collects_field_errors() {
        let value = json!({
            "success": false,
            "message": "Validation failed",
            "errors": { "email": ["is required", "must be unique"] }
        });
        let err = decode_envelope::<Value>(value).unwrap_err();
        assert_eq!(
            err,
            Error::Api {
                message: "Validation failed".to_string(),
                errors: vec![
                    "email: is required".to_string(),
                    "email: must be unique".to_string()
                ],
            }
        );
    }

    #[test]
    fn test_success_without_data_is_decode_error() {
        let err = decode_envelope::<Value>(json!({ "success": true })).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_wrong_payload_shape_is_decode_error() {
        let err = decode_envelope::<Vec<u32>>(json!({ "data": "nope" })).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
