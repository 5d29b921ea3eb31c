//! CW-011: HTTP transport abstraction: real client and scripted mock.
//!
//! Steps talk to the network only through `HttpTransport`, so the
//! interpreter can be driven by canned responses in tests.

pub mod http;
pub mod mock;

pub use http::ReqwestTransport;
pub use mock::MockTransport;

use crate::core::value::Value;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Per-request timeout shared by the interpreter and generated programs.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent sent by both backends.
pub const USER_AGENT: &str = concat!("cliwright/", env!("CARGO_PKG_VERSION"));

/// A fully resolved HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Shape a request from resolved step values.
    ///
    /// URL uses the default representation. Only map headers are sent.
    /// A null body is omitted, a string body is sent verbatim, anything
    /// else is sent as compact JSON with a JSON content type unless one
    /// was given.
    pub fn from_values(method: &str, url: &Value, headers: &Value, body: &Value) -> Self {
        let mut header_list: Vec<(String, String)> = headers
            .as_map()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.to_string())).collect())
            .unwrap_or_default();

        let body = match body {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => {
                let has_content_type = header_list
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
                if !has_content_type {
                    header_list.push(("Content-Type".to_string(), "application/json".to_string()));
                }
                Some(other.to_string())
            }
        };

        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            headers: header_list,
            body,
        }
    }
}

/// Raw response as seen by a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Step result: `{status, body}` with the body parsed as JSON when it
    /// parses.
    pub fn to_value(&self) -> Value {
        let mut map = indexmap::IndexMap::new();
        map.insert("status".to_string(), Value::from(self.status));
        map.insert("body".to_string(), Value::from_body(&self.body));
        Value::Map(map)
    }
}

/// Why a step's HTTP call did not produce a result.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid method: {0}")]
    Method(String),
    #[error("cancelled")]
    Cancelled,
}

/// Sends one request and waits for the full response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Run one step's request under a cancellation scope and turn the
/// response into a step result. Non-2xx is an error.
pub async fn execute_step(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    cancel: &CancellationToken,
) -> Result<Value, TransportError> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        result = transport.send(request) => result?,
    };
    if !response.success() {
        return Err(TransportError::Status {
            status: response.status,
            body: response.body,
        });
    }
    Ok(response.to_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cw011_request_shaping_string_body() {
        let req = HttpRequest::from_values(
            "post",
            &Value::from("http://h/x"),
            &Value::from(json!({"X-Token": "t", "X-Count": 3})),
            &Value::from("raw"),
        );
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "http://h/x");
        assert_eq!(
            req.headers,
            vec![
                ("X-Token".to_string(), "t".to_string()),
                ("X-Count".to_string(), "3".to_string())
            ]
        );
        assert_eq!(req.body.as_deref(), Some("raw"));
    }

    #[test]
    fn test_cw011_request_shaping_json_body() {
        let req = HttpRequest::from_values(
            "PUT",
            &Value::from("u"),
            &Value::Null,
            &Value::from(json!({"a": 1})),
        );
        assert_eq!(req.body.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(
            req.headers,
            vec![("Content-Type".to_string(), "application/json".to_string())]
        );
    }

    #[test]
    fn test_cw011_request_shaping_keeps_explicit_content_type() {
        let req = HttpRequest::from_values(
            "PUT",
            &Value::from("u"),
            &Value::from(json!({"content-type": "application/merge-patch+json"})),
            &Value::from(json!({"a": 1})),
        );
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn test_cw011_null_body_omitted() {
        let req = HttpRequest::from_values("GET", &Value::from("u"), &Value::Null, &Value::Null);
        assert!(req.body.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_cw011_response_value() {
        let v = HttpResponse::new(200, r#"{"data":{"keys":["a"]}}"#).to_value();
        assert_eq!(
            v,
            Value::from(json!({"status": 200, "body": {"data": {"keys": ["a"]}}}))
        );
        let v = HttpResponse::new(204, "").to_value();
        assert_eq!(v, Value::from(json!({"status": 204, "body": ""})));
    }

    #[tokio::test]
    async fn test_cw011_execute_step_non_2xx() {
        let mock = MockTransport::new(vec![Ok(HttpResponse::new(503, "down"))]);
        let req = HttpRequest::from_values("GET", &Value::from("u"), &Value::Null, &Value::Null);
        let err = execute_step(&mock, req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 503, .. }));
        assert_eq!(err.to_string(), "HTTP 503: down");
    }

    #[tokio::test]
    async fn test_cw011_execute_step_cancelled() {
        let mock = MockTransport::hanging();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let req = HttpRequest::from_values("GET", &Value::from("u"), &Value::Null, &Value::Null);
        let err = execute_step(&mock, req, &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }
}
