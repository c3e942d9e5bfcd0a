//! Protocol messages for the metrics and session endpoints.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{MetricRecord, Timestamp};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Query parameters for `GET /metrics`.
///
/// Every field is optional; unset fields are omitted from the request so the
/// server applies its own defaults (10 rows, no watch, last 30 days).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsQuery {
    /// Maximum number of rows to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Long-poll window in seconds; the server holds the request open until
    /// rows arrive or the window elapses. Capped at 60 by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<u32>,
    /// Inclusive lower bound on row timestamps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Timestamp>,
    /// Inclusive upper bound on row timestamps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Timestamp>,
    /// Number of newest rows to skip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,
    /// Source tag filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

impl MetricsQuery {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the row limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the watch window.
    pub fn with_watch(mut self, watch: u32) -> Self {
        self.watch = Some(watch);
        self
    }

    /// Sets the inclusive lower bound.
    pub fn with_from(mut self, from: Timestamp) -> Self {
        self.from = Some(from);
        self
    }

    /// Sets the inclusive upper bound.
    pub fn with_to(mut self, to: Timestamp) -> Self {
        self.to = Some(to);
        self
    }

    /// Sets the skip count.
    pub fn with_skip(mut self, skip: u32) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets the source filter. An empty source clears the filter.
    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        let src = src.into();
        self.src = if src.is_empty() { None } else { Some(src) };
        self
    }

    /// Encodes the query as a parameter map.
    pub fn encode(&self) -> ProtocolResult<Map<String, Value>> {
        match serde_json::to_value(self).map_err(|e| ProtocolError::json("metrics query", e))? {
            Value::Object(map) => Ok(map),
            _ => Err(ProtocolError::InvalidStructure(
                "metrics query must encode to an object".into(),
            )),
        }
    }
}

/// Response body of `GET /metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// Total number of distinct timestamps matching the filter. Zero when the
    /// request used a watch window.
    #[serde(default)]
    pub total: u64,
    /// Rows, newest first.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metrics: Vec<MetricRecord>,
    /// Set when a watch window elapsed without new rows.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timeout: bool,
}

impl MetricsResponse {
    /// Creates a response carrying the given rows.
    pub fn new(total: u64, metrics: Vec<MetricRecord>) -> Self {
        Self {
            total,
            metrics,
            timeout: false,
        }
    }

    /// Creates a response for an elapsed watch window.
    pub fn timed_out() -> Self {
        Self {
            total: 0,
            metrics: Vec::new(),
            timeout: true,
        }
    }

    /// Decodes from a parsed JSON body.
    pub fn decode(value: Value) -> ProtocolResult<Self> {
        serde_json::from_value(value).map_err(|e| ProtocolError::json("metrics response", e))
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<MetricRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<MetricRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

/// An authenticated user, as returned by `/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Login name.
    pub username: String,
}

impl User {
    /// Decodes from a parsed JSON body.
    pub fn decode(value: Value) -> ProtocolResult<Self> {
        serde_json::from_value(value).map_err(|e| ProtocolError::json("user", e))
    }
}

/// Body of `POST /login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Plain-text password.
    pub password: String,
}

impl LoginRequest {
    /// Creates a login request.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Encodes the request as a parameter map.
    pub fn encode(&self) -> ProtocolResult<Map<String, Value>> {
        let mut map = Map::new();
        map.insert("username".into(), Value::String(self.username.clone()));
        map.insert("password".into(), Value::String(self.password.clone()));
        Ok(map)
    }
}

/// Error body returned with every non-200 status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Server-supplied message.
    pub error: String,
}

impl ErrorBody {
    /// Decodes from raw response bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::json("error body", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn query_omits_unset_fields() {
        let params = MetricsQuery::new()
            .with_limit(20)
            .with_watch(30)
            .with_from(101)
            .encode()
            .unwrap();

        assert_eq!(params.len(), 3);
        assert_eq!(params["limit"], 20);
        assert_eq!(params["watch"], 30);
        assert_eq!(params["from"], 101);
    }

    #[test]
    fn empty_src_clears_filter() {
        let query = MetricsQuery::new().with_src("node-a").with_src("");
        assert!(query.src.is_none());
    }

    #[test]
    fn response_null_metrics_is_empty() {
        let response = MetricsResponse::decode(json!({"total": 3, "metrics": null})).unwrap();
        assert_eq!(response.total, 3);
        assert!(response.metrics.is_empty());
        assert!(!response.timeout);
    }

    #[test]
    fn response_watch_timeout() {
        let response =
            MetricsResponse::decode(json!({"total": 0, "metrics": [], "timeout": true})).unwrap();
        assert!(response.timeout);
        assert!(response.metrics.is_empty());
    }

    #[test]
    fn response_rows_decode() {
        let response = MetricsResponse::decode(json!({
            "total": 2,
            "metrics": [
                {"Timestamp": 200, "cpu": 0.5},
                {"Timestamp": 100, "cpu": 0.4}
            ]
        }))
        .unwrap();
        assert_eq!(response.metrics.len(), 2);
        assert_eq!(response.metrics[0].timestamp, 200);
    }

    #[test]
    fn response_rejects_wrong_shape() {
        let result = MetricsResponse::decode(json!({"metrics": "nope"}));
        assert!(matches!(result, Err(ProtocolError::Json { .. })));
    }

    #[test]
    fn error_body_decode() {
        let body = ErrorBody::decode(br#"{"error":"unauthorized: missing ssid"}"#).unwrap();
        assert_eq!(body.error, "unauthorized: missing ssid");
        assert!(ErrorBody::decode(b"404 Not Found").is_err());
    }

    #[test]
    fn login_request_encode() {
        let params = LoginRequest::new("admin", "secret").encode().unwrap();
        assert_eq!(params["username"], "admin");
        assert_eq!(params["password"], "secret");
    }

    #[test]
    fn user_decode_without_name() {
        let user = User::decode(json!({"id": 1, "username": "admin"})).unwrap();
        assert_eq!(user.username, "admin");
        assert!(user.name.is_empty());
    }

    proptest! {
        #[test]
        fn query_encodes_exactly_the_set_fields(
            limit in proptest::option::of(1u32..1000),
            from in proptest::option::of(0i64..2_000_000_000),
            src in proptest::option::of("[a-z]{1,8}"),
        ) {
            let mut query = MetricsQuery::new();
            query.limit = limit;
            query.from = from;
            query.src = src.clone();
            let params = query.encode().unwrap();

            let expected = [limit.is_some(), from.is_some(), src.is_some()]
                .iter()
                .filter(|set| **set)
                .count();
            prop_assert_eq!(params.len(), expected);
        }
    }
}
