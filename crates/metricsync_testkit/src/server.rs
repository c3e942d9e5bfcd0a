//! In-memory metrics API for integration tests.
//!
//! `FakeServer` implements `HttpClient`, so it slots under `HttpTransport`
//! exactly where `ReqwestClient` would. It models one client's cookie jar:
//! a successful `POST /login` starts the session, `DELETE /login` or
//! `expire_session` ends it.
//!
//! A `/metrics` request with `watch > 0` and nothing to return is held for
//! `watch` seconds like the real long poll, or until `insert` adds rows it
//! matches.

use async_trait::async_trait;
use metricsync_engine::{HttpClient, HttpRequest, HttpResponse, Method};
use metricsync_protocol::{MetricRecord, Timestamp, User};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Rows returned when the query has no `limit`.
pub const DEFAULT_LIMIT: usize = 10;

/// An injected failure, consumed by the next request.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Answer with this status and `{"error": message}`.
    Status(u16, String),
    /// Fail at the connection level.
    Connection(String),
}

#[derive(Default)]
struct Inner {
    accounts: RwLock<HashMap<String, (String, User)>>,
    session: RwLock<Option<User>>,
    records: RwLock<Vec<MetricRecord>>,
    failures: Mutex<VecDeque<Failure>>,
    requests: Mutex<Vec<HttpRequest>>,
    inserted: Notify,
}

/// A scripted metrics server. Clones share state.
#[derive(Clone, Default)]
pub struct FakeServer {
    inner: Arc<Inner>,
}

impl FakeServer {
    /// Creates a server with no accounts and no records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account.
    pub fn with_account(self, id: u64, username: &str, password: &str) -> Self {
        let user = User {
            id,
            name: username.to_string(),
            username: username.to_string(),
        };
        self.inner
            .accounts
            .write()
            .insert(username.to_string(), (password.to_string(), user));
        self
    }

    /// Starts a session for `username` without a login round trip.
    pub fn log_in(&self, username: &str) {
        let user = self
            .inner
            .accounts
            .read()
            .get(username)
            .map(|(_, user)| user.clone());
        *self.inner.session.write() = user;
    }

    /// Ends the session; the next authenticated request gets a 401.
    pub fn expire_session(&self) {
        *self.inner.session.write() = None;
    }

    /// Returns true while a session is active.
    pub fn is_logged_in(&self) -> bool {
        self.inner.session.read().is_some()
    }

    /// Stores records and wakes held long polls. Insertion order does not matter.
    pub fn insert(&self, records: impl IntoIterator<Item = MetricRecord>) {
        self.inner.records.write().extend(records);
        self.inner.inserted.notify_waiters();
    }

    /// Returns the number of stored records.
    pub fn record_count(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Queues a failure for the next request.
    pub fn fail_next(&self, failure: Failure) {
        self.inner.failures.lock().push_back(failure);
    }

    /// Returns every request received.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.requests.lock().clone()
    }

    /// Returns the `from` parameter of every `/metrics` request.
    pub fn metrics_cursors(&self) -> Vec<Option<Timestamp>> {
        self.requests()
            .iter()
            .filter(|r| r.url.ends_with("/metrics"))
            .map(|r| query_value(r, "from").and_then(|v| v.parse().ok()))
            .collect()
    }

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let endpoint = request.url.rsplit('/').next().unwrap_or_default();
        match (endpoint, request.method) {
            ("login", Method::Get) => match self.current_user() {
                Some(user) => ok(&user_json(&user)),
                None => unauthorized("no session"),
            },
            ("login", Method::Post) => self.login(request),
            ("login", Method::Delete) => {
                self.expire_session();
                ok(&json!({}))
            }
            ("metrics", Method::Get) => {
                if self.current_user().is_none() {
                    return unauthorized("no session");
                }
                self.metrics(request)
            }
            _ => error(404, "not found"),
        }
    }

    /// Answers `request`, holding an idle long poll until its watch elapses
    /// or an insert gives it rows.
    async fn answer(&self, request: &HttpRequest) -> HttpResponse {
        let hold = match parse_param::<u64>(request, "watch") {
            Ok(Some(secs)) if secs > 0 => Duration::from_secs(secs),
            _ => return self.handle(request),
        };
        let deadline = Instant::now() + hold;

        loop {
            // Registered before reading the records so an insert in between is not missed.
            let inserted = self.inner.inserted.notified();
            let response = self.handle(request);
            if !is_idle(&response) {
                return response;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return response,
                _ = inserted => {}
            }
        }
    }

    fn current_user(&self) -> Option<User> {
        self.inner.session.read().clone()
    }

    fn login(&self, request: &HttpRequest) -> HttpResponse {
        let field = |name: &str| {
            request
                .body
                .as_ref()
                .and_then(|b| b.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let (username, password) = (field("username"), field("password"));

        let user = match self.inner.accounts.read().get(&username) {
            Some((expected, user)) if *expected == password => user.clone(),
            _ => return error(400, "wrong username or password"),
        };
        *self.inner.session.write() = Some(user.clone());
        ok(&user_json(&user))
    }

    fn metrics(&self, request: &HttpRequest) -> HttpResponse {
        let limit = match parse_param::<usize>(request, "limit") {
            Ok(limit) => limit.unwrap_or(DEFAULT_LIMIT),
            Err(name) => return error(400, &format!("invalid {name}")),
        };
        let (from, to, skip) = match (
            parse_param::<Timestamp>(request, "from"),
            parse_param::<Timestamp>(request, "to"),
            parse_param::<usize>(request, "skip"),
        ) {
            (Ok(from), Ok(to), Ok(skip)) => (from, to, skip.unwrap_or(0)),
            (Err(name), _, _) | (_, Err(name), _) | (_, _, Err(name)) => {
                return error(400, &format!("invalid {name}"))
            }
        };
        let watch = parse_param::<u64>(request, "watch").ok().flatten().unwrap_or(0);
        let source = query_value(request, "src").filter(|s| !s.is_empty());

        let mut matching: Vec<MetricRecord> = self
            .inner
            .records
            .read()
            .iter()
            .filter(|r| from.is_none_or(|from| r.timestamp >= from))
            .filter(|r| to.is_none_or(|to| r.timestamp <= to))
            .filter(|r| source.as_deref().is_none_or(|s| r.source == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len();
        let page: Vec<Value> = matching
            .iter()
            .skip(skip)
            .take(limit)
            .map(record_json)
            .collect();

        let mut body = json!({"total": total, "metrics": page});
        if total == 0 && watch > 0 {
            body["timeout"] = Value::Bool(true);
        }
        ok(&body)
    }
}

#[async_trait]
impl HttpClient for FakeServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.inner.requests.lock().push(request.clone());

        let failure = self.inner.failures.lock().pop_front();
        match failure {
            Some(Failure::Connection(message)) => Err(message),
            Some(Failure::Status(status, message)) => Ok(error(status, &message)),
            None => Ok(self.answer(&request).await),
        }
    }
}

fn is_idle(response: &HttpResponse) -> bool {
    response.status == 200
        && serde_json::from_slice::<Value>(&response.body)
            .is_ok_and(|body| body["timeout"] == Value::Bool(true))
}

fn query_value(request: &HttpRequest, name: &str) -> Option<String> {
    request
        .query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

fn parse_param<T: std::str::FromStr>(
    request: &HttpRequest,
    name: &'static str,
) -> Result<Option<T>, &'static str> {
    match query_value(request, name) {
        Some(raw) => raw.parse().map(Some).map_err(|_| name),
        None => Ok(None),
    }
}

fn record_json(record: &MetricRecord) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

fn user_json(user: &User) -> Value {
    json!({"id": user.id, "name": user.name, "username": user.username})
}

fn ok(body: &Value) -> HttpResponse {
    HttpResponse::json(200, body)
}

fn unauthorized(reason: &str) -> HttpResponse {
    error(401, &format!("unauthorized: {reason}"))
}

fn error(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({"error": message}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::series;

    fn get(path: &str, query: &[(&str, &str)]) -> HttpRequest {
        HttpRequest {
            method: Method::Get,
            url: format!("http://fake/api{path}"),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: None,
        }
    }

    fn body(response: &HttpResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    fn logged_in() -> FakeServer {
        let server = FakeServer::new().with_account(1, "admin", "secret");
        server.log_in("admin");
        server
    }

    #[test]
    fn metrics_require_session() {
        let server = FakeServer::new();
        let response = server.handle(&get("/metrics", &[]));
        assert_eq!(response.status, 401);
        assert!(body(&response)["error"]
            .as_str()
            .unwrap()
            .starts_with("unauthorized"));
    }

    #[test]
    fn metrics_newest_first_from_inclusive() {
        let server = logged_in();
        server.insert(series(100, 5));

        let response = server.handle(&get("/metrics", &[("from", "102"), ("limit", "2")]));
        let body = body(&response);
        assert_eq!(body["total"], 3);
        assert_eq!(body["metrics"][0]["Timestamp"], 104);
        assert_eq!(body["metrics"][1]["Timestamp"], 103);
    }

    #[test]
    fn default_limit_applies() {
        let server = logged_in();
        server.insert(series(0, 25));

        let body = body(&server.handle(&get("/metrics", &[])));
        assert_eq!(body["metrics"].as_array().unwrap().len(), DEFAULT_LIMIT);
    }

    #[test]
    fn empty_watch_reports_timeout() {
        let server = logged_in();
        let body = body(&server.handle(&get("/metrics", &[("watch", "30")])));
        assert_eq!(body["timeout"], true);
        assert_eq!(body["total"], 0);
    }

    #[test]
    fn invalid_limit_is_bad_request() {
        let server = logged_in();
        let response = server.handle(&get("/metrics", &[("limit", "many")]));
        assert_eq!(response.status, 400);
        assert_eq!(body(&response)["error"], "invalid limit");
    }

    #[test]
    fn source_filter() {
        let server = logged_in();
        server.insert([
            MetricRecord::new(1).with_source("a"),
            MetricRecord::new(2).with_source("b"),
        ]);

        let body = body(&server.handle(&get("/metrics", &[("src", "a")])));
        assert_eq!(body["total"], 1);
        assert_eq!(body["metrics"][0]["src"], "a");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_long_poll_is_held_for_watch() {
        let server = logged_in();
        let started = Instant::now();

        let response = server.send(get("/metrics", &[("watch", "30")])).await.unwrap();
        assert_eq!(body(&response)["timeout"], true);
        let held = started.elapsed();
        assert!(held >= Duration::from_secs(30) && held < Duration::from_millis(30_010));
    }

    #[tokio::test(start_paused = true)]
    async fn insert_releases_held_long_poll() {
        let server = logged_in();
        let started = Instant::now();

        let writer = server.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            writer.insert([MetricRecord::new(5).with_source("other")]);
            tokio::time::sleep(Duration::from_secs(2)).await;
            writer.insert([MetricRecord::new(7).with_source("a")]);
        });

        let request = get("/metrics", &[("watch", "30"), ("src", "a")]);
        let body = body(&server.send(request).await.unwrap());
        assert_eq!(body["total"], 1);
        assert_eq!(body["metrics"][0]["Timestamp"], 7);
        let held = started.elapsed();
        assert!(held >= Duration::from_secs(4) && held < Duration::from_millis(4_010));
    }

    #[tokio::test]
    async fn requests_without_watch_are_not_held() {
        let server = logged_in();
        let body = body(&server.send(get("/metrics", &[])).await.unwrap());
        assert_eq!(body["total"], 0);
        assert!(body.get("timeout").is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let server = logged_in();
        server.fail_next(Failure::Connection("reset".into()));
        server.fail_next(Failure::Status(503, "busy".into()));

        assert!(server.send(get("/metrics", &[])).await.is_err());
        assert_eq!(server.send(get("/metrics", &[])).await.unwrap().status, 503);
        assert_eq!(server.send(get("/metrics", &[])).await.unwrap().status, 200);
    }
}
