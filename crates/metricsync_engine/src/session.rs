//! Session state client.

use crate::error::SyncResult;
use crate::observable::{Observable, Subscription};
use crate::transport::{EventSink, Method, RequestParams, Transport, TransportEvent};
use metricsync_protocol::{LoginRequest, User};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Path of the session endpoint.
pub const LOGIN_PATH: &str = "/login";

/// Observable session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Set once the initial `auth` check has completed.
    pub init: bool,
    /// Current user, if logged in.
    pub user: Option<User>,
    /// A login request is in flight.
    pub loading: bool,
    /// Message of the last failed login.
    pub error: Option<String>,
}

impl SessionState {
    /// Returns true if a user is logged in.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Owns the session state and keeps it in step with the server.
///
/// Register the store with the transport (`HttpTransport::add_sink`) so any
/// 401, from any endpoint, clears the session.
pub struct SessionStore {
    state: Observable<SessionState>,
}

impl SessionStore {
    /// Creates an empty session store.
    pub fn new() -> Self {
        Self {
            state: Observable::new(SessionState::default()),
        }
    }

    /// Returns a snapshot of the session state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Subscribes to session changes.
    pub fn subscribe(
        &self,
        listener: impl Fn(&SessionState) + Send + Sync + 'static,
    ) -> Subscription<SessionState> {
        self.state.subscribe(listener)
    }

    /// Clears the session.
    pub fn reset(&self) {
        if self.state.set(SessionState::default()) {
            info!("session reset");
        }
    }

    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.state.update(f);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for SessionStore {
    fn on_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::Unauthorized { path } => {
                debug!(path = path.as_str(), "session invalidated by server");
                self.reset();
            }
        }
    }
}

/// Login, logout and session probing over a shared transport.
#[derive(Clone)]
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
}

impl SessionClient {
    /// Creates a session client.
    pub fn new(transport: Arc<dyn Transport>, store: Arc<SessionStore>) -> Self {
        Self { transport, store }
    }

    /// Returns the session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Asks the server who is logged in.
    ///
    /// Marks the state initialized either way; a failure leaves `user` as is.
    pub async fn auth(&self) -> SyncResult<User> {
        match self.get_user().await {
            Ok(user) => {
                let current = user.clone();
                self.store.update(|s| {
                    s.user = Some(current);
                    s.init = true;
                });
                Ok(user)
            }
            Err(e) => {
                debug!(error = %e, "no active session");
                self.store.update(|s| {
                    s.loading = false;
                    s.init = true;
                });
                Err(e)
            }
        }
    }

    /// Logs in. A failure is recorded in `SessionState::error` and returned.
    pub async fn login(&self, username: &str, password: &str) -> SyncResult<User> {
        self.store.update(|s| {
            s.error = None;
            s.loading = true;
        });

        let result = self.post_login(username, password).await;
        match result {
            Ok(user) => {
                info!(username = user.username.as_str(), "logged in");
                let current = user.clone();
                self.store.update(|s| {
                    s.error = None;
                    s.loading = false;
                    s.user = Some(current);
                });
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                let message = e.to_string();
                self.store.update(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Logs out. On success the session is cleared; failures are logged only.
    pub async fn logout(&self) {
        match self
            .transport
            .request(Method::Delete, LOGIN_PATH, RequestParams::new())
            .await
        {
            Ok(_) => {
                info!("logged out");
                self.store.reset();
            }
            Err(e) => warn!(error = %e, "logout failed"),
        }
    }

    async fn get_user(&self) -> SyncResult<User> {
        let body = self
            .transport
            .request(Method::Get, LOGIN_PATH, RequestParams::new())
            .await?;
        Ok(User::decode(body)?)
    }

    async fn post_login(&self, username: &str, password: &str) -> SyncResult<User> {
        let params = LoginRequest::new(username, password).encode()?;
        let body = self
            .transport
            .request(Method::Post, LOGIN_PATH, params)
            .await?;
        Ok(User::decode(body)?)
    }
}
