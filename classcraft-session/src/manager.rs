//! Session Manager - sole owner of the authentication state
//!
//! Holds the in-memory token and user, mirrors them into the persistent store,
//! keeps the API client's default `Authorization` header in step, and ends the
//! session when the token's `exp` claim passes.

use async_trait::async_trait;
use classcraft_core::{
    ClassCraftConfig, ClassCraftError, ClassCraftResult, ErrorContext, Navigator, SessionState,
    UserProfile,
};
use parking_lot::{Mutex, ReentrantMutex};
use reqwest::StatusCode;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::{ApiClient, ResponseInterceptor};
use crate::store::PersistentSessionStore;
use crate::token::{decode_claims, Claims};

/// Point-in-time copy of the session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<UserProfile>,
    pub expires_at_ms: Option<i64>,
}

#[derive(Default)]
struct SessionData {
    token: Option<String>,
    user: Option<UserProfile>,
    expires_at_ms: Option<i64>,
    /// Bumped on every token change; an expiry timer only fires for its own generation
    generation: u64,
    expiry_task: Option<JoinHandle<()>>,
}

struct SessionInner {
    state: Mutex<SessionData>,
    /// Held across a whole transition: memory, store, header, timer
    transition: ReentrantMutex<()>,
    store: PersistentSessionStore,
    client: ApiClient,
    navigator: Arc<dyn Navigator>,
    login_route: String,
    runtime: Handle,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().expiry_task.take() {
            task.abort();
        }
    }
}

/// Shared handle to the process-wide session
///
/// Clones refer to the same session. Dropping the last handle cancels any
/// pending expiry timer.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SessionManager {
    /// Build the session from `store`, validating any stored token right away.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: &ClassCraftConfig,
        store: PersistentSessionStore,
        navigator: Arc<dyn Navigator>,
    ) -> ClassCraftResult<Self> {
        let runtime = Handle::try_current().map_err(|e| ClassCraftError::Internal {
            message: format!("Session manager needs a Tokio runtime: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("session_manager").with_operation("new"),
        })?;

        let client = ApiClient::new(
            &config.api,
            store.clone(),
            navigator.clone(),
            &config.session.login_route,
        )?;

        let inner = Arc::new(SessionInner {
            state: Mutex::new(SessionData::default()),
            transition: ReentrantMutex::new(()),
            store,
            client,
            navigator,
            login_route: config.session.login_route.clone(),
            runtime,
        });

        inner
            .client
            .add_response_interceptor(Arc::new(SessionInvalidationInterceptor {
                session: Arc::downgrade(&inner),
            }));

        let manager = Self { inner };
        manager.restore();
        Ok(manager)
    }

    /// Build the session on the file store named in `config`
    pub fn from_config(
        config: &ClassCraftConfig,
        navigator: Arc<dyn Navigator>,
    ) -> ClassCraftResult<Self> {
        let store = PersistentSessionStore::file(config.storage.session_file_path());
        Self::new(config, store, navigator)
    }

    fn restore(&self) {
        let _transition = self.inner.transition.lock();
        let token = self.inner.store.read_token();
        if token.is_none() {
            self.set_user(None);
            debug!("No stored session");
            return;
        }

        self.inner.state.lock().user = self.inner.store.read_user();
        self.set_token(token);

        if self.is_authenticated() {
            info!(
                user = ?self.user().and_then(|u| u.email),
                "Restored stored session"
            );
        }
    }

    pub fn token(&self) -> Option<String> {
        self.inner.state.lock().token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.lock().user.clone()
    }

    pub fn expires_at_ms(&self) -> Option<i64> {
        self.inner.state.lock().expires_at_ms
    }

    pub fn snapshot(&self) -> Session {
        let data = self.inner.state.lock();
        Session {
            token: data.token.clone(),
            user: data.user.clone(),
            expires_at_ms: data.expires_at_ms,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.inner.state.lock().token.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Whether an expiry timer is armed for the current token
    pub fn has_pending_expiry(&self) -> bool {
        self.inner
            .state
            .lock()
            .expiry_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// API client carrying this session's credentials
    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    pub fn login_route(&self) -> &str {
        &self.inner.login_route
    }

    /// Replace the token.
    ///
    /// Memory, store, default header and expiry timer are updated in that
    /// order before this returns. A token whose `exp` has already passed is
    /// never activated: the session is cleared and the navigator is sent to
    /// the login route. Clearing the token also clears the user.
    pub fn set_token(&self, token: Option<String>) {
        let _transition = self.inner.transition.lock();
        let token = token.filter(|t| !t.is_empty());
        let claims = token.as_deref().and_then(decode_claims);

        if token.is_some() && claims.as_ref().is_some_and(|c| c.is_expired_at(now_ms())) {
            info!("Token has already expired; ending session");
            self.end_session();
            return;
        }

        let expires_at_ms = claims.as_ref().and_then(Claims::expires_at_ms);
        let (generation, had_user) = {
            let mut data = self.inner.state.lock();
            if let Some(task) = data.expiry_task.take() {
                task.abort();
            }
            data.generation += 1;
            data.token = token.clone();
            data.expires_at_ms = token.as_ref().and(expires_at_ms);
            (data.generation, data.user.is_some())
        };

        match &token {
            Some(token) => self.inner.store.write_token(token),
            None => self.inner.store.clear_token(),
        }
        self.inner.client.set_authorization_token(token.as_deref());

        if token.is_none() {
            self.set_user(None);
            debug!("Session token cleared");
            return;
        }

        if let Some(expires_at_ms) = expires_at_ms {
            self.arm_expiry(generation, expires_at_ms);
        }

        if !had_user {
            if let Some(profile) = claims.as_ref().and_then(Claims::to_user_profile) {
                debug!("Rebuilt user profile from token claims");
                self.set_user(Some(profile));
            }
        }

        debug!(expires_at_ms = ?expires_at_ms, "Session token updated");
    }

    /// Replace the user profile and mirror it into the store
    pub fn set_user(&self, user: Option<UserProfile>) {
        let _transition = self.inner.transition.lock();
        self.inner.state.lock().user = user.clone();

        match &user {
            Some(user) => self.inner.store.write_user(user),
            None => self.inner.store.clear_user(),
        }
    }

    /// Unauthenticated → Authenticated.
    ///
    /// Returns the resulting state; an already-expired token leaves the
    /// session unauthenticated.
    pub fn login(&self, token: String, user: Option<UserProfile>) -> SessionState {
        let _transition = self.inner.transition.lock();
        self.set_token(Some(token));

        if self.is_authenticated() {
            if let Some(user) = user {
                self.set_user(Some(user));
            }
        }

        self.state()
    }

    /// Clear token and user. Callers decide where to go next.
    pub fn logout(&self) {
        self.clear();
        info!("Logged out");
    }

    fn clear(&self) {
        let _transition = self.inner.transition.lock();
        self.set_token(None);
        self.set_user(None);
    }

    /// Clear the session and send the navigator to the login route
    fn end_session(&self) {
        self.clear();
        self.inner.navigator.navigate(&self.inner.login_route);
    }

    fn arm_expiry(&self, generation: u64, expires_at_ms: i64) {
        let delay = Duration::from_millis((expires_at_ms - now_ms()).max(0) as u64);
        let session = Arc::downgrade(&self.inner);

        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = session.upgrade() else {
                return;
            };
            let session = SessionManager { inner };
            {
                let _transition = session.inner.transition.lock();
                {
                    let mut data = session.inner.state.lock();
                    if data.generation != generation {
                        return;
                    }
                    // This task is finishing on its own; don't abort it from set_token
                    data.expiry_task = None;
                }

                info!("Session token expired");
                session.clear();
            }
            session.inner.navigator.navigate(&session.inner.login_route);
        });

        let mut data = self.inner.state.lock();
        if data.generation == generation {
            data.expiry_task = Some(task);
        } else {
            task.abort();
        }
        debug!(delay_ms = delay.as_millis() as u64, "Armed session expiry timer");
    }
}

/// Clears the in-memory session when the server answers 401
struct SessionInvalidationInterceptor {
    session: Weak<SessionInner>,
}

#[async_trait]
impl ResponseInterceptor for SessionInvalidationInterceptor {
    async fn on_error(&self, status: StatusCode, _error: &ClassCraftError) {
        if status != StatusCode::UNAUTHORIZED {
            return;
        }

        if let Some(inner) = self.session.upgrade() {
            SessionManager { inner }.clear();
        }
    }
}
