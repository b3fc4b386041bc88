//! Common test utilities for session tests
//!
//! Token builders, a navigator that records where it was sent, and config
//! pointing the client at a mock server.

#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use classcraft_core::{ClassCraftConfig, Navigator};
use classcraft_session::{MemoryStore, PersistentSessionStore, SessionManager};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

/// Navigator that remembers every route it was sent to
#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &str) {
        self.routes.lock().push(route.to_string());
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Unsigned token carrying `payload`
pub fn token_for(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    format!("{}.{}.test-signature", header, body)
}

/// Token for `email` expiring `ms` from now
pub fn token_expiring_in(email: &str, ms: i64) -> String {
    token_for(&json!({
        "email": email,
        "role": "student",
        "exp": (now_ms() + ms) as f64 / 1000.0,
    }))
}

/// Token that expired an hour ago
pub fn expired_token() -> String {
    token_for(&json!({
        "email": "old@school.test",
        "exp": (now_ms() / 1000) - 3600,
    }))
}

pub fn test_config(base_url: &str) -> ClassCraftConfig {
    let mut config = ClassCraftConfig::default();
    config.api.base_url = Some(base_url.to_string());
    config.api.timeout_seconds = 5;
    config
}

pub struct TestSession {
    pub session: SessionManager,
    pub store: PersistentSessionStore,
    pub backend: Arc<MemoryStore>,
    pub navigator: Arc<RecordingNavigator>,
}

/// Session over a fresh in-memory store, optionally seeded before construction
pub fn session_with(base_url: &str, seed: impl FnOnce(&PersistentSessionStore)) -> TestSession {
    let backend = Arc::new(MemoryStore::new());
    let store = PersistentSessionStore::new(backend.clone());
    seed(&store);

    let navigator = Arc::new(RecordingNavigator::default());
    let session =
        SessionManager::new(&test_config(base_url), store.clone(), navigator.clone()).unwrap();

    TestSession {
        session,
        store,
        backend,
        navigator,
    }
}

pub fn session(base_url: &str) -> TestSession {
    session_with(base_url, |_| {})
}
