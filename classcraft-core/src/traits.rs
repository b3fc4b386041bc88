//! Core trait definitions

use crate::error::ClassCraftResult;

/// Durable string key-value store that survives process restarts
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent
    fn get(&self, key: &str) -> ClassCraftResult<Option<String>>;

    /// Insert or replace a value
    fn set(&self, key: &str, value: &str) -> ClassCraftResult<()>;

    /// Remove a value. Removing a missing key succeeds.
    fn remove(&self, key: &str) -> ClassCraftResult<()>;
}

/// Moves the user-facing surface to another route (e.g. the login screen)
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// Navigator that only records the request in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, route: &str) {
        tracing::info!(route = route, "Navigation requested");
    }
}
