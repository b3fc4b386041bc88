//! Request and response interceptors
//!
//! Request interceptors run on every outgoing request after the default
//! headers are applied. Response interceptors run on every non-success
//! response before the error is handed back to the caller.

use async_trait::async_trait;
use classcraft_core::{ClassCraftError, ClassCraftResult, ErrorContext, Navigator};
use reqwest::header::{HeaderValue, AUTHORIZATION, CACHE_CONTROL, PRAGMA};
use reqwest::{Method, Request, StatusCode};
use std::sync::Arc;
use tracing::{debug, info};

use super::DefaultHeaders;
use crate::store::PersistentSessionStore;

/// Hook run before a request is sent
pub trait RequestInterceptor: Send + Sync {
    /// Adjust the request. An error is logged, the request's headers are
    /// restored, and the request is still sent.
    fn intercept(&self, request: &mut Request) -> ClassCraftResult<()>;
}

/// Hook run when the server answers with a non-success status
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_error(&self, status: StatusCode, error: &ClassCraftError);
}

pub(crate) fn bearer_value(token: &str) -> ClassCraftResult<HeaderValue> {
    let mut value =
        HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            ClassCraftError::Validation {
                message: format!("Token is not a valid header value: {}", e),
                field: Some("token".to_string()),
                context: ErrorContext::new("api_client").with_operation("bearer_header"),
            }
        })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Attaches the freshest stored token as `Authorization: Bearer <token>`
///
/// Reads the store rather than the in-memory default so tokens written by
/// another process are picked up.
pub struct BearerTokenInterceptor {
    store: PersistentSessionStore,
}

impl BearerTokenInterceptor {
    pub fn new(store: PersistentSessionStore) -> Self {
        Self { store }
    }
}

impl RequestInterceptor for BearerTokenInterceptor {
    fn intercept(&self, request: &mut Request) -> ClassCraftResult<()> {
        if let Some(token) = self.store.read_token() {
            request
                .headers_mut()
                .insert(AUTHORIZATION, bearer_value(&token)?);
        }
        Ok(())
    }
}

/// Disables intermediary caching for GET requests
pub struct NoCacheInterceptor;

impl RequestInterceptor for NoCacheInterceptor {
    fn intercept(&self, request: &mut Request) -> ClassCraftResult<()> {
        if request.method() == Method::GET {
            let headers = request.headers_mut();
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }
        Ok(())
    }
}

/// Ends the stored session when the server answers 401
///
/// Clears both stored entries and the default `Authorization` header, then
/// sends the navigator to the login route. Safe to run repeatedly.
pub struct UnauthorizedInterceptor {
    store: PersistentSessionStore,
    default_headers: DefaultHeaders,
    navigator: Arc<dyn Navigator>,
    login_route: String,
}

impl UnauthorizedInterceptor {
    pub(crate) fn new(
        store: PersistentSessionStore,
        default_headers: DefaultHeaders,
        navigator: Arc<dyn Navigator>,
        login_route: &str,
    ) -> Self {
        Self {
            store,
            default_headers,
            navigator,
            login_route: login_route.to_string(),
        }
    }
}

#[async_trait]
impl ResponseInterceptor for UnauthorizedInterceptor {
    async fn on_error(&self, status: StatusCode, _error: &ClassCraftError) {
        if status != StatusCode::UNAUTHORIZED {
            debug!(status = status.as_u16(), "Passing error response through");
            return;
        }

        info!("Server rejected credentials; clearing session");
        self.store.clear();
        self.default_headers.remove_authorization();
        self.navigator.navigate(&self.login_route);
    }
}
