//! HTTP client for the ClassCraft API
//!
//! A single shared [`ApiClient`] carries the default headers (content type and
//! the session's bearer token) and runs the interceptor chains on every
//! request and response.

use classcraft_core::{ApiConfig, ClassCraftError, ClassCraftResult, ErrorContext, Navigator};
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod interceptor;

#[cfg(test)]
mod tests;

pub use interceptor::{
    BearerTokenInterceptor, NoCacheInterceptor, RequestInterceptor, ResponseInterceptor,
    UnauthorizedInterceptor,
};

use crate::store::PersistentSessionStore;

/// Called with the share of an upload sent so far, in percent (0-100)
pub type UploadProgress = Arc<dyn Fn(u8) + Send + Sync>;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Headers applied to every request that does not set them itself
#[derive(Clone, Default)]
pub struct DefaultHeaders {
    headers: Arc<RwLock<HeaderMap>>,
}

impl DefaultHeaders {
    fn with_json_content_type() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            headers: Arc::new(RwLock::new(headers)),
        }
    }

    /// Snapshot of the current defaults
    pub fn snapshot(&self) -> HeaderMap {
        self.headers.read().clone()
    }

    pub(crate) fn set_bearer(&self, token: &str) -> ClassCraftResult<()> {
        let value = interceptor::bearer_value(token)?;
        self.headers.write().insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Drop the `Authorization` key entirely
    pub(crate) fn remove_authorization(&self) {
        self.headers.write().remove(AUTHORIZATION);
    }

    fn apply_to(&self, headers: &mut HeaderMap) {
        let defaults = self.headers.read();
        for (name, value) in defaults.iter() {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
    }
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    default_headers: DefaultHeaders,
    request_interceptors: RwLock<Vec<Arc<dyn RequestInterceptor>>>,
    response_interceptors: RwLock<Vec<Arc<dyn ResponseInterceptor>>>,
}

/// Shared API client; clones share headers and interceptors
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Build the client with the standard interceptor chains installed
    pub fn new(
        config: &ApiConfig,
        store: PersistentSessionStore,
        navigator: Arc<dyn Navigator>,
        login_route: &str,
    ) -> ClassCraftResult<Self> {
        let base_url = config.resolve_base_url();
        url::Url::parse(&base_url).map_err(|e| ClassCraftError::Config {
            message: format!("Invalid API base URL '{}': {}", base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("api_client")
                .with_operation("create_client")
                .with_suggestion("Check api.base_url or CLASSCRAFT_API_BASE_URL"),
        })?;

        let http = create_http_client(config)?;
        let default_headers = DefaultHeaders::with_json_content_type();

        let request_interceptors: Vec<Arc<dyn RequestInterceptor>> = vec![
            Arc::new(BearerTokenInterceptor::new(store.clone())),
            Arc::new(NoCacheInterceptor),
        ];
        let response_interceptors: Vec<Arc<dyn ResponseInterceptor>> =
            vec![Arc::new(UnauthorizedInterceptor::new(
                store,
                default_headers.clone(),
                navigator,
                login_route,
            ))];

        debug!(base_url = %base_url, "Created API client");

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                default_headers,
                request_interceptors: RwLock::new(request_interceptors),
                response_interceptors: RwLock::new(response_interceptors),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Current default headers (read-only view)
    pub fn default_headers(&self) -> HeaderMap {
        self.inner.default_headers.snapshot()
    }

    /// Set or remove the default `Authorization: Bearer` header
    pub(crate) fn set_authorization_token(&self, token: Option<&str>) {
        match token {
            Some(token) => {
                if let Err(e) = self.inner.default_headers.set_bearer(token) {
                    warn!(error = %e, "Dropping default authorization header");
                    self.inner.default_headers.remove_authorization();
                }
            }
            None => self.inner.default_headers.remove_authorization(),
        }
    }

    pub fn add_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) {
        self.inner.request_interceptors.write().push(interceptor);
    }

    pub fn add_response_interceptor(&self, interceptor: Arc<dyn ResponseInterceptor>) {
        self.inner.response_interceptors.write().push(interceptor);
    }

    /// Absolute URL for an API path; absolute URLs pass through
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.inner.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Resolve an asset reference (e.g. an avatar path) against the API origin
    pub fn resolve_asset_url(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }

        let base = self.inner.base_url.trim_end_matches('/');
        let origin = base.strip_suffix("/api").unwrap_or(base);
        if reference.starts_with('/') {
            format!("{}{}", origin, reference)
        } else {
            format!("{}/{}", origin, reference)
        }
    }

    /// Start a request; send it with [`ApiClient::execute`]
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.inner.http.request(method, self.url(path))
    }

    /// Send a request through the interceptor chains
    pub async fn execute(&self, builder: RequestBuilder) -> ClassCraftResult<Response> {
        let mut request = builder.build().map_err(|e| ClassCraftError::Internal {
            message: format!("Failed to build request: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("api_client").with_operation("build_request"),
        })?;

        self.inner.default_headers.apply_to(request.headers_mut());
        self.run_request_interceptors(&mut request);

        let method = request.method().clone();
        let url = request.url().clone();
        debug!(method = %method, url = %url, "Sending API request");

        let response = self
            .inner
            .http
            .execute(request)
            .await
            .map_err(|e| ClassCraftError::Network {
                message: format!("Request to {} failed: {}", url, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("api_client")
                    .with_operation("execute")
                    .with_suggestion("Check network connectivity and the API base URL"),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error = handle_response_error(response, &format!("{} {}", method, url.path())).await;
        self.run_response_interceptors(status, &error).await;
        Err(error)
    }

    fn run_request_interceptors(&self, request: &mut reqwest::Request) {
        let interceptors = self.inner.request_interceptors.read().clone();
        for interceptor in interceptors {
            let snapshot = request.headers().clone();
            if let Err(e) = interceptor.intercept(request) {
                warn!(error = %e, "Request interceptor failed; sending request unmodified");
                *request.headers_mut() = snapshot;
            }
        }
    }

    async fn run_response_interceptors(
        &self,
        status: reqwest::StatusCode,
        error: &ClassCraftError,
    ) {
        let interceptors = self.inner.response_interceptors.read().clone();
        for interceptor in interceptors {
            interceptor.on_error(status, error).await;
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClassCraftResult<T> {
        let response = self.execute(self.request(Method::GET, path)).await?;
        parse_json_body(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ClassCraftResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.request(Method::POST, path).json(body))
            .await?;
        parse_json_body(response).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> ClassCraftResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.request(Method::PUT, path).json(body))
            .await?;
        parse_json_body(response).await
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> ClassCraftResult<T> {
        let response = self.execute(self.request(Method::DELETE, path)).await?;
        parse_json_body(response).await
    }

    /// Multipart upload of a single file field
    pub async fn upload_file<T: DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        file_name: &str,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> ClassCraftResult<T> {
        self.upload_file_with_progress(path, field, file_name, bytes, timeout, None)
            .await
    }

    /// [`ApiClient::upload_file`], reporting progress as the body is sent
    pub async fn upload_file_with_progress<T: DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        file_name: &str,
        bytes: Vec<u8>,
        timeout: Duration,
        progress: Option<UploadProgress>,
    ) -> ClassCraftResult<T> {
        let part = match progress {
            Some(progress) => progress_part(bytes, progress),
            None => reqwest::multipart::Part::bytes(bytes),
        }
        .file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part(field.to_string(), part);

        let response = self
            .execute(
                self.request(Method::POST, path)
                    .multipart(form)
                    .timeout(timeout),
            )
            .await?;
        parse_json_body(response).await
    }
}

/// Helper function to create HTTP client with common configuration
fn create_http_client(config: &ApiConfig) -> ClassCraftResult<reqwest::Client> {
    let mut headers = HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_str(&config.user_agent).map_err(|e| ClassCraftError::Config {
            message: format!("Invalid user agent: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?,
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| ClassCraftError::Config {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?;

    Ok(client)
}

/// File part whose body reports progress chunk by chunk as it is polled
fn progress_part(bytes: Vec<u8>, progress: UploadProgress) -> reqwest::multipart::Part {
    let total = bytes.len() as u64;
    let chunks: Vec<Vec<u8>> = bytes
        .chunks(UPLOAD_CHUNK_SIZE)
        .map(<[u8]>::to_vec)
        .collect();

    let mut sent = 0u64;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        progress((sent * 100 / total) as u8);
        Ok::<_, std::io::Error>(chunk)
    });

    reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
}

/// Decode a JSON body; an empty body decodes as `null`
async fn parse_json_body<T: DeserializeOwned>(response: Response) -> ClassCraftResult<T> {
    let url = response.url().clone();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClassCraftError::Network {
            message: format!("Failed to read response from {}: {}", url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("api_client").with_operation("read_body"),
        })?;

    let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &bytes
    };

    Ok(serde_json::from_slice(body)?)
}

/// Helper function to turn an error response into a [`ClassCraftError`]
///
/// Uses the `message` field of a JSON body when the server sends one.
async fn handle_response_error(response: Response, operation: &str) -> ClassCraftError {
    let status = response.status();
    let error_body = response.text().await.unwrap_or_default();

    let server_message = serde_json::from_str::<serde_json::Value>(&error_body)
        .ok()
        .and_then(|body| body.get("message")?.as_str().map(str::to_string));

    let message = match server_message {
        Some(message) => message,
        None if !error_body.trim().is_empty() => error_body,
        None => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    };

    ClassCraftError::Http {
        status: status.as_u16(),
        message,
        context: ErrorContext::new("api_client")
            .with_operation(operation)
            .with_suggestion(match status.as_u16() {
                401 => "Sign in again",
                403 => "Check account permissions",
                404 => "Resource not found or not accessible",
                _ => "Check network connectivity and API status",
            }),
    }
}
