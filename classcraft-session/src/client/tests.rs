//! Tests for the API client and its interceptors

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::store::{MemoryStore, PersistentSessionStore};
    use classcraft_core::Navigator;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingNavigator {
        routes: Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, route: &str) {
            self.routes.lock().push(route.to_string());
        }
    }

    struct Fixture {
        client: ApiClient,
        store: PersistentSessionStore,
        navigator: Arc<RecordingNavigator>,
    }

    fn api_config(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: Some(base_url.to_string()),
            host: None,
            timeout_seconds: 5,
            user_agent: "classcraft-test/1.0".to_string(),
        }
    }

    fn fixture(base_url: &str) -> Fixture {
        let store = PersistentSessionStore::new(Arc::new(MemoryStore::new()));
        let navigator = Arc::new(RecordingNavigator::default());
        let client = ApiClient::new(
            &api_config(base_url),
            store.clone(),
            navigator.clone(),
            "/login",
        )
        .unwrap();

        Fixture {
            client,
            store,
            navigator,
        }
    }

    #[test]
    fn test_default_headers_toggle_authorization() {
        let f = fixture("http://localhost:5000/api");

        let headers = f.client.default_headers();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(headers.get(AUTHORIZATION).is_none());

        f.client.set_authorization_token(Some("abc"));
        assert_eq!(
            f.client.default_headers().get(AUTHORIZATION).unwrap(),
            "Bearer abc"
        );

        f.client.set_authorization_token(None);
        assert!(!f.client.default_headers().contains_key(AUTHORIZATION));

        // A token that cannot be a header value leaves no stale header behind
        f.client.set_authorization_token(Some("abc"));
        f.client.set_authorization_token(Some("bad\ntoken"));
        assert!(!f.client.default_headers().contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_invalid_base_url_fails_construction() {
        let store = PersistentSessionStore::new(Arc::new(MemoryStore::new()));
        let result = ApiClient::new(
            &api_config("not a url"),
            store,
            Arc::new(RecordingNavigator::default()),
            "/login",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_url_and_asset_resolution() {
        let f = fixture("https://class-craft-backend.onrender.com/api/");

        assert_eq!(
            f.client.url("/users/me"),
            "https://class-craft-backend.onrender.com/api/users/me"
        );
        assert_eq!(f.client.url("https://cdn.test/x"), "https://cdn.test/x");
        assert_eq!(
            f.client.resolve_asset_url("/uploads/avatars/a.png"),
            "https://class-craft-backend.onrender.com/uploads/avatars/a.png"
        );
        assert_eq!(
            f.client.resolve_asset_url("uploads/a.png"),
            "https://class-craft-backend.onrender.com/uploads/a.png"
        );
        assert_eq!(
            f.client.resolve_asset_url("https://cdn.test/a.png"),
            "https://cdn.test/a.png"
        );
    }

    #[tokio::test]
    async fn test_get_carries_stored_token_and_no_cache_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/classes"))
            .and(header("authorization", "Bearer stored-token"))
            .and(header("cache-control", "no-cache"))
            .and(header("pragma", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "7A"}])))
            .expect(1)
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/api", server.uri()));
        // Written out of band: the default header was never set
        f.store.write_token("stored-token");

        let classes: Value = f.client.get_json("/classes").await.unwrap();
        assert_eq!(classes[0]["name"], "7A");
    }

    #[tokio::test]
    async fn test_post_sends_json_without_cache_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/quests"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/api", server.uri()));
        f.client.set_authorization_token(Some("memory-token"));

        let created: Value = f
            .client
            .post_json("/quests", &json!({"title": "Read a chapter"}))
            .await
            .unwrap();
        assert_eq!(created["id"], 7);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let headers = &requests[0].headers;
        assert!(headers.get("cache-control").is_none());
        assert!(headers.get("pragma").is_none());
        assert_eq!(headers.get("authorization").unwrap(), "Bearer memory-token");
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(headers.get("user-agent").unwrap(), "classcraft-test/1.0");
    }

    #[tokio::test]
    async fn test_unauthorized_clears_session_and_navigates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/me"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Token expired"})),
            )
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/api", server.uri()));
        f.store.write_token("stale");
        f.store.write_user(&classcraft_core::UserProfile {
            name: Some("Ada".to_string()),
            ..Default::default()
        });
        f.client.set_authorization_token(Some("stale"));

        let err = f.client.get_json::<Value>("/users/me").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "HTTP 401: Token expired");

        assert!(f.store.read_token().is_none());
        assert!(f.store.read_user().is_none());
        assert!(!f.client.default_headers().contains_key(AUTHORIZATION));
        assert_eq!(*f.navigator.routes.lock(), vec!["/login".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_unauthorized_responses_are_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/api", server.uri()));
        f.store.write_token("stale");
        f.client.set_authorization_token(Some("stale"));

        let (a, b) = tokio::join!(
            f.client.get_json::<Value>("/rewards"),
            f.client.get_json::<Value>("/attendance")
        );
        assert!(a.unwrap_err().is_unauthorized());
        assert!(b.unwrap_err().is_unauthorized());

        assert!(f.store.read_token().is_none());
        assert!(!f.client.default_headers().contains_key(AUTHORIZATION));
        assert_eq!(f.navigator.routes.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/classes/1"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/classes"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/api", server.uri()));
        f.store.write_token("still-valid");
        f.client.set_authorization_token(Some("still-valid"));

        let err = f.client.delete_json::<Value>("/classes/1").await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.to_string(), "HTTP 403: forbidden");

        let err = f.client.get_json::<Value>("/classes").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.is_recoverable());

        assert_eq!(f.store.read_token().as_deref(), Some("still-valid"));
        assert!(f.client.default_headers().contains_key(AUTHORIZATION));
        assert!(f.navigator.routes.lock().is_empty());
    }

    struct FailingInterceptor;

    impl RequestInterceptor for FailingInterceptor {
        fn intercept(&self, request: &mut reqwest::Request) -> ClassCraftResult<()> {
            request
                .headers_mut()
                .insert("x-half-applied", HeaderValue::from_static("1"));
            Err(ClassCraftError::Storage {
                message: "storage is unavailable".to_string(),
                source: None,
                context: ErrorContext::new("test"),
            })
        }
    }

    #[tokio::test]
    async fn test_failing_interceptor_forwards_request_unmodified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/api", server.uri()));
        f.client.add_request_interceptor(Arc::new(FailingInterceptor));

        let body: Value = f.client.get_json("/health").await.unwrap();
        assert!(body.is_null());

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("x-half-applied").is_none());
        assert_eq!(requests[0].headers.get("cache-control").unwrap(), "no-cache");
    }

    #[tokio::test]
    async fn test_upload_keeps_multipart_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users/me/avatar"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"avatarUrl": "/uploads/a.png"})),
            )
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/api", server.uri()));
        let body: Value = f
            .client
            .upload_file(
                "/users/me/avatar",
                "avatar",
                "a.png",
                vec![0x89, 0x50, 0x4e, 0x47],
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(body["avatarUrl"], "/uploads/a.png");

        let requests = server.received_requests().await.unwrap();
        let content_type = requests[0]
            .headers
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
    }
}
