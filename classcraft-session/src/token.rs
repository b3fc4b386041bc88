//! Token payload decoding
//!
//! Reads the claims of a compact `header.payload.signature` token without
//! verifying the signature. Decoded claims are display data only.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use classcraft_core::{Role, UserProfile};
use serde_json::{Map, Value};
use tracing::warn;

/// Claims carried in a token payload
///
/// Keeps every key of the payload; typed accessors cover the ones the client
/// understands (`name`, `fullName`, `email`, `role`, `exp`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims {
    map: Map<String, Value>,
}

impl Claims {
    pub fn new(map: Map<String, Value>) -> Self {
        Self { map }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.map
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.map
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    fn str_claim(&self, key: &str) -> Option<&str> {
        self.map
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.str_claim("name")
    }

    pub fn full_name(&self) -> Option<&str> {
        self.str_claim("fullName")
    }

    pub fn email(&self) -> Option<&str> {
        self.str_claim("email")
    }

    /// Role claim; unknown role strings read as `None`
    pub fn role(&self) -> Option<Role> {
        self.str_claim("role").and_then(|role| role.parse().ok())
    }

    /// `exp` claim in seconds since the epoch
    pub fn exp(&self) -> Option<f64> {
        self.map.get("exp").and_then(Value::as_f64)
    }

    pub fn expires_at_ms(&self) -> Option<i64> {
        self.exp().map(|seconds| (seconds * 1000.0) as i64)
    }

    /// Tokens without an `exp` claim never expire locally
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms()
            .is_some_and(|expires_at| expires_at <= now_ms)
    }

    /// `name`, falling back to `fullName`, then `email`
    pub fn display_name(&self) -> Option<&str> {
        self.name()
            .or_else(|| self.full_name())
            .or_else(|| self.email())
    }

    /// Best-effort profile built from the claims
    pub fn to_user_profile(&self) -> Option<UserProfile> {
        let profile = UserProfile {
            name: self.display_name().map(str::to_string),
            email: self.email().map(str::to_string),
            role: self.role(),
            avatar_ref: None,
            preferences: None,
        };

        (!profile.is_empty()).then_some(profile)
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self::new(map)
    }
}

/// Decode the payload segment of a token.
///
/// Returns `None` (and logs a warning) for anything that is not a token with a
/// base64url-encoded JSON object as its second segment.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let segment = match token.split('.').nth(1) {
        Some(segment) if !segment.is_empty() => segment,
        _ => {
            warn!("Failed to decode token: missing payload segment");
            return None;
        }
    };

    let mut normalized: String = segment
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }

    let bytes = match BASE64.decode(normalized.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to decode token payload encoding");
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Some(Claims::new(map)),
        Ok(_) => {
            warn!("Failed to decode token: payload is not a JSON object");
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse token payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;
    use std::sync::Arc;

    fn token_for(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn test_decode_round_trip() {
        let payload = json!({
            "name": "Ada Lovelace",
            "email": "ada@school.test",
            "role": "teacher",
            "exp": 1_900_000_000,
            "classes": ["7A", "7B"],
            "nested": {"k": null}
        });

        let claims = decode_claims(&token_for(&payload)).unwrap();
        assert_eq!(Value::Object(claims.clone().into_map()), payload);
        assert_eq!(claims.name(), Some("Ada Lovelace"));
        assert_eq!(claims.role(), Some(Role::Teacher));
        assert_eq!(claims.expires_at_ms(), Some(1_900_000_000_000));
    }

    #[test]
    fn test_decode_handles_url_safe_alphabet() {
        // Payload bytes chosen so the encoding contains '-' and '_'
        let payload = json!({"name": "ü?>~", "email": "?>?>@x.y"});
        let token = token_for(&payload);
        let segment = token.split('.').nth(1).unwrap();
        assert!(segment.contains('-') || segment.contains('_'));

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.name(), Some("ü?>~"));
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(decode_claims("").is_none());
        assert!(decode_claims("no-dots-here").is_none());
        assert!(decode_claims("header.").is_none());
        assert!(decode_claims("header..sig").is_none());
        assert!(decode_claims("header.@@@not base64@@@.sig").is_none());
        assert!(decode_claims("header.a.sig").is_none());

        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(decode_claims(&format!("h.{}.s", not_json)).is_none());

        let not_object = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        assert!(decode_claims(&format!("h.{}.s", not_object)).is_none());
    }

    #[test]
    fn test_two_segment_token_is_accepted() {
        let body = URL_SAFE_NO_PAD.encode(br#"{"email":"s@school.test"}"#);
        let claims = decode_claims(&format!("header.{}", body)).unwrap();
        assert_eq!(claims.email(), Some("s@school.test"));
    }

    #[test]
    fn test_expiry_helpers() {
        let claims = Claims::from(json!({"exp": 100}).as_object().unwrap().clone());
        assert!(claims.is_expired_at(100_000));
        assert!(claims.is_expired_at(200_000));
        assert!(!claims.is_expired_at(99_999));

        let fractional = Claims::from(json!({"exp": 100.25}).as_object().unwrap().clone());
        assert_eq!(fractional.expires_at_ms(), Some(100_250));

        let no_exp = Claims::default();
        assert!(no_exp.expires_at_ms().is_none());
        assert!(!no_exp.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_profile_from_claims() {
        let claims = Claims::from(
            json!({"fullName": "Grace Hopper", "email": "grace@school.test", "role": "admin"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let profile = claims.to_user_profile().unwrap();
        assert_eq!(profile.name.as_deref(), Some("Grace Hopper"));
        assert_eq!(profile.email.as_deref(), Some("grace@school.test"));
        assert_eq!(profile.role, Some(Role::Admin));

        let email_only = Claims::from(json!({"email": "e@x.y"}).as_object().unwrap().clone());
        assert_eq!(
            email_only.to_user_profile().unwrap().name.as_deref(),
            Some("e@x.y")
        );

        let bare = Claims::from(json!({"sub": "42", "exp": 1}).as_object().unwrap().clone());
        assert!(bare.to_user_profile().is_none());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn logs_while(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        logs.text()
    }

    #[test]
    fn test_malformed_tokens_log_a_warning() {
        for token in ["no-dots", "a.***.c", "a.WzEsMl0.c", "a.bm90IGpzb24.c"] {
            let output = logs_while(|| assert!(decode_claims(token).is_none()));
            assert!(output.contains("WARN"), "no warning for {token}: {output}");
            assert!(output.contains("token"), "unexpected log for {token}: {output}");
        }
    }

    #[test]
    fn test_valid_token_logs_no_warning() {
        let token = token_for(&json!({"email": "sam@school.test"}));
        let output = logs_while(|| assert!(decode_claims(&token).is_some()));
        assert!(!output.contains("WARN"), "{output}");
    }
}
