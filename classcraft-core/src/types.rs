//! Core data type definitions

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Account roles understood by the ClassCraft API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    /// Landing route after a successful login
    pub fn dashboard_route(&self) -> &'static str {
        match self {
            Role::Student => "/student/dashboard",
            Role::Teacher => "/teacher/dashboard",
            Role::Admin => "/admin/dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Display and authorization data for the signed-in account
///
/// Profiles rebuilt from token claims are display data only; the API
/// re-validates the token on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_role",
        skip_serializing_if = "Option::is_none"
    )]
    pub role: Option<Role>,
    /// Relative or absolute path to the avatar image
    #[serde(
        default,
        rename = "avatarUrl",
        alias = "avatarRef",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
}

/// Per-account settings kept by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub notifications: bool,
    pub theme: String,
    pub language: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            notifications: true,
            theme: "light".to_string(),
            language: "English".to_string(),
        }
    }
}

impl UserProfile {
    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.role.is_none()
            && self.avatar_ref.is_none()
            && self.preferences.is_none()
    }
}

/// Unknown role strings read as "no role" instead of failing the whole profile
fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|role| role.parse().ok()))
}

/// Authentication state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// Configuration root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCraftConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Explicit API base URL; the environment override still wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Host the client runs on; `localhost`/`127.0.0.1` selects the local API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Session file location (defaults to the platform data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Route the client is sent to when the session ends
    pub login_route: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_and_routes() {
        assert_eq!("Teacher".parse::<Role>(), Ok(Role::Teacher));
        assert_eq!(" admin ".parse::<Role>(), Ok(Role::Admin));
        assert!("principal".parse::<Role>().is_err());
        assert_eq!(Role::Student.dashboard_route(), "/student/dashboard");
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_user_profile_json_shape() {
        let user = UserProfile {
            name: Some("Ada".to_string()),
            email: Some("ada@school.test".to_string()),
            role: Some(Role::Teacher),
            avatar_ref: Some("/uploads/avatars/ada.png".to_string()),
            preferences: Some(Preferences {
                theme: "dark".to_string(),
                ..Preferences::default()
            }),
        };

        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["role"], "teacher");
        assert_eq!(json["avatarUrl"], "/uploads/avatars/ada.png");
        assert_eq!(json["preferences"]["theme"], "dark");
        assert_eq!(json["preferences"]["notifications"], true);

        let parsed: UserProfile = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, user);
        assert!(parsed.has_role(Role::Teacher));
    }

    #[test]
    fn test_user_profile_accepts_server_aliases() {
        let parsed: UserProfile = serde_json::from_str(
            r#"{"name":"Sam","avatarRef":"/a.png","_id":"42","preferences":{"theme":"dark"}}"#,
        )
        .unwrap();

        assert_eq!(parsed.name.as_deref(), Some("Sam"));
        assert_eq!(parsed.avatar_ref.as_deref(), Some("/a.png"));
        assert!(parsed.role.is_none());
        assert!(!parsed.is_empty());

        let parsed: UserProfile =
            serde_json::from_str(r#"{"email":"x@y.z","role":"superuser"}"#).unwrap();
        assert_eq!(parsed.email.as_deref(), Some("x@y.z"));
        assert!(parsed.role.is_none());
        assert!(UserProfile::default().is_empty());

        let parsed: UserProfile =
            serde_json::from_str(r#"{"name":"Sam","preferences":{"theme":"dark"}}"#).unwrap();
        let preferences = parsed.preferences.unwrap();
        assert_eq!(preferences.theme, "dark");
        assert_eq!(preferences.language, "English");
        assert!(preferences.notifications);
    }
}
