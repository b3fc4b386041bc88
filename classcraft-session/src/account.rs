//! Account operations built on the session
//!
//! Login, registration and profile maintenance against the ClassCraft API.
//! Every call goes through the session's [`ApiClient`](crate::ApiClient).

use classcraft_core::{
    validation_error, ClassCraftError, ClassCraftResult, ErrorContext, Preferences, Role,
    SessionState, UserProfile,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::client::UploadProgress;
use crate::manager::SessionManager;

const AVATAR_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Login form
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Registration form
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// Editable profile fields
#[derive(Debug, Clone, Serialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    user: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvatarResponse {
    avatar_full_url: Option<String>,
    avatar_url: Option<String>,
    avatar: Option<String>,
}

/// Plain `{ "message": ... }` acknowledgement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordChange<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

fn require(value: &str, field: &str) -> ClassCraftResult<()> {
    if value.trim().is_empty() {
        return Err(validation_error!(
            format!("{} is required", field),
            field,
            "account"
        ));
    }
    Ok(())
}

/// Account API bound to a session
#[derive(Clone)]
pub struct AccountService {
    session: SessionManager,
}

impl AccountService {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Sign in and start a session
    pub async fn login(&self, credentials: &Credentials) -> ClassCraftResult<UserProfile> {
        require(&credentials.email, "email")?;
        require(&credentials.password, "password")?;

        let response: LoginResponse = self
            .session
            .client()
            .post_json("/auth/login", credentials)
            .await?;

        if response.token.is_empty() {
            return Err(ClassCraftError::Authentication {
                message: "Login response did not contain a token".to_string(),
                context: ErrorContext::new("account").with_operation("login"),
            });
        }

        if self.session.login(response.token, response.user) != SessionState::Authenticated {
            return Err(ClassCraftError::Authentication {
                message: "Server issued a token that has already expired".to_string(),
                context: ErrorContext::new("account")
                    .with_operation("login")
                    .with_suggestion("Check the system clock"),
            });
        }

        let user = self.session.user().unwrap_or_default();
        info!(email = ?user.email, role = ?user.role, "Logged in");
        Ok(user)
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, registration: &Registration) -> ClassCraftResult<MessageResponse> {
        require(&registration.name, "name")?;
        require(&registration.email, "email")?;
        require(&registration.password, "password")?;

        self.session
            .client()
            .post_json("/auth/register", registration)
            .await
    }

    /// Load the profile from the server and make it the session's user
    pub async fn fetch_profile(&self) -> ClassCraftResult<UserProfile> {
        let profile: UserProfile = self.session.client().get_json("/users/me").await?;
        self.session.set_user(Some(profile.clone()));
        Ok(profile)
    }

    /// Update name and email; the server's answer becomes the session's user
    pub async fn update_profile(&self, update: &ProfileUpdate) -> ClassCraftResult<UserProfile> {
        require(&update.name, "name")?;
        require(&update.email, "email")?;

        let updated: Option<UserProfile> =
            self.session.client().put_json("/users/me", update).await?;
        // An empty answer means the server accepted the fields as sent
        let user = updated.unwrap_or_else(|| UserProfile {
            name: Some(update.name.clone()),
            email: Some(update.email.clone()),
            ..self.session.user().unwrap_or_default()
        });
        self.session.set_user(Some(user.clone()));
        info!(email = ?user.email, "Profile updated");
        Ok(user)
    }

    /// Save preferences; a returned profile replaces the session's user
    pub async fn update_preferences(
        &self,
        preferences: &Preferences,
    ) -> ClassCraftResult<Option<UserProfile>> {
        let updated: Option<UserProfile> = self
            .session
            .client()
            .put_json("/users/me/preferences", preferences)
            .await?;

        if let Some(user) = &updated {
            self.session.set_user(Some(user.clone()));
        }
        Ok(updated)
    }

    /// Upload a new avatar; returns its absolute URL
    pub async fn upload_avatar(&self, path: &Path) -> ClassCraftResult<String> {
        self.upload_avatar_with_progress(path, None).await
    }

    /// [`AccountService::upload_avatar`] with a percentage callback
    pub async fn upload_avatar_with_progress(
        &self,
        path: &Path,
        progress: Option<UploadProgress>,
    ) -> ClassCraftResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("avatar");

        let response: AvatarResponse = self
            .session
            .client()
            .upload_file_with_progress(
                "/users/me/avatar",
                "avatar",
                file_name,
                bytes,
                AVATAR_UPLOAD_TIMEOUT,
                progress,
            )
            .await?;

        let avatar = response
            .avatar_full_url
            .or(response.avatar_url)
            .or(response.avatar)
            .ok_or_else(|| ClassCraftError::Internal {
                message: "Upload response did not include an avatar URL".to_string(),
                source: None,
                context: ErrorContext::new("account").with_operation("upload_avatar"),
            })?;

        if let Some(mut user) = self.session.user() {
            user.avatar_ref = Some(avatar.clone());
            self.session.set_user(Some(user));
        }

        Ok(self.session.client().resolve_asset_url(&avatar))
    }

    /// Change the password; the session ends on success
    pub async fn change_password(&self, current: &str, new: &str) -> ClassCraftResult<MessageResponse> {
        require(current, "current password")?;
        require(new, "new password")?;

        let response: MessageResponse = self
            .session
            .client()
            .put_json(
                "/users/change-password",
                &PasswordChange {
                    current_password: current,
                    new_password: new,
                },
            )
            .await?;

        self.session.logout();
        Ok(response)
    }

    /// Delete the account; the session ends on success
    pub async fn delete_account(&self) -> ClassCraftResult<()> {
        let _: serde_json::Value = self.session.client().delete_json("/users/me").await?;
        self.session.logout();
        Ok(())
    }
}
