//! ClassCraft CLI - Command-line interface for the ClassCraft API
//!
//! Signs in, keeps the session on disk between runs and exposes the account
//! endpoints as subcommands.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use classcraft_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success,
    ClassCraftConfig, ClassCraftError, ClassCraftResult, ErrorContext, LoggingConfig, Navigator,
    Preferences, Role,
};
use classcraft_session::{
    AccountService, Credentials, ProfileUpdate, Registration, SessionManager, UploadProgress,
};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "classcraft")]
#[command(about = "Command-line client for the ClassCraft school platform")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        email: String,

        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,

        /// student, teacher or admin
        #[arg(short, long)]
        role: Option<Role>,
    },

    /// Create an account
    Register {
        name: String,
        email: String,

        #[arg(short, long)]
        password: Option<String>,

        #[arg(short, long, default_value = "student")]
        role: Role,
    },

    /// Show the stored session
    Whoami {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Fetch the profile from the server
    Profile,

    /// Change name or email; omitted fields keep their current value
    UpdateProfile {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },

    /// Change notification, theme or language preferences
    Preferences {
        #[arg(long)]
        notifications: Option<bool>,

        /// light or dark
        #[arg(long)]
        theme: Option<String>,

        #[arg(long)]
        language: Option<String>,
    },

    /// Upload a new avatar image
    Avatar {
        file: PathBuf,

        /// Don't print upload progress
        #[arg(short, long)]
        quiet: bool,
    },

    /// Change the password (signs out on success)
    Password {
        #[arg(long)]
        current: Option<String>,

        #[arg(long)]
        new: Option<String>,
    },

    /// Delete the account (signs out on success)
    DeleteAccount {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// GET an API path with the session's credentials and print the JSON
    Get { path: String },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Set a configuration value (key=value format)
        #[arg(long)]
        set: Option<String>,

        /// Get a configuration value
        #[arg(long)]
        get: Option<String>,

        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

/// Tells the user to sign in again when the session ends
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, route: &str) {
        info!(route = route, "Session ended");
        eprintln!("Session ended. Sign in again with `classcraft login`.");
    }
}

#[derive(Serialize)]
struct WhoAmI {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<classcraft_core::UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<i64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            for hint in error_hints(&e) {
                eprintln!("  hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Logs a ClassCraft error and collects what the user can do about it
fn error_hints(err: &anyhow::Error) -> Vec<String> {
    let Some(err) = err.chain().find_map(|e| e.downcast_ref::<ClassCraftError>()) else {
        return Vec::new();
    };
    err.log();

    let mut hints: Vec<String> = err
        .context()
        .map(|c| c.recovery_suggestions.clone())
        .unwrap_or_default();
    if err.is_recoverable() {
        hints.push("This may be temporary; try again shortly".to_string());
    }
    if err.is_unauthorized() {
        hints.push("Sign in again with `classcraft login`".to_string());
    }
    hints
}

async fn run(cli: Cli) -> anyhow::Result<()> {

    let logging_config = if cli.verbose {
        LoggingConfig {
            level: "debug".to_string(),
            ..LoggingConfig::verbose()
        }
    } else {
        LoggingConfig::default()
    };

    init_logging(&logging_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting ClassCraft CLI v{}", env!("CARGO_PKG_VERSION"));

    if let Commands::Config {
        show,
        init,
        set,
        get,
        reset,
        validate,
    } = &cli.command
    {
        handle_config(
            cli.config.as_ref(),
            *show,
            *init,
            set.as_deref(),
            get.as_deref(),
            *reset,
            *validate,
        )
        .await?;
        return Ok(());
    }

    let config = load_config(cli.config.as_ref())
        .await
        .context("Failed to load configuration")?;
    config.validate()?;

    let session = SessionManager::from_config(&config, Arc::new(TerminalNavigator))
        .context("Failed to open session")?;
    let account = AccountService::new(session.clone());

    match cli.command {
        Commands::Login {
            email,
            password,
            role,
        } => {
            let password = match password {
                Some(password) => password,
                None => prompt("Password")?,
            };
            handle_login(&account, email, password, role).await?;
        }
        Commands::Register {
            name,
            email,
            password,
            role,
        } => {
            let password = match password {
                Some(password) => password,
                None => prompt("Password")?,
            };
            let response = account
                .register(&Registration {
                    name,
                    email,
                    password,
                    role,
                })
                .await?;
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "Account created".to_string())
            );
            println!("Sign in with `classcraft login`.");
        }
        Commands::Whoami { json } => handle_whoami(&session, json)?,
        Commands::Logout => {
            session.logout();
            println!("Signed out");
        }
        Commands::Profile => {
            require_session(&session)?;
            let profile = account.fetch_profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Commands::UpdateProfile { name, email } => {
            require_session(&session)?;
            if name.is_none() && email.is_none() {
                bail!("Nothing to update; pass --name and/or --email");
            }
            let current = session.user().unwrap_or_default();
            let update = ProfileUpdate {
                name: name.or(current.name).unwrap_or_default(),
                email: email.or(current.email).unwrap_or_default(),
            };
            let user = account.update_profile(&update).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Preferences {
            notifications,
            theme,
            language,
        } => {
            require_session(&session)?;
            let current = session
                .user()
                .and_then(|user| user.preferences)
                .unwrap_or_default();
            let preferences = Preferences {
                notifications: notifications.unwrap_or(current.notifications),
                theme: theme.unwrap_or(current.theme),
                language: language.unwrap_or(current.language),
            };
            match account.update_preferences(&preferences).await? {
                Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                None => println!("Preferences saved"),
            }
        }
        Commands::Avatar { file, quiet } => {
            require_session(&session)?;
            log_operation_start!("upload_avatar", file = ?file);
            let progress = (!quiet).then(progress_printer);
            let url = account
                .upload_avatar_with_progress(&file, progress)
                .await
                .map_err(|e| {
                    log_operation_error!("upload_avatar", e);
                    e
                })?;
            if !quiet {
                eprintln!();
            }
            log_operation_success!("upload_avatar");
            println!("Avatar updated: {}", url);
        }
        Commands::Password { current, new } => {
            require_session(&session)?;
            let current = match current {
                Some(current) => current,
                None => prompt("Current password")?,
            };
            let new = match new {
                Some(new) => new,
                None => prompt("New password")?,
            };
            let response = account.change_password(&current, &new).await?;
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "Password changed".to_string())
            );
            println!("Signed out; sign in with the new password.");
        }
        Commands::DeleteAccount { yes } => {
            require_session(&session)?;
            if !yes {
                bail!("Refusing to delete the account without --yes");
            }
            account.delete_account().await?;
            println!("Account deleted");
        }
        Commands::Get { path } => {
            let body: serde_json::Value = session.client().get_json(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn handle_login(
    account: &AccountService,
    email: String,
    password: String,
    role: Option<Role>,
) -> ClassCraftResult<()> {
    log_operation_start!("login", email = %email);

    let user = account
        .login(&Credentials {
            email,
            password,
            role,
        })
        .await
        .map_err(|e| {
            log_operation_error!("login", e);
            e
        })?;

    let name = user
        .name
        .clone()
        .or(user.email.clone())
        .unwrap_or_else(|| "unknown user".to_string());
    match user.role {
        Some(role) => println!(
            "Signed in as {} ({}); dashboard: {}",
            name,
            role,
            role.dashboard_route()
        ),
        None => println!("Signed in as {}", name),
    }

    log_operation_success!("login");
    Ok(())
}

fn handle_whoami(session: &SessionManager, json: bool) -> anyhow::Result<()> {
    let snapshot = session.snapshot();
    let report = WhoAmI {
        authenticated: snapshot.token.is_some(),
        user: snapshot.user,
        expires_at_ms: snapshot.expires_at_ms,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !report.authenticated {
        println!("Not signed in");
        return Ok(());
    }

    let user = report.user.unwrap_or_default();
    println!("Name:  {}", user.name.as_deref().unwrap_or("-"));
    println!("Email: {}", user.email.as_deref().unwrap_or("-"));
    println!(
        "Role:  {}",
        user.role.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
    );
    if let Some(avatar) = &user.avatar_ref {
        println!("Avatar: {}", session.client().resolve_asset_url(avatar));
    }
    if let Some(expires_at_ms) = report.expires_at_ms {
        println!("Expires in {}s", (expires_at_ms - now_ms()).max(0) / 1000);
    }
    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Prints each new whole percentage on one stderr line
fn progress_printer() -> UploadProgress {
    let last = AtomicU8::new(u8::MAX);
    Arc::new(move |percent| {
        if last.swap(percent, Ordering::Relaxed) != percent {
            eprint!("\rUploading... {:>3}%", percent);
            let _ = io::stderr().flush();
        }
    })
}

fn require_session(session: &SessionManager) -> anyhow::Result<()> {
    if !session.is_authenticated() {
        bail!("Not signed in. Run `classcraft login` first.");
    }
    Ok(())
}

fn prompt(label: &str) -> anyhow::Result<String> {
    eprint!("{}: ", label);
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn load_config(config_path: Option<&PathBuf>) -> ClassCraftResult<ClassCraftConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from {:?}", path);
        return ClassCraftConfig::from_file(path);
    }

    let default_paths = [
        Some(PathBuf::from("classcraft.toml")),
        dirs::config_dir().map(|d| d.join("classcraft").join("config.toml")),
        dirs::home_dir().map(|d| d.join(".classcraft").join("config.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            info!("Loading configuration from {:?}", path);
            return ClassCraftConfig::from_file(path);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(ClassCraftConfig::default())
}

async fn handle_config(
    config_path: Option<&PathBuf>,
    show: bool,
    init: bool,
    set: Option<&str>,
    get: Option<&str>,
    reset: bool,
    validate: bool,
) -> ClassCraftResult<()> {
    let target = match config_path {
        Some(path) => path.clone(),
        None => get_config_path()?,
    };

    if init || reset {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        ClassCraftConfig::default().save_to_file(&target)?;
        if init {
            println!("Configuration initialized at: {:?}", target);
        } else {
            println!("Configuration reset to defaults at: {:?}", target);
        }
    }

    if show {
        let config = load_config(config_path).await?;
        let rendered = toml::to_string_pretty(&config).map_err(|e| ClassCraftError::Config {
            message: format!("Failed to render config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config_show"),
        })?;
        println!("{}", rendered);
    }

    if validate {
        let config = load_config(config_path).await?;
        match config.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(e) => {
                println!("Configuration validation failed: {}", e);
                return Err(e);
            }
        }
    }

    if let Some(key_value) = set {
        let Some((key, value)) = key_value.split_once('=') else {
            return Err(ClassCraftError::Config {
                message: "Invalid format. Use key=value format".to_string(),
                source: None,
                context: ErrorContext::new("config_set")
                    .with_suggestion("Example: --set api.host=localhost"),
            });
        };
        set_config_value(&target, key.trim(), value.trim()).await?;
        println!("Set {} = {}", key.trim(), value.trim());
    }

    if let Some(key) = get {
        let config = load_config(config_path).await?;
        println!("{} = {}", key, get_config_value(&config, key)?);
    }

    Ok(())
}

/// Get the default configuration file path
fn get_config_path() -> ClassCraftResult<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .map(|d| d.join("classcraft").join("config.toml"))
        .ok_or_else(|| ClassCraftError::Config {
            message: "Could not determine a configuration directory".to_string(),
            source: None,
            context: ErrorContext::new("config").with_suggestion("Pass --config <path>"),
        })
}

fn unknown_key(key: &str, component: &str) -> ClassCraftError {
    ClassCraftError::Config {
        message: format!("Unknown configuration key: {}", key),
        source: None,
        context: ErrorContext::new(component)
            .with_suggestion("Use --show to see available configuration keys"),
    }
}

/// Set a configuration value
async fn set_config_value(path: &Path, key: &str, value: &str) -> ClassCraftResult<()> {
    let mut config = if path.exists() {
        ClassCraftConfig::from_file(path)?
    } else {
        ClassCraftConfig::default()
    };

    let optional = |value: &str| (!value.is_empty()).then(|| value.to_string());

    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["api", "base_url"] => config.api.base_url = optional(value),
        ["api", "host"] => config.api.host = optional(value),
        ["api", "timeout_seconds"] => {
            config.api.timeout_seconds = value.parse().map_err(|_| ClassCraftError::Config {
                message: format!("Invalid integer value: {}", value),
                source: None,
                context: ErrorContext::new("config_set"),
            })?;
        }
        ["api", "user_agent"] => config.api.user_agent = value.to_string(),
        ["storage", "session_file"] => {
            config.storage.session_file = optional(value).map(PathBuf::from)
        }
        ["session", "login_route"] => config.session.login_route = value.to_string(),
        _ => return Err(unknown_key(key, "config_set")),
    }

    config.validate()?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    config.save_to_file(path)
}

/// Get a configuration value
fn get_config_value(config: &ClassCraftConfig, key: &str) -> ClassCraftResult<String> {
    let parts: Vec<&str> = key.split('.').collect();
    let value = match parts.as_slice() {
        ["api", "base_url"] => config.api.resolve_base_url(),
        ["api", "host"] => config.api.host.clone().unwrap_or_default(),
        ["api", "timeout_seconds"] => config.api.timeout_seconds.to_string(),
        ["api", "user_agent"] => config.api.user_agent.clone(),
        ["storage", "session_file"] => config.storage.session_file_path().display().to_string(),
        ["session", "login_route"] => config.session.login_route.clone(),
        _ => return Err(unknown_key(key, "config_get")),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_hints_include_suggestions() {
        let err = anyhow::Error::new(classcraft_core::config_error!("Missing base URL", "config"))
            .context("Failed to load configuration");
        let hints = error_hints(&err);
        assert!(hints.iter().any(|h| h.contains("config --init")));
    }

    #[test]
    fn test_error_hints_for_temporary_failures() {
        let err = anyhow::Error::new(ClassCraftError::Http {
            status: 503,
            message: "Service unavailable".to_string(),
            context: ErrorContext::new("api_client"),
        });
        let hints = error_hints(&err);
        assert!(hints.iter().any(|h| h.contains("try again")));
    }

    #[test]
    fn test_error_hints_for_expired_session() {
        let err = anyhow::Error::new(ClassCraftError::Http {
            status: 401,
            message: "Unauthorized".to_string(),
            context: ErrorContext::new("api_client"),
        });
        let hints = error_hints(&err);
        assert!(hints.iter().any(|h| h.contains("classcraft login")));
        assert!(!hints.iter().any(|h| h.contains("try again")));
    }

    #[test]
    fn test_now_ms_is_unix_millis() {
        let before = chrono::Utc::now().timestamp_millis();
        let now = now_ms();
        assert!(now >= before);
        assert!(now - before < 1_000);
    }

    #[test]
    fn test_error_hints_ignore_other_errors() {
        assert!(error_hints(&anyhow::anyhow!("Refusing to delete")).is_empty());
    }
}
