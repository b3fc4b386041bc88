//! ClassCraft Session - authentication state for the ClassCraft client
//!
//! - [`token`] decodes JWT claims for display and expiry
//! - [`store`] mirrors the session into durable storage
//! - [`client`] is the shared HTTP client with its interceptor chains
//! - [`manager`] owns the session and its expiry timer
//! - [`account`] wraps the login and profile endpoints

pub mod account;
pub mod client;
pub mod manager;
pub mod store;
pub mod token;

pub use account::{AccountService, Credentials, MessageResponse, ProfileUpdate, Registration};
pub use client::{
    ApiClient, DefaultHeaders, RequestInterceptor, ResponseInterceptor, UploadProgress,
};
pub use manager::{Session, SessionManager};
pub use store::{FileStore, MemoryStore, PersistentSessionStore, TOKEN_KEY, USER_KEY};
pub use token::{decode_claims, Claims};
