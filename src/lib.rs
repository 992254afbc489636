pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;
pub mod store;

pub use error::ApiError;
pub use store::{CredentialStore, StoreError, UserProfile};
