//! Client-side session handling for the Bankline web banking front-end.
//!
//! - `auth` - session records, the inactivity timer and session recovery
//! - `storage` - key/value scopes the session is persisted in
//! - `api` - the login and OAuth exchange calls that create sessions
//! - `config` - settings file and environment overrides

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

pub use config::Config;
