//! HTTP client for the banking API.
//!
//! Only the calls that produce a `SessionRecord` live here: password
//! login and the Google OAuth code exchange. Balance and transfer
//! endpoints consume an established session and are not modeled.

pub mod client;
pub mod error;

pub use client::BankClient;
pub use error::ApiError;
