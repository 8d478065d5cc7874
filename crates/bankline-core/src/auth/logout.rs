use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Url;
use tracing::info;

use super::SessionRecovery;

/// Reason given to the login view after an inactivity timeout
pub const INACTIVITY_REASON: &str = "Session expired due to inactivity";

/// Capability to send the user somewhere else (a login view, a page).
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str);
}

/// Default expiry handling: wipe every session key, then send the user
/// to the login view with a human-readable reason.
#[derive(Clone)]
pub struct LogoutRedirect {
    recovery: SessionRecovery,
    navigator: Arc<dyn Navigator>,
    login_url: Url,
}

impl LogoutRedirect {
    pub fn new(
        recovery: SessionRecovery,
        navigator: Arc<dyn Navigator>,
        login_url: &str,
    ) -> Result<Self> {
        let login_url = Url::parse(login_url)
            .with_context(|| format!("Invalid login URL: {}", login_url))?;
        Ok(Self {
            recovery,
            navigator,
            login_url,
        })
    }

    /// Login URL carrying `reason` as its `message` query parameter
    pub fn login_url_for(&self, reason: &str) -> String {
        let mut url = self.login_url.clone();
        url.query_pairs_mut().append_pair("message", reason);
        url.to_string()
    }

    pub fn execute(&self, reason: &str) {
        self.recovery.clear_all_session_data();
        let url = self.login_url_for(reason);
        info!(reason, "Redirecting to login");
        self.navigator.navigate(&url);
    }
}

impl fmt::Debug for LogoutRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogoutRedirect")
            .field("login_url", &self.login_url.as_str())
            .finish_non_exhaustive()
    }
}
