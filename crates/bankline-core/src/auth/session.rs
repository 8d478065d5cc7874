use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RecoveryError;

/// Placeholder password marking a Google-authenticated user
pub const GOOGLE_OAUTH_SENTINEL: &str = "GOOGLE_OAUTH_USER_NO_PASSWORD";

/// Placeholder password marking a Facebook-authenticated user
pub const FACEBOOK_OAUTH_SENTINEL: &str = "FACEBOOK_OAUTH_USER_NO_PASSWORD";

/// Password the banking API expects from OAuth users
pub const OAUTH_API_PASSWORD: &str = "google_oauth_token";

/// Schema tag written with every record
pub const SCHEMA_VERSION: &str = "1.0";

/// Records older than this are rejected by every tier that checks age.
pub const SESSION_MAX_AGE_HOURS: i64 = 24;

/// Timestamps further than this ahead of the local clock are rejected.
pub const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Provider {
    Google,
    Facebook,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
        }
    }

    /// Parse a stored provider tag. Only the two known values are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Provider::Google),
            "facebook" => Some(Provider::Facebook),
            _ => None,
        }
    }

    /// The sentinel password used for users of this provider
    pub fn sentinel(&self) -> &'static str {
        match self {
            Provider::Google => GOOGLE_OAUTH_SENTINEL,
            Provider::Facebook => FACEBOOK_OAUTH_SENTINEL,
        }
    }

    /// Which provider a sentinel password belongs to, if it is one
    pub fn from_sentinel(password: &str) -> Option<Self> {
        match password {
            GOOGLE_OAUTH_SENTINEL => Some(Provider::Google),
            FACEBOOK_OAUTH_SENTINEL => Some(Provider::Facebook),
            _ => None,
        }
    }
}

/// True when `timestamp` lies more than the tolerated clock skew ahead of now
pub fn is_from_future(timestamp: DateTime<Utc>) -> bool {
    timestamp - Utc::now() > Duration::minutes(MAX_CLOCK_SKEW_MINUTES)
}

/// Check whether a password is one of the OAuth sentinels
pub fn is_oauth_sentinel(password: &str) -> bool {
    Provider::from_sentinel(password).is_some()
}

/// Reconstructed authentication state.
///
/// Serialized form (camelCase, timestamp in ms) is the backup blob format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub email: String,
    pub password: String,
    pub user: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl SessionRecord {
    /// Record for a user who signed in with email and password
    pub fn from_password(email: &str, password: &str) -> Self {
        Self {
            auth_token: None,
            email: email.to_string(),
            password: password.to_string(),
            user: serde_json::json!({ "email": email }),
            timestamp: Utc::now(),
            provider: None,
            version: default_version(),
        }
    }

    /// Record built from a successful OAuth token exchange.
    /// The profile must carry the user's email.
    pub fn from_oauth(
        provider: Provider,
        access_token: &str,
        profile: Value,
    ) -> Result<Self, RecoveryError> {
        if access_token.is_empty() {
            return Err(RecoveryError::IncompleteSession("access token".to_string()));
        }
        let email = profile
            .get("email")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| RecoveryError::InvalidUserData("profile has no email".to_string()))?
            .to_string();

        Ok(Self {
            auth_token: Some(access_token.to_string()),
            email,
            password: provider.sentinel().to_string(),
            user: profile,
            timestamp: Utc::now(),
            provider: Some(provider),
            version: default_version(),
        })
    }

    /// True when the password is an OAuth sentinel
    pub fn is_oauth(&self) -> bool {
        is_oauth_sentinel(&self.password)
    }

    pub fn has_real_password(&self) -> bool {
        !self.password.is_empty() && !self.is_oauth()
    }

    /// Email inside the profile payload, if any
    pub fn user_email(&self) -> Option<&str> {
        self.user.get("email").and_then(Value::as_str)
    }

    /// Password to send to the banking API
    pub fn api_password(&self) -> &str {
        if self.is_oauth() {
            OAUTH_API_PASSWORD
        } else {
            &self.password
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.timestamp
    }

    pub fn is_stale(&self) -> bool {
        self.age() > Duration::hours(SESSION_MAX_AGE_HOURS)
    }

    /// True when the timestamp lies beyond the tolerated clock skew
    pub fn is_from_future(&self) -> bool {
        is_from_future(self.timestamp)
    }

    /// Check the record invariant: identity present, a usable credential,
    /// profile consistency and provider for OAuth users, and freshness.
    pub fn validate(&self) -> Result<(), RecoveryError> {
        if self.email.is_empty() {
            return Err(RecoveryError::IncompleteSession("email".to_string()));
        }
        let has_token = self.auth_token.as_deref().is_some_and(|t| !t.is_empty());
        if !has_token && !self.has_real_password() {
            return Err(RecoveryError::IncompleteSession(
                "auth token or password".to_string(),
            ));
        }
        if self.is_oauth() {
            if self.user_email() != Some(self.email.as_str()) {
                return Err(RecoveryError::IntegrityMismatch);
            }
            if self.provider.is_none() {
                return Err(RecoveryError::InvalidProvider("none".to_string()));
            }
        }
        if self.is_from_future() {
            return Err(RecoveryError::InvalidTimestamp(
                self.timestamp.timestamp_millis().to_string(),
            ));
        }
        if self.is_stale() {
            return Err(RecoveryError::SessionExpired);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn oauth_record() -> SessionRecord {
        SessionRecord::from_oauth(
            Provider::Google,
            "tok1",
            json!({ "email": "a@b.com", "name": "A" }),
        )
        .unwrap()
    }

    #[test]
    fn test_provider_sentinels() {
        assert_eq!(Provider::from_sentinel(GOOGLE_OAUTH_SENTINEL), Some(Provider::Google));
        assert_eq!(Provider::from_sentinel(FACEBOOK_OAUTH_SENTINEL), Some(Provider::Facebook));
        assert_eq!(Provider::from_sentinel("hunter2"), None);
        assert_eq!(Provider::parse("google"), Some(Provider::Google));
        assert_eq!(Provider::parse("github"), None);
    }

    #[test]
    fn test_from_oauth_uses_provider_sentinel() {
        let record = SessionRecord::from_oauth(
            Provider::Facebook,
            "tok",
            json!({ "email": "f@b.com" }),
        )
        .unwrap();
        assert_eq!(record.password, FACEBOOK_OAUTH_SENTINEL);
        assert_eq!(record.provider, Some(Provider::Facebook));
        assert_eq!(record.version, SCHEMA_VERSION);
        assert!(record.is_valid());
    }

    #[test]
    fn test_from_oauth_requires_email_and_token() {
        assert!(SessionRecord::from_oauth(Provider::Google, "tok", json!({ "name": "x" })).is_err());
        assert!(SessionRecord::from_oauth(Provider::Google, "", json!({ "email": "a@b.com" })).is_err());
    }

    #[test]
    fn test_api_password_maps_sentinels() {
        assert_eq!(oauth_record().api_password(), OAUTH_API_PASSWORD);
        let pw = SessionRecord::from_password("a@b.com", "pw");
        assert_eq!(pw.api_password(), "pw");
    }

    #[test]
    fn test_password_user_without_token_is_valid() {
        let record = SessionRecord::from_password("a@b.com", "pw");
        assert!(record.auth_token.is_none());
        assert!(record.is_valid());
    }

    #[test]
    fn test_oauth_email_mismatch_is_rejected() {
        let mut record = oauth_record();
        record.user = json!({ "email": "other@b.com" });
        assert!(matches!(record.validate(), Err(RecoveryError::IntegrityMismatch)));
    }

    #[test]
    fn test_oauth_without_provider_is_rejected() {
        let mut record = oauth_record();
        record.provider = None;
        assert!(matches!(record.validate(), Err(RecoveryError::InvalidProvider(_))));
    }

    #[test]
    fn test_stale_record_is_rejected() {
        let mut record = oauth_record();
        record.timestamp = Utc::now() - Duration::hours(25);
        assert!(record.is_stale());
        assert!(matches!(record.validate(), Err(RecoveryError::SessionExpired)));

        record.timestamp = Utc::now() - Duration::hours(23);
        assert!(record.is_valid());
    }

    #[test]
    fn test_future_record_is_rejected() {
        let mut record = oauth_record();
        record.timestamp = Utc::now() + Duration::hours(48);
        assert!(record.is_from_future());
        assert!(matches!(record.validate(), Err(RecoveryError::InvalidTimestamp(_))));

        // Small drift between clocks is tolerated
        record.timestamp = Utc::now() + Duration::minutes(1);
        assert!(record.is_valid());
    }

    #[test]
    fn test_serialized_form_is_camel_case_millis() {
        let record = oauth_record();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["authToken"], "tok1");
        assert_eq!(value["timestamp"], record.timestamp.timestamp_millis());
        assert_eq!(value["provider"], "google");

        let back: SessionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.timestamp.timestamp_millis(), record.timestamp.timestamp_millis());
    }
}
