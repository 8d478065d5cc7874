//! Session recovery after a redirect round trip.
//!
//! A full-page OAuth redirect throws away in-memory state, so a session is
//! written to several places and read back through an ordered chain of
//! tiers. Each tier validates independently; the first success wins:
//!
//! 1. Primary: the canonical keys in the ephemeral scope
//! 2. Backup: one serialized blob in the ephemeral scope, restored into
//!    the primary keys on success
//! 3. Persistent: token, email and profile in the persistent scope
//! 4. Recent OAuth: a short-lived exchange result in the persistent scope
//!
//! Tier failures are logged and demoted; `recover` always returns a result.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::session::{
    is_from_future, is_oauth_sentinel, Provider, SessionRecord, SCHEMA_VERSION, SESSION_MAX_AGE_HOURS,
};
use super::RecoveryError;
use crate::storage::{keys, KeyValueStore, SessionStores, StorageError};

/// Exchange results older than this are not trusted by the recent-OAuth tier.
const RECENT_OAUTH_MAX_AGE_MINUTES: i64 = 5;

/// Which tier produced a `RecoveryResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum RecoverySource {
    Primary,
    Backup,
    /// Persistent and recent-OAuth tiers
    #[serde(rename = "localStorage")]
    Persistent,
    None,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RecoveryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SessionRecord>,
    /// Email found in the persistent scope when nothing else could be
    /// recovered; used to pre-fill a sign-in form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source: RecoverySource,
}

impl RecoveryResult {
    fn recovered(record: SessionRecord, source: RecoverySource) -> Self {
        Self {
            success: true,
            data: Some(record),
            partial_email: None,
            error: None,
            source,
        }
    }

    fn unrecoverable(partial_email: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            partial_email,
            error: Some("No recoverable session found".to_string()),
            source: RecoverySource::None,
        }
    }

    pub fn into_record(self) -> Option<SessionRecord> {
        self.data
    }
}

/// Backup blob as stored. Every field is optional so that a damaged blob
/// is reported field by field instead of as a parse error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupBlob {
    auth_token: Option<String>,
    email: Option<String>,
    password: Option<String>,
    user: Option<Value>,
    timestamp: Option<i64>,
    provider: Option<String>,
    version: Option<String>,
}

/// Result of an OAuth token exchange, kept briefly in the persistent scope
/// so a reload right after the exchange still finds the session.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentOAuthResult {
    email: Option<String>,
    access_token: Option<String>,
    #[serde(default)]
    user: Option<Value>,
    timestamp: Option<i64>,
    /// Absent in results written by the Google callback
    #[serde(default)]
    provider: Option<String>,
}

/// Reads and writes session records across both storage scopes.
/// Clone is cheap - the scopes are shared handles.
#[derive(Debug, Clone)]
pub struct SessionRecovery {
    stores: SessionStores,
}

impl SessionRecovery {
    pub fn new(stores: SessionStores) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &SessionStores {
        &self.stores
    }

    /// Run the fallback chain and return the first valid record.
    pub fn recover(&self) -> RecoveryResult {
        debug!("Attempting session recovery");

        match self.check_primary() {
            Ok(record) => {
                info!(source = "primary", "Session recovered");
                return RecoveryResult::recovered(record, RecoverySource::Primary);
            }
            Err(e) => debug!(tier = "primary", error = %e, "Recovery tier failed"),
        }

        match self.check_backup() {
            Ok(record) => {
                info!(source = "backup", "Session recovered from backup, primary restored");
                return RecoveryResult::recovered(record, RecoverySource::Backup);
            }
            Err(e) => debug!(tier = "backup", error = %e, "Recovery tier failed"),
        }

        let partial_email = match self.check_persistent() {
            Ok(record) => {
                info!(source = "persistent", "Session recovered from persistent scope");
                return RecoveryResult::recovered(record, RecoverySource::Persistent);
            }
            Err(e) => {
                debug!(tier = "persistent", error = %e, "Recovery tier failed");
                self.persistent_email()
            }
        };

        match self.check_recent_oauth() {
            Ok(record) => {
                info!(source = "recent_oauth", "Session recovered from recent OAuth result");
                return RecoveryResult::recovered(record, RecoverySource::Persistent);
            }
            Err(e) => debug!(tier = "recent_oauth", error = %e, "Recovery tier failed"),
        }

        warn!(
            partial = partial_email.is_some(),
            "No recoverable session found"
        );
        RecoveryResult::unrecoverable(partial_email)
    }

    /// Health check: would `recover` succeed right now?
    pub fn validate_session_integrity(&self) -> bool {
        self.recover().success
    }

    /// Persist a freshly established session to every tier that can
    /// later recover it, then read the primary keys back to verify.
    pub fn store_session(&self, record: &SessionRecord) -> Result<(), RecoveryError> {
        record.validate()?;

        self.write_primary(record)?;
        let backup = serde_json::to_string(record).map_err(StorageError::from)?;
        self.stores
            .ephemeral()
            .set(keys::OAUTH_SESSION_BACKUP, &backup)?;

        if record.is_oauth() {
            if let Some(ref token) = record.auth_token {
                let persistent = self.stores.persistent();
                persistent.set(keys::AUTH_TOKEN, token)?;
                persistent.set(keys::EMAIL, &record.email)?;
                persistent.set(keys::USER, &record.user.to_string())?;
                let provider = record
                    .provider
                    .or_else(|| Provider::from_sentinel(&record.password))
                    .map(|p| p.as_str().to_string());
                if let Some(ref provider) = provider {
                    persistent.set(keys::PROVIDER, provider)?;
                }

                let recent = RecentOAuthResult {
                    email: Some(record.email.clone()),
                    access_token: Some(token.clone()),
                    user: Some(record.user.clone()),
                    timestamp: Some(record.timestamp.timestamp_millis()),
                    provider,
                };
                let recent = serde_json::to_string(&recent).map_err(StorageError::from)?;
                persistent.set(keys::OAUTH_RESULT, &recent)?;
            }
        }

        self.verify_primary(record)?;
        info!(
            provider = record.provider.map(|p| p.as_str()).unwrap_or("password"),
            "Session stored"
        );
        Ok(())
    }

    /// Remove every key any tier uses, in both scopes. Never fails;
    /// storage errors are logged and the remaining keys still removed.
    pub fn clear_all_session_data(&self) {
        let scopes: [(&str, &dyn KeyValueStore, &[&str]); 2] = [
            ("ephemeral", self.stores.ephemeral(), &keys::EPHEMERAL_KEYS),
            ("persistent", self.stores.persistent(), &keys::PERSISTENT_KEYS),
        ];

        for (scope, store, scope_keys) in scopes {
            for key in scope_keys {
                if let Err(e) = store.remove(key) {
                    warn!(scope, key, error = %e, "Failed to clear session key");
                }
            }
        }
        info!("All session data cleared");
    }

    // ===== Tier 1: Primary =====

    fn check_primary(&self) -> Result<SessionRecord, RecoveryError> {
        let store = self.stores.ephemeral();
        let auth_token = read(store, keys::AUTH_TOKEN)?;
        let email = read(store, keys::EMAIL)?;
        let password = read(store, keys::PASSWORD)?;
        let user = read(store, keys::USER)?;
        let timestamp = read(store, keys::TIMESTAMP)?;
        let provider = read(store, keys::PROVIDER)?;
        let version = read(store, keys::VERSION)?;

        let missing = missing_fields(&[
            (keys::EMAIL, email.is_none()),
            (keys::PASSWORD, password.is_none()),
            (keys::USER, user.is_none()),
        ]);
        let (Some(email), Some(password), Some(user)) = (email, password, user) else {
            return Err(RecoveryError::IncompleteSession(missing));
        };

        // OAuth users have no password to fall back on
        let is_oauth = is_oauth_sentinel(&password);
        if auth_token.is_none() && is_oauth {
            return Err(RecoveryError::IncompleteSession(keys::AUTH_TOKEN.to_string()));
        }

        let user: Value = serde_json::from_str(&user)
            .map_err(|e| RecoveryError::InvalidUserData(e.to_string()))?;
        if !user.is_object() {
            return Err(RecoveryError::InvalidUserData("user is not an object".to_string()));
        }

        if is_oauth {
            check_integrity(&user, &email)?;
        }

        let timestamp = match timestamp {
            Some(raw) => {
                let parsed = raw
                    .parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis)
                    .ok_or(RecoveryError::InvalidTimestamp(raw))?;
                check_age(parsed)?;
                parsed
            }
            None => Utc::now(),
        };

        let provider = match (is_oauth, provider) {
            (true, Some(raw)) => {
                Some(Provider::parse(&raw).ok_or(RecoveryError::InvalidProvider(raw))?)
            }
            (true, None) => return Err(RecoveryError::InvalidProvider("missing".to_string())),
            (false, raw) => raw.as_deref().and_then(Provider::parse),
        };

        Ok(SessionRecord {
            auth_token,
            email,
            password,
            user,
            timestamp,
            provider,
            version: version.unwrap_or_else(|| SCHEMA_VERSION.to_string()),
        })
    }

    fn write_primary(&self, record: &SessionRecord) -> Result<(), RecoveryError> {
        let store = self.stores.ephemeral();
        match record.auth_token {
            Some(ref token) => store.set(keys::AUTH_TOKEN, token)?,
            None => store.remove(keys::AUTH_TOKEN)?,
        }
        store.set(keys::EMAIL, &record.email)?;
        store.set(keys::PASSWORD, &record.password)?;
        store.set(keys::USER, &record.user.to_string())?;
        store.set(keys::TIMESTAMP, &record.timestamp.timestamp_millis().to_string())?;

        let provider = record
            .provider
            .or_else(|| Provider::from_sentinel(&record.password));
        match provider {
            Some(p) => store.set(keys::PROVIDER, p.as_str())?,
            None => store.remove(keys::PROVIDER)?,
        }
        store.set(keys::VERSION, &record.version)?;
        Ok(())
    }

    fn verify_primary(&self, record: &SessionRecord) -> Result<(), RecoveryError> {
        let store = self.stores.ephemeral();
        if record.auth_token.is_some() && read(store, keys::AUTH_TOKEN)? != record.auth_token {
            return Err(RecoveryError::VerificationFailed(keys::AUTH_TOKEN));
        }
        if read(store, keys::EMAIL)?.as_deref() != Some(record.email.as_str()) {
            return Err(RecoveryError::VerificationFailed(keys::EMAIL));
        }
        if read(store, keys::USER)?.is_none() {
            return Err(RecoveryError::VerificationFailed(keys::USER));
        }
        if read(store, keys::TIMESTAMP)?.is_none() {
            return Err(RecoveryError::VerificationFailed(keys::TIMESTAMP));
        }
        Ok(())
    }

    // ===== Tier 2: Backup =====

    fn check_backup(&self) -> Result<SessionRecord, RecoveryError> {
        let raw = read(self.stores.ephemeral(), keys::OAUTH_SESSION_BACKUP)?
            .ok_or_else(|| RecoveryError::NotFound(keys::OAUTH_SESSION_BACKUP.to_string()))?;
        let blob: BackupBlob = serde_json::from_str(&raw).map_err(|e| RecoveryError::Malformed {
            key: keys::OAUTH_SESSION_BACKUP,
            reason: e.to_string(),
        })?;

        let auth_token = blob.auth_token.filter(|s| !s.is_empty());
        let email = blob.email.filter(|s| !s.is_empty());
        let password = blob.password.filter(|s| !s.is_empty());
        // Same credential rule as the primary tier: only OAuth users need a token
        let is_oauth = password.as_deref().is_some_and(is_oauth_sentinel);
        let missing = missing_fields(&[
            (keys::AUTH_TOKEN, is_oauth && auth_token.is_none()),
            (keys::EMAIL, email.is_none()),
            (keys::PASSWORD, password.is_none()),
            (keys::USER, blob.user.is_none()),
        ]);
        let (Some(email), Some(password), Some(user)) = (email, password, blob.user) else {
            return Err(RecoveryError::IncompleteSession(missing));
        };
        if is_oauth && auth_token.is_none() {
            return Err(RecoveryError::IncompleteSession(missing));
        }
        if !user.is_object() {
            return Err(RecoveryError::InvalidUserData("user is not an object".to_string()));
        }

        let timestamp = match blob.timestamp {
            Some(ms) => {
                let parsed = DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| RecoveryError::InvalidTimestamp(ms.to_string()))?;
                check_age(parsed)?;
                parsed
            }
            None => Utc::now(),
        };

        // The restored primary keys must pass the primary tier later on
        if is_oauth {
            check_integrity(&user, &email)?;
        }

        let provider = blob
            .provider
            .as_deref()
            .and_then(Provider::parse)
            .or_else(|| Provider::from_sentinel(&password));

        let record = SessionRecord {
            auth_token,
            email,
            password,
            user,
            timestamp,
            provider,
            version: blob.version.unwrap_or_else(|| SCHEMA_VERSION.to_string()),
        };

        // Self-heal before handing control back
        self.write_primary(&record)?;
        Ok(record)
    }

    // ===== Tier 3: Persistent =====

    fn check_persistent(&self) -> Result<SessionRecord, RecoveryError> {
        let store = self.stores.persistent();
        let auth_token = read(store, keys::AUTH_TOKEN)?;
        let email = read(store, keys::EMAIL)?;
        let user = read(store, keys::USER)?;

        let (Some(auth_token), Some(email), Some(user)) = (&auth_token, &email, &user) else {
            if auth_token.is_none() && email.is_none() && user.is_none() {
                return Err(RecoveryError::NotFound("persistent scope".to_string()));
            }
            return Err(RecoveryError::IncompleteSession(missing_fields(&[
                (keys::AUTH_TOKEN, auth_token.is_none()),
                (keys::EMAIL, email.is_none()),
                (keys::USER, user.is_none()),
            ])));
        };

        let user: Value = serde_json::from_str(user)
            .map_err(|e| RecoveryError::InvalidUserData(e.to_string()))?;
        check_integrity(&user, email)?;
        let provider = stored_provider(read(store, keys::PROVIDER)?)?;

        // TODO: confirm the token with the API before treating this tier as authoritative
        Ok(SessionRecord {
            auth_token: Some(auth_token.clone()),
            email: email.clone(),
            password: provider.sentinel().to_string(),
            user,
            timestamp: Utc::now(),
            provider: Some(provider),
            version: SCHEMA_VERSION.to_string(),
        })
    }

    /// Email left in the persistent scope, for pre-filling a sign-in form
    fn persistent_email(&self) -> Option<String> {
        match read(self.stores.persistent(), keys::EMAIL) {
            Ok(email) => email,
            Err(e) => {
                debug!(error = %e, "Failed to read persistent email");
                None
            }
        }
    }

    // ===== Tier 4: Recent OAuth =====

    fn check_recent_oauth(&self) -> Result<SessionRecord, RecoveryError> {
        let raw = read(self.stores.persistent(), keys::OAUTH_RESULT)?
            .ok_or_else(|| RecoveryError::NotFound(keys::OAUTH_RESULT.to_string()))?;
        let result: RecentOAuthResult =
            serde_json::from_str(&raw).map_err(|e| RecoveryError::Malformed {
                key: keys::OAUTH_RESULT,
                reason: e.to_string(),
            })?;

        let timestamp = result
            .timestamp
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| RecoveryError::InvalidTimestamp("missing".to_string()))?;
        check_not_future(timestamp)?;
        if Utc::now() - timestamp >= Duration::minutes(RECENT_OAUTH_MAX_AGE_MINUTES) {
            return Err(RecoveryError::SessionExpired);
        }

        let email = result.email.filter(|s| !s.is_empty());
        let access_token = result.access_token.filter(|s| !s.is_empty());
        let missing = missing_fields(&[
            (keys::EMAIL, email.is_none()),
            ("accessToken", access_token.is_none()),
        ]);
        let (Some(email), Some(access_token)) = (email, access_token) else {
            return Err(RecoveryError::IncompleteSession(missing));
        };

        let user = result
            .user
            .unwrap_or_else(|| serde_json::json!({ "email": email }));
        if user.get("email").is_some() {
            check_integrity(&user, &email)?;
        }
        let provider = stored_provider(result.provider)?;

        Ok(SessionRecord {
            auth_token: Some(access_token),
            email,
            password: provider.sentinel().to_string(),
            user,
            timestamp,
            provider: Some(provider),
            version: SCHEMA_VERSION.to_string(),
        })
    }
}

/// Read a key, treating empty strings as absent
fn read(store: &dyn KeyValueStore, key: &str) -> Result<Option<String>, StorageError> {
    Ok(store.get(key)?.filter(|v| !v.is_empty()))
}

/// Provider tag of a persistent-scope record. Records from before the tag
/// was written all came from Google sign-in.
fn stored_provider(raw: Option<String>) -> Result<Provider, RecoveryError> {
    match raw {
        Some(raw) => Provider::parse(&raw).ok_or(RecoveryError::InvalidProvider(raw)),
        None => Ok(Provider::Google),
    }
}

fn check_integrity(user: &Value, email: &str) -> Result<(), RecoveryError> {
    match user.get("email").and_then(Value::as_str) {
        Some(user_email) if user_email == email => Ok(()),
        _ => Err(RecoveryError::IntegrityMismatch),
    }
}

fn check_not_future(timestamp: DateTime<Utc>) -> Result<(), RecoveryError> {
    if is_from_future(timestamp) {
        return Err(RecoveryError::InvalidTimestamp(
            timestamp.timestamp_millis().to_string(),
        ));
    }
    Ok(())
}

fn check_age(timestamp: DateTime<Utc>) -> Result<(), RecoveryError> {
    check_not_future(timestamp)?;
    if Utc::now() - timestamp > Duration::hours(SESSION_MAX_AGE_HOURS) {
        return Err(RecoveryError::SessionExpired);
    }
    Ok(())
}

fn missing_fields(fields: &[(&str, bool)]) -> String {
    fields
        .iter()
        .filter(|(_, missing)| *missing)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::{FACEBOOK_OAUTH_SENTINEL, GOOGLE_OAUTH_SENTINEL};
    use crate::storage::{FileStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn write_primary_keys(stores: &SessionStores, pairs: &[(&str, String)]) {
        for (key, value) in pairs {
            stores.ephemeral().set(key, value).unwrap();
        }
    }

    fn fresh_login(stores: &SessionStores, token: &str) {
        write_primary_keys(
            stores,
            &[
                (keys::EMAIL, "a@b.com".to_string()),
                (keys::AUTH_TOKEN, token.to_string()),
                (keys::PASSWORD, "pw".to_string()),
                (keys::USER, json!({ "email": "a@b.com" }).to_string()),
                (keys::TIMESTAMP, now_ms().to_string()),
            ],
        );
    }

    fn backup_blob(token: &str, age: Duration) -> String {
        json!({
            "authToken": token,
            "email": "g@b.com",
            "password": GOOGLE_OAUTH_SENTINEL,
            "user": { "email": "g@b.com", "name": "G" },
            "timestamp": (Utc::now() - age).timestamp_millis(),
            "provider": "google",
            "version": "1.0",
        })
        .to_string()
    }

    fn assert_all_keys_absent(stores: &SessionStores) {
        for key in keys::EPHEMERAL_KEYS {
            assert_eq!(stores.ephemeral().get(key).unwrap(), None, "ephemeral {}", key);
        }
        for key in keys::PERSISTENT_KEYS {
            assert_eq!(stores.persistent().get(key).unwrap(), None, "persistent {}", key);
        }
    }

    #[test]
    fn test_fresh_login_recovers_from_primary() {
        let stores = SessionStores::in_memory();
        fresh_login(&stores, "tok1");

        let result = SessionRecovery::new(stores).recover();
        assert!(result.success);
        assert_eq!(result.source, RecoverySource::Primary);
        let record = result.into_record().unwrap();
        assert_eq!(record.email, "a@b.com");
        assert_eq!(record.auth_token.as_deref(), Some("tok1"));
        assert_eq!(record.password, "pw");
    }

    #[test]
    fn test_primary_wins_over_backup() {
        let stores = SessionStores::in_memory();
        fresh_login(&stores, "primary-token");
        stores
            .ephemeral()
            .set(keys::OAUTH_SESSION_BACKUP, &backup_blob("backup-token", Duration::minutes(1)))
            .unwrap();

        let result = SessionRecovery::new(stores).recover();
        assert_eq!(result.source, RecoverySource::Primary);
        assert_eq!(
            result.data.unwrap().auth_token.as_deref(),
            Some("primary-token")
        );
    }

    #[test]
    fn test_backup_restores_primary() {
        let stores = SessionStores::in_memory();
        stores
            .ephemeral()
            .set(keys::OAUTH_SESSION_BACKUP, &backup_blob("tok2", Duration::minutes(10)))
            .unwrap();
        let recovery = SessionRecovery::new(stores.clone());

        let result = recovery.recover();
        assert!(result.success);
        assert_eq!(result.source, RecoverySource::Backup);
        let restored = result.into_record().unwrap();

        assert_eq!(stores.ephemeral().get(keys::AUTH_TOKEN).unwrap().as_deref(), Some("tok2"));
        assert_eq!(stores.ephemeral().get(keys::PROVIDER).unwrap().as_deref(), Some("google"));

        // The next read comes straight from the primary keys
        let again = recovery.recover();
        assert_eq!(again.source, RecoverySource::Primary);
        assert_eq!(again.data.unwrap(), restored);
    }

    #[test]
    fn test_stale_primary_falls_through_to_none() {
        let stores = SessionStores::in_memory();
        fresh_login(&stores, "tok1");
        let stale = (Utc::now() - Duration::hours(25)).timestamp_millis();
        stores.ephemeral().set(keys::TIMESTAMP, &stale.to_string()).unwrap();

        let result = SessionRecovery::new(stores).recover();
        assert!(!result.success);
        assert_eq!(result.source, RecoverySource::None);
        assert!(result.data.is_none());
    }

    #[test]
    fn test_stale_backup_is_rejected() {
        let stores = SessionStores::in_memory();
        stores
            .ephemeral()
            .set(keys::OAUTH_SESSION_BACKUP, &backup_blob("tok", Duration::hours(25)))
            .unwrap();

        let result = SessionRecovery::new(stores.clone()).recover();
        assert_eq!(result.source, RecoverySource::None);
        assert_eq!(stores.ephemeral().get(keys::EMAIL).unwrap(), None);
    }

    #[test]
    fn test_oauth_primary_email_mismatch_is_rejected() {
        let stores = SessionStores::in_memory();
        write_primary_keys(
            &stores,
            &[
                (keys::EMAIL, "a@b.com".to_string()),
                (keys::AUTH_TOKEN, "tok".to_string()),
                (keys::PASSWORD, GOOGLE_OAUTH_SENTINEL.to_string()),
                (keys::USER, json!({ "email": "mallory@b.com" }).to_string()),
                (keys::TIMESTAMP, now_ms().to_string()),
                (keys::PROVIDER, "google".to_string()),
            ],
        );

        let recovery = SessionRecovery::new(stores);
        assert!(matches!(recovery.check_primary(), Err(RecoveryError::IntegrityMismatch)));
        assert!(!recovery.recover().success);
    }

    #[test]
    fn test_oauth_primary_requires_known_provider() {
        let stores = SessionStores::in_memory();
        write_primary_keys(
            &stores,
            &[
                (keys::EMAIL, "a@b.com".to_string()),
                (keys::AUTH_TOKEN, "tok".to_string()),
                (keys::PASSWORD, GOOGLE_OAUTH_SENTINEL.to_string()),
                (keys::USER, json!({ "email": "a@b.com" }).to_string()),
                (keys::PROVIDER, "github".to_string()),
            ],
        );

        let recovery = SessionRecovery::new(stores);
        assert!(matches!(
            recovery.check_primary(),
            Err(RecoveryError::InvalidProvider(ref p)) if p == "github"
        ));
    }

    #[test]
    fn test_primary_with_malformed_user_fails_tier() {
        let stores = SessionStores::in_memory();
        fresh_login(&stores, "tok");
        stores.ephemeral().set(keys::USER, "{not json").unwrap();

        let recovery = SessionRecovery::new(stores);
        assert!(matches!(recovery.check_primary(), Err(RecoveryError::InvalidUserData(_))));
        assert_eq!(recovery.recover().source, RecoverySource::None);
    }

    #[test]
    fn test_incomplete_primary_names_missing_fields() {
        let stores = SessionStores::in_memory();
        stores.ephemeral().set(keys::EMAIL, "a@b.com").unwrap();

        let err = SessionRecovery::new(stores).check_primary().unwrap_err();
        assert_eq!(err.to_string(), "Incomplete session: missing password, user");
    }

    #[test]
    fn test_persistent_tier_synthesizes_oauth_record() {
        let stores = SessionStores::in_memory();
        let persistent = stores.persistent();
        persistent.set(keys::AUTH_TOKEN, "tok3").unwrap();
        persistent.set(keys::EMAIL, "p@b.com").unwrap();
        persistent.set(keys::USER, &json!({ "email": "p@b.com" }).to_string()).unwrap();

        let result = SessionRecovery::new(stores).recover();
        assert!(result.success);
        assert_eq!(result.source, RecoverySource::Persistent);
        let record = result.into_record().unwrap();
        assert_eq!(record.password, GOOGLE_OAUTH_SENTINEL);
        assert_eq!(record.provider, Some(Provider::Google));
        assert!(record.is_valid());
    }

    #[test]
    fn test_partial_persistent_email_is_carried() {
        let stores = SessionStores::in_memory();
        stores.persistent().set(keys::EMAIL, "p@b.com").unwrap();

        let result = SessionRecovery::new(stores).recover();
        assert!(!result.success);
        assert_eq!(result.source, RecoverySource::None);
        assert_eq!(result.partial_email.as_deref(), Some("p@b.com"));
    }

    #[test]
    fn test_persistent_mismatch_keeps_partial_email() {
        let stores = SessionStores::in_memory();
        let persistent = stores.persistent();
        persistent.set(keys::AUTH_TOKEN, "tok3").unwrap();
        persistent.set(keys::EMAIL, "p@b.com").unwrap();
        persistent.set(keys::USER, &json!({ "email": "q@b.com" }).to_string()).unwrap();

        let result = SessionRecovery::new(stores).recover();
        assert!(!result.success);
        assert_eq!(result.partial_email.as_deref(), Some("p@b.com"));
    }

    #[test]
    fn test_recent_oauth_result_is_used_when_fresh() {
        let stores = SessionStores::in_memory();
        let blob = json!({
            "email": "r@b.com",
            "accessToken": "tok4",
            "user": { "email": "r@b.com" },
            "timestamp": (Utc::now() - Duration::minutes(2)).timestamp_millis(),
        });
        stores.persistent().set(keys::OAUTH_RESULT, &blob.to_string()).unwrap();

        let result = SessionRecovery::new(stores).recover();
        assert!(result.success);
        assert_eq!(result.source, RecoverySource::Persistent);
        assert_eq!(result.data.unwrap().auth_token.as_deref(), Some("tok4"));
    }

    #[test]
    fn test_recent_oauth_result_expires_after_five_minutes() {
        let stores = SessionStores::in_memory();
        let blob = json!({
            "email": "r@b.com",
            "accessToken": "tok4",
            "timestamp": (Utc::now() - Duration::minutes(6)).timestamp_millis(),
        });
        stores.persistent().set(keys::OAUTH_RESULT, &blob.to_string()).unwrap();

        let recovery = SessionRecovery::new(stores);
        assert!(matches!(recovery.check_recent_oauth(), Err(RecoveryError::SessionExpired)));
        assert_eq!(recovery.recover().source, RecoverySource::None);
    }

    #[test]
    fn test_disabled_storage_ends_in_none() {
        let stores = SessionStores::new(
            Arc::new(MemoryStore::disabled()),
            Arc::new(MemoryStore::disabled()),
        );
        let recovery = SessionRecovery::new(stores);

        let result = recovery.recover();
        assert!(!result.success);
        assert_eq!(result.source, RecoverySource::None);
        assert!(!recovery.validate_session_integrity());
        // Clearing a broken store must not panic
        recovery.clear_all_session_data();
    }

    #[test]
    fn test_failed_self_heal_fails_backup_tier() {
        let blob = backup_blob("tok", Duration::minutes(1));
        let quota = keys::OAUTH_SESSION_BACKUP.len() + blob.len() + 16;
        let stores = SessionStores::new(
            Arc::new(MemoryStore::with_quota(quota)),
            Arc::new(MemoryStore::new()),
        );
        stores.ephemeral().set(keys::OAUTH_SESSION_BACKUP, &blob).unwrap();

        let recovery = SessionRecovery::new(stores);
        assert!(matches!(
            recovery.check_backup(),
            Err(RecoveryError::Storage(StorageError::QuotaExceeded(_)))
        ));
        assert_eq!(recovery.recover().source, RecoverySource::None);
    }

    #[test]
    fn test_store_session_then_recover() {
        let stores = SessionStores::in_memory();
        let recovery = SessionRecovery::new(stores.clone());
        let record = SessionRecord::from_oauth(
            Provider::Google,
            "tok5",
            json!({ "email": "s@b.com", "name": "S" }),
        )
        .unwrap();

        recovery.store_session(&record).unwrap();
        assert!(recovery.validate_session_integrity());

        let recovered = recovery.recover().into_record().unwrap();
        assert_eq!(recovered.email, record.email);
        assert_eq!(recovered.auth_token, record.auth_token);
        assert_eq!(recovered.provider, Some(Provider::Google));
        assert_eq!(
            recovered.timestamp.timestamp_millis(),
            record.timestamp.timestamp_millis()
        );

        // Lost primary keys are covered by the backup blob
        for key in keys::PRIMARY_KEYS {
            stores.ephemeral().remove(key).unwrap();
        }
        assert_eq!(recovery.recover().source, RecoverySource::Backup);

        // And a lost ephemeral scope entirely by the persistent scope
        for key in keys::EPHEMERAL_KEYS {
            stores.ephemeral().remove(key).unwrap();
        }
        assert_eq!(recovery.recover().source, RecoverySource::Persistent);
    }

    #[test]
    fn test_store_session_rejects_invalid_record() {
        let recovery = SessionRecovery::new(SessionStores::in_memory());
        let mut record = SessionRecord::from_password("a@b.com", "pw");
        record.timestamp = Utc::now() - Duration::hours(30);
        assert!(matches!(
            recovery.store_session(&record),
            Err(RecoveryError::SessionExpired)
        ));
    }

    #[test]
    fn test_password_session_has_no_persistent_footprint() {
        let stores = SessionStores::in_memory();
        let recovery = SessionRecovery::new(stores.clone());
        recovery
            .store_session(&SessionRecord::from_password("a@b.com", "pw"))
            .unwrap();

        assert_eq!(stores.persistent().get(keys::EMAIL).unwrap(), None);
        let result = recovery.recover();
        assert_eq!(result.source, RecoverySource::Primary);
        assert!(result.data.unwrap().auth_token.is_none());
    }

    #[test]
    fn test_facebook_session_keeps_provider_in_persistent_tiers() {
        let stores = SessionStores::in_memory();
        let recovery = SessionRecovery::new(stores.clone());
        let record = SessionRecord::from_oauth(
            Provider::Facebook,
            "fb-token",
            json!({ "email": "f@b.com", "name": "F" }),
        )
        .unwrap();
        recovery.store_session(&record).unwrap();
        assert_eq!(
            stores.persistent().get(keys::PROVIDER).unwrap().as_deref(),
            Some("facebook")
        );

        for key in keys::EPHEMERAL_KEYS {
            stores.ephemeral().remove(key).unwrap();
        }
        let restored = recovery.check_persistent().unwrap();
        assert_eq!(restored.provider, Some(Provider::Facebook));
        assert_eq!(restored.password, FACEBOOK_OAUTH_SENTINEL);

        let recent = recovery.check_recent_oauth().unwrap();
        assert_eq!(recent.provider, Some(Provider::Facebook));
        assert_eq!(recent.auth_token.as_deref(), Some("fb-token"));

        stores.persistent().set(keys::PROVIDER, "myspace").unwrap();
        assert!(matches!(
            recovery.check_persistent(),
            Err(RecoveryError::InvalidProvider(_))
        ));
    }

    #[test]
    fn test_password_session_recovers_from_backup() {
        let stores = SessionStores::in_memory();
        let recovery = SessionRecovery::new(stores.clone());
        let record = SessionRecord::from_password("a@b.com", "pw");
        recovery.store_session(&record).unwrap();

        for key in keys::PRIMARY_KEYS {
            stores.ephemeral().remove(key).unwrap();
        }
        let result = recovery.recover();
        assert!(result.success);
        assert_eq!(result.source, RecoverySource::Backup);
        let restored = result.into_record().unwrap();
        assert_eq!(restored.password, "pw");
        assert!(restored.auth_token.is_none());

        assert_eq!(recovery.recover().source, RecoverySource::Primary);
    }

    #[test]
    fn test_oauth_backup_without_token_is_rejected() {
        let stores = SessionStores::in_memory();
        let mut blob: Value = serde_json::from_str(&backup_blob("tok", Duration::minutes(1))).unwrap();
        blob["authToken"] = Value::Null;
        stores
            .ephemeral()
            .set(keys::OAUTH_SESSION_BACKUP, &blob.to_string())
            .unwrap();

        let recovery = SessionRecovery::new(stores);
        assert!(matches!(
            recovery.check_backup(),
            Err(RecoveryError::IncompleteSession(ref missing)) if missing == "authToken"
        ));
    }

    #[test]
    fn test_future_timestamps_are_rejected() {
        let stores = SessionStores::in_memory();
        fresh_login(&stores, "tok1");
        let future = (Utc::now() + Duration::days(30)).timestamp_millis();
        stores.ephemeral().set(keys::TIMESTAMP, &future.to_string()).unwrap();

        let blob = json!({
            "email": "r@b.com",
            "accessToken": "tok4",
            "timestamp": future,
        });
        stores.persistent().set(keys::OAUTH_RESULT, &blob.to_string()).unwrap();

        let recovery = SessionRecovery::new(stores);
        assert!(matches!(recovery.check_primary(), Err(RecoveryError::InvalidTimestamp(_))));
        assert!(matches!(
            recovery.check_recent_oauth(),
            Err(RecoveryError::InvalidTimestamp(_))
        ));
        assert_eq!(recovery.recover().source, RecoverySource::None);
    }

    #[test]
    fn test_corrupt_file_scope_is_cleared_and_reusable() {
        let dir = std::env::temp_dir().join(format!("bankline-recovery-{}", std::process::id()));
        let session_file = dir.join("session.json");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&session_file, r#"{"email":"a@b.com","#).unwrap();

        let stores = SessionStores::new(
            Arc::new(FileStore::new(&session_file)),
            Arc::new(FileStore::new(dir.join("persistent.json"))),
        );
        let recovery = SessionRecovery::new(stores);
        assert_eq!(recovery.recover().source, RecoverySource::None);

        recovery.clear_all_session_data();
        assert!(!session_file.exists());

        recovery
            .store_session(&SessionRecord::from_password("a@b.com", "pw"))
            .unwrap();
        assert_eq!(recovery.recover().source, RecoverySource::Primary);

        recovery.clear_all_session_data();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_clear_all_session_data_is_idempotent() {
        let stores = SessionStores::in_memory();
        let recovery = SessionRecovery::new(stores.clone());
        let record =
            SessionRecord::from_oauth(Provider::Google, "tok", json!({ "email": "c@b.com" }))
                .unwrap();
        recovery.store_session(&record).unwrap();
        stores.persistent().set(keys::OAUTH_LAST_SUCCESS, "{}").unwrap();

        recovery.clear_all_session_data();
        assert_all_keys_absent(&stores);
        recovery.clear_all_session_data();
        assert_all_keys_absent(&stores);
        assert_eq!(recovery.recover().source, RecoverySource::None);
    }

    #[test]
    fn test_result_serializes_like_web_contract() {
        let result = RecoveryResult::unrecoverable(Some("p@b.com".to_string()));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["source"], "none");
        assert_eq!(value["partialEmail"], "p@b.com");
        assert!(value.get("data").is_none());

        let source = serde_json::to_value(RecoverySource::Persistent).unwrap();
        assert_eq!(source, "localStorage");
    }
}
