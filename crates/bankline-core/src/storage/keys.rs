//! Well-known storage keys.

/// Bearer token (ephemeral and persistent)
pub const AUTH_TOKEN: &str = "authToken";
/// User identifier (ephemeral and persistent)
pub const EMAIL: &str = "email";
/// Real password or an OAuth sentinel (ephemeral only)
pub const PASSWORD: &str = "password";
/// JSON-serialized profile (ephemeral and persistent)
pub const USER: &str = "user";
/// Record creation time in ms since epoch
pub const TIMESTAMP: &str = "timestamp";
/// `google` | `facebook` (ephemeral, and persistent for OAuth sessions)
pub const PROVIDER: &str = "provider";
/// Schema version string
pub const VERSION: &str = "version";
/// Serialized backup record (ephemeral)
pub const OAUTH_SESSION_BACKUP: &str = "oauth_session_backup";
/// Short-lived OAuth exchange result (persistent)
pub const OAUTH_RESULT: &str = "oauth_result";
/// Legacy last-success marker (persistent), only ever cleared
pub const OAUTH_LAST_SUCCESS: &str = "oauth_last_success";

/// Keys of the canonical record in the ephemeral scope.
pub const PRIMARY_KEYS: [&str; 7] = [AUTH_TOKEN, EMAIL, PASSWORD, USER, TIMESTAMP, PROVIDER, VERSION];

/// Every ephemeral key any recovery tier reads or writes.
pub const EPHEMERAL_KEYS: [&str; 8] = [
    AUTH_TOKEN,
    EMAIL,
    PASSWORD,
    USER,
    TIMESTAMP,
    PROVIDER,
    VERSION,
    OAUTH_SESSION_BACKUP,
];

/// Every persistent key any recovery tier reads or writes.
pub const PERSISTENT_KEYS: [&str; 6] = [
    AUTH_TOKEN,
    EMAIL,
    USER,
    PROVIDER,
    OAUTH_RESULT,
    OAUTH_LAST_SUCCESS,
];
