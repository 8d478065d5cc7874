//! Session lifecycle: establishing, recovering and timing out a session.
//!
//! This module provides:
//! - `SessionRecord`: the authentication state a login or OAuth exchange produces
//! - `SessionRecovery`: rebuilds a record after a redirect from redundant storage
//! - `SessionTimer`: inactivity countdown with warning and expiry signaling
//! - `LogoutRedirect`: default expiry handling (clear storage, go to login)
//!
//! Records are trusted for 24 hours; the countdown defaults to 15 minutes.

pub mod activity;
pub mod error;
pub mod logout;
pub mod recovery;
pub mod session;
pub mod status;
pub mod timer;

pub use activity::{is_activity_signal, ActivityFilter, Element, EventTarget};
pub use error::RecoveryError;
pub use logout::{LogoutRedirect, Navigator, INACTIVITY_REASON};
pub use recovery::{RecoveryResult, RecoverySource, SessionRecovery};
pub use session::{Provider, SessionRecord};
pub use status::SessionStatus;
pub use timer::{SessionCallbacks, SessionEvent, SessionTimer, TimerConfig};
