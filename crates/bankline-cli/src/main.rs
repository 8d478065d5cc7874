//! Bankline - terminal host for web banking sessions.
//!
//! Signs in with a password, a Google authorization code or a Facebook
//! access token, persists the session the way the browser front-end does,
//! and runs the inactivity countdown in the foreground.

mod app;

use std::io;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

// ============================================================================
// Constants
// ============================================================================

/// Log file used while `watch` owns the terminal
const WATCH_LOG_FILE: &str = "bankline.log";

const USAGE: &str = "\
Usage: bankline <command>

Commands:
  login [email]               Sign in with email and password
  oauth <code> <redirect_uri> Exchange a Google authorization code
  oauth-facebook <token>      Sign in with a Facebook access token
  recover                     Print the session recovery result as JSON
  watch                       Run the inactivity countdown (Enter = activity, q = quit)
  logout                      Clear every stored session key

Environment:
  RUST_LOG                         Log filter (default: warn)
  BANKLINE_API_URL                 API base URL
  BANKLINE_LOGIN_URL               Login page used after expiry
  BANKLINE_SESSION_TIMEOUT_SECS    Inactivity timeout
  BANKLINE_WARNING_THRESHOLD_SECS  Warning window before expiry";

/// Initialize the tracing subscriber for logging to stderr
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Initialize tracing into a log file so the countdown output stays readable.
/// The returned guard must be held until exit to flush buffered lines.
fn init_file_tracing() -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_dir = bankline_core::Config::cache_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::never(&log_dir, WATCH_LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);

    let _guard = if command == Some("watch") {
        Some(init_file_tracing()?)
    } else {
        init_tracing();
        None
    };
    info!(command = command.unwrap_or(""), "Bankline starting");

    let mut app = App::new()?;

    match (command, &args[args.len().min(2)..]) {
        (Some("login"), [email]) => app.login(Some(email.as_str())).await,
        (Some("login"), []) => app.login(None).await,
        (Some("oauth"), [code, redirect_uri]) => app.oauth(code, redirect_uri).await,
        (Some("oauth-facebook"), [token]) => app.oauth_facebook(token).await,
        (Some("recover"), []) => app.recover(),
        (Some("watch"), []) => app.watch().await,
        (Some("logout"), []) => {
            app.logout();
            Ok(())
        }
        (Some("help" | "--help" | "-h"), _) => {
            println!("{USAGE}");
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}
