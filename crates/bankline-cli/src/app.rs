//! Application controller for the terminal host.
//!
//! `App` owns the configured stores, the recovery chain and the API client,
//! and implements one method per command.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use bankline_core::api::BankClient;
use bankline_core::auth::{
    Element, LogoutRedirect, Navigator, SessionCallbacks, SessionEvent, SessionRecovery,
    SessionStatus, SessionTimer, INACTIVITY_REASON,
};
use bankline_core::storage::{FileStore, SessionStores};
use bankline_core::Config;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Ephemeral scope file, under the cache directory
const SESSION_FILE: &str = "session.json";

/// Persistent scope file, under the data directory
const PERSISTENT_FILE: &str = "persistent.json";

/// Reason shown on the login page after an explicit sign-out
const SIGNED_OUT_REASON: &str = "You have been signed out";

/// "Navigates" by telling the user where to sign in again.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, url: &str) {
        println!("\nSign in again at: {url}");
    }
}

pub struct App {
    config: Config,
    client: BankClient,
    recovery: SessionRecovery,
    logout: LogoutRedirect,
}

impl App {
    pub fn new() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        let stores = SessionStores::new(
            Arc::new(FileStore::new(Config::cache_dir()?.join(SESSION_FILE))),
            Arc::new(FileStore::new(Config::data_dir()?.join(PERSISTENT_FILE))),
        );
        let recovery = SessionRecovery::new(stores);
        let client = BankClient::new(config.api_base_url())?;
        let logout = LogoutRedirect::new(
            recovery.clone(),
            Arc::new(TerminalNavigator),
            config.login_url(),
        )?;

        Ok(Self {
            config,
            client,
            recovery,
            logout,
        })
    }

    /// Password login. Falls back to the last email used when none is given.
    pub async fn login(&mut self, email: Option<&str>) -> Result<()> {
        let email = match email.or(self.config.last_email.as_deref()) {
            Some(email) => email.to_string(),
            None => Self::prompt_email()?,
        };
        let password = rpassword::prompt_password(format!("Password for {email}: "))?;

        println!("Authenticating...");
        let record = self.client.login(&email, &password).await?;
        self.recovery.store_session(&record)?;

        self.remember_email(&record.email);
        println!("Signed in as {}", record.email);
        Ok(())
    }

    /// Complete a Google sign-in from the authorization code of the redirect.
    pub async fn oauth(&mut self, code: &str, redirect_uri: &str) -> Result<()> {
        let record = self
            .client
            .exchange_google_code(code, redirect_uri)
            .await?;
        self.recovery.store_session(&record)?;

        self.remember_email(&record.email);
        println!("Signed in with Google as {}", record.email);
        Ok(())
    }

    /// Complete a Facebook sign-in from a client-side access token.
    pub async fn oauth_facebook(&mut self, access_token: &str) -> Result<()> {
        let record = self.client.exchange_facebook_token(access_token).await?;
        self.recovery.store_session(&record)?;

        self.remember_email(&record.email);
        println!("Signed in with Facebook as {}", record.email);
        Ok(())
    }

    pub fn recover(&self) -> Result<()> {
        let result = self.recovery.recover();
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }

    pub fn logout(&self) {
        self.recovery.clear_all_session_data();
        println!("Signed out. Sign in again at: {}", self.logout.login_url_for(SIGNED_OUT_REASON));
    }

    /// Run the inactivity countdown for the recovered session until it
    /// expires or the user quits.
    pub async fn watch(&mut self) -> Result<()> {
        let result = self.recovery.recover();
        let source = result.source;
        let partial_email = result.partial_email.clone();
        let Some(record) = result.into_record() else {
            match partial_email {
                Some(email) => println!("No active session. Run `bankline login {email}`."),
                None => println!("No active session. Run `bankline login` first."),
            }
            return Ok(());
        };
        println!("Session for {} (recovered from {:?})", record.email, source);
        println!("Press Enter to register activity, q then Enter to quit.");

        let mut timer = SessionTimer::new(self.config.timer_config()?);
        let (callbacks, mut events) = SessionCallbacks::channel();
        timer.start(callbacks)?;

        let mut prompting = Self::render_status(&timer.get_session_status(), false)?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Update(status)) => {
                        prompting = Self::render_status(&status, prompting)?;
                    }
                    Some(SessionEvent::Expired) => {
                        info!("Session expired while watching");
                        self.logout.execute(INACTIVITY_REASON);
                        break;
                    }
                    None => break,
                },
                line = lines.next_line() => match line? {
                    Some(input) if input.trim().eq_ignore_ascii_case("q") => {
                        timer.stop();
                        break;
                    }
                    Some(_) => {
                        // The terminal has no DOM; every Enter counts as a button press
                        if timer.record_click(&Element::new("button")) {
                            prompting = false;
                            println!("Still here - countdown reset.");
                        }
                    }
                    None => {
                        timer.stop();
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    fn render_status(status: &SessionStatus, prompting: bool) -> Result<bool> {
        let mut stdout = io::stdout();
        if status.show_still_active_prompt && !prompting {
            writeln!(stdout, "\nAre you still there? Press Enter to stay signed in.")?;
        }
        let marker = if status.show_warning { "!" } else { " " };
        writeln!(stdout, "{marker} {} remaining", status.formatted_time)?;
        stdout.flush()?;
        Ok(status.show_still_active_prompt)
    }

    fn prompt_email() -> Result<String> {
        print!("Email: ");
        io::stdout().flush()?;

        let mut email = String::new();
        io::stdin().read_line(&mut email)?;
        Ok(email.trim().to_string())
    }

    /// Store the email in the config file. Only file values are written
    /// back, never environment overrides.
    fn remember_email(&mut self, email: &str) {
        self.config.last_email = Some(email.to_string());
        let saved = Config::load_file().and_then(|mut stored| {
            stored.last_email = Some(email.to_string());
            stored.save()
        });
        if let Err(e) = saved {
            warn!(error = %e, "Failed to save config");
        }
    }
}
