//! Telegram account client
//!
//! [`AccountClient`] is the seam between the heartbeat runner and the MTProto
//! library. The runner and the login routine only talk to this trait, which
//! keeps both testable with a mock. [`TelegramClient`] is the production
//! implementation on top of `grammers-client`.

mod client;

use async_trait::async_trait;

use crate::error::ClientError;

pub use client::{decode_session_token, TelegramClient};

/// Result of submitting a login code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    SignedIn,
    /// Two-step verification is enabled; a password must follow.
    PasswordRequired { hint: Option<String> },
}

/// Who we are logged in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: i64,
    pub first_name: String,
}

/// Operations the runner and the login flow need from a Telegram client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountClient: Send {
    /// Open the connection. Calling it again after a disconnect reconnects
    /// with the same session.
    async fn connect(&mut self) -> Result<(), ClientError>;

    /// Whether the adapter believes the connection is usable.
    fn is_connected(&self) -> bool;

    async fn is_authorized(&mut self) -> Result<bool, ClientError>;

    /// Ask Telegram to send a login code to `phone`.
    async fn request_login_code(&mut self, phone: &str) -> Result<(), ClientError>;

    /// Submit the code received after [`request_login_code`](Self::request_login_code).
    async fn sign_in(&mut self, code: &str) -> Result<SignInOutcome, ClientError>;

    /// Finish a login that reported [`SignInOutcome::PasswordRequired`].
    async fn check_password(&mut self, password: &str) -> Result<(), ClientError>;

    async fn me(&mut self) -> Result<AccountInfo, ClientError>;

    /// `account.updateStatus`: `offline = false` marks the account online.
    async fn update_status(&mut self, offline: bool) -> Result<(), ClientError>;

    /// Serialize the current session into a portable token.
    fn export_session(&self) -> Result<String, ClientError>;

    /// Close the connection, persisting a file-backed session first.
    async fn disconnect(&mut self) -> Result<(), ClientError>;
}
