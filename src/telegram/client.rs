//! `grammers-client` backed implementation of [`AccountClient`].

use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use grammers_client::types::{LoginToken, PasswordToken};
use grammers_client::{Client, Config as ClientConfig, InitParams, InvocationError, SignInError};
use grammers_session::Session;
use grammers_tl_types as tl;
use tracing::{debug, info, warn};

use crate::config::{Config, SessionSource, ENV_STRING_SESSION};
use crate::error::{ClientError, KeepOnlineError, Result};

use super::{AccountClient, AccountInfo, SignInOutcome};

/// Decode a portable token into raw session bytes, checking that the
/// library accepts them.
pub fn decode_session_token(token: &str) -> Result<Vec<u8>> {
    let bytes = STANDARD.decode(token.trim()).map_err(|_| {
        KeepOnlineError::Config(format!(
            "{} is not a valid session token (expected base64)",
            ENV_STRING_SESSION
        ))
    })?;

    Session::load(&bytes).map_err(|e| {
        KeepOnlineError::Config(format!(
            "{} could not be loaded as a session: {}",
            ENV_STRING_SESSION, e
        ))
    })?;

    Ok(bytes)
}

/// Telegram user client with reconnect support.
///
/// The session is kept as serialized bytes between connections so that a
/// reconnect dials with the latest auth key and DC information.
pub struct TelegramClient {
    api_id: i32,
    api_hash: String,
    /// Where `disconnect` persists the session; `None` for token sessions.
    session_file: Option<PathBuf>,
    snapshot: Vec<u8>,
    inner: Option<Client>,
    connected: bool,
    login_token: Option<LoginToken>,
    password_token: Option<PasswordToken>,
}

impl TelegramClient {
    /// Build a client for the session configured in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        match &config.session {
            SessionSource::Token(token) => {
                info!("Found {}. Using the portable session token.", ENV_STRING_SESSION);
                let snapshot = decode_session_token(token)?;
                Ok(Self::with_snapshot(config, snapshot, None))
            }
            SessionSource::File(path) => {
                info!("Using file-based session: {}", path.display());
                let session = Session::load_file_or_create(path).map_err(|e| {
                    KeepOnlineError::Session(format!(
                        "Failed to open session file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(Self::with_snapshot(config, session.save(), Some(path.clone())))
            }
        }
    }

    /// Build a client on a brand new, unauthorized in-memory session.
    pub fn fresh(config: &Config) -> Self {
        Self::with_snapshot(config, Session::new().save(), None)
    }

    fn with_snapshot(config: &Config, snapshot: Vec<u8>, session_file: Option<PathBuf>) -> Self {
        Self {
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            session_file,
            snapshot,
            inner: None,
            connected: false,
            login_token: None,
            password_token: None,
        }
    }

    fn client(&self) -> std::result::Result<&Client, ClientError> {
        match self.inner {
            Some(ref client) if self.connected => Ok(client),
            _ => Err(ClientError::Connection("client is not connected".to_string())),
        }
    }

    /// Map a library error, noting when the connection itself went away.
    fn track(&mut self, err: InvocationError) -> ClientError {
        match err {
            InvocationError::Rpc(rpc) => ClientError::Rpc {
                code: rpc.code,
                name: rpc.name,
            },
            other => {
                debug!("Marking connection as lost after: {}", other);
                self.connected = false;
                ClientError::Connection(other.to_string())
            }
        }
    }

    fn refresh_snapshot(&mut self) {
        if let Some(ref client) = self.inner {
            self.snapshot = client.session().save();
        }
    }

    fn persist(&self) -> std::result::Result<(), ClientError> {
        let (Some(path), Some(client)) = (&self.session_file, &self.inner) else {
            return Ok(());
        };
        client.session().save_to_file(path).map_err(|e| {
            ClientError::Other(format!(
                "Failed to save session file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl AccountClient for TelegramClient {
    async fn connect(&mut self) -> std::result::Result<(), ClientError> {
        self.refresh_snapshot();
        self.inner = None;
        self.connected = false;

        let session = Session::load(&self.snapshot)
            .map_err(|e| ClientError::Other(format!("Invalid session data: {}", e)))?;

        let client = Client::connect(ClientConfig {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| ClientError::Connection(e.to_string()))?;

        self.inner = Some(client);
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.inner.is_some()
    }

    async fn is_authorized(&mut self) -> std::result::Result<bool, ClientError> {
        let result = self.client()?.is_authorized().await;
        result.map_err(|e| self.track(e))
    }

    async fn request_login_code(&mut self, phone: &str) -> std::result::Result<(), ClientError> {
        let token = self
            .client()?
            .request_login_code(phone)
            .await
            .map_err(|e| ClientError::Auth(format!("Failed to request login code: {}", e)))?;
        self.login_token = Some(token);
        Ok(())
    }

    async fn sign_in(&mut self, code: &str) -> std::result::Result<SignInOutcome, ClientError> {
        let token = self.login_token.take().ok_or_else(|| {
            ClientError::Auth("sign-in attempted before a login code was requested".to_string())
        })?;

        let result = self.client()?.sign_in(&token, code).await;
        match result {
            Ok(_) => {
                self.persist()?;
                Ok(SignInOutcome::SignedIn)
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().map(str::to_string);
                self.password_token = Some(password_token);
                Ok(SignInOutcome::PasswordRequired { hint })
            }
            Err(e) => Err(ClientError::Auth(e.to_string())),
        }
    }

    async fn check_password(&mut self, password: &str) -> std::result::Result<(), ClientError> {
        let token = self.password_token.take().ok_or_else(|| {
            ClientError::Auth("no two-step verification is pending".to_string())
        })?;

        self.client()?
            .check_password(token, password)
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;
        self.persist()
    }

    async fn me(&mut self) -> std::result::Result<AccountInfo, ClientError> {
        let result = self.client()?.get_me().await;
        let user = result.map_err(|e| self.track(e))?;
        Ok(AccountInfo {
            id: user.id(),
            first_name: user.first_name().to_string(),
        })
    }

    async fn update_status(&mut self, offline: bool) -> std::result::Result<(), ClientError> {
        let result = self
            .client()?
            .invoke(&tl::functions::account::UpdateStatus { offline })
            .await;
        result.map(|_| ()).map_err(|e| self.track(e))
    }

    fn export_session(&self) -> std::result::Result<String, ClientError> {
        let bytes = match self.inner {
            Some(ref client) => client.session().save(),
            None => self.snapshot.clone(),
        };
        Ok(STANDARD.encode(bytes))
    }

    async fn disconnect(&mut self) -> std::result::Result<(), ClientError> {
        if let Err(e) = self.persist() {
            warn!("{}", e);
        }
        self.refresh_snapshot();
        // Dropping the last handle closes the MTProto connection.
        self.inner = None;
        self.connected = false;
        Ok(())
    }
}
