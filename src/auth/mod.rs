//! Login flow shared by `keeponline login` and the runner's cold start.
//!
//! The flow itself never touches stdin. Phone number, login code and the
//! two-step verification password come from a [`CredentialSource`], so the
//! same routine serves an operator at a terminal and a headless server that
//! must fail instead of prompting.

mod prompt;

use async_trait::async_trait;
use tracing::info;

use crate::error::{KeepOnlineError, Result};
use crate::telegram::{AccountClient, AccountInfo, SignInOutcome};

pub use prompt::{NonInteractive, TerminalPrompt};

/// Supplies login credentials on demand.
///
/// Answers may take as long as a human needs, so the methods are async and
/// the runner can still observe a shutdown while one is pending.
#[async_trait]
pub trait CredentialSource: Send {
    async fn phone(&mut self) -> Result<String>;
    async fn code(&mut self) -> Result<String>;
    /// Two-step verification password. An empty string means "none given".
    async fn password(&mut self, hint: Option<&str>) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The session was already logged in; nothing was asked.
    AlreadyAuthorized,
    /// A login was completed through the credential source.
    SignedIn,
}

/// Make sure `client` is logged in, asking `source` only if it is not.
///
/// The client must already be connected.
pub async fn authorize<C>(client: &mut C, source: &mut dyn CredentialSource) -> Result<AuthOutcome>
where
    C: AccountClient + ?Sized,
{
    if client.is_authorized().await? {
        return Ok(AuthOutcome::AlreadyAuthorized);
    }

    info!("Authorization required");
    let phone = source.phone().await?;
    client
        .request_login_code(&phone)
        .await
        .map_err(|e| KeepOnlineError::Auth(e.to_string()))?;

    let code = source.code().await?;
    let outcome = client
        .sign_in(&code)
        .await
        .map_err(|e| KeepOnlineError::Auth(e.to_string()))?;

    if let SignInOutcome::PasswordRequired { hint } = outcome {
        info!("Two-step verification is enabled for this account");
        let password = source.password(hint.as_deref()).await?;
        if password.is_empty() {
            return Err(KeepOnlineError::Auth(
                "two-step verification password is required".to_string(),
            ));
        }
        client
            .check_password(&password)
            .await
            .map_err(|e| KeepOnlineError::Auth(format!("Error during 2FA: {}", e)))?;
    }

    if !client.is_authorized().await? {
        return Err(KeepOnlineError::Auth(
            "login finished but the session is still not authorized".to_string(),
        ));
    }

    Ok(AuthOutcome::SignedIn)
}

/// Log in from scratch and export the session as a portable token.
///
/// This is the body of `keeponline login`. The client must be connected on a
/// fresh session; a session that is somehow already authorized is exported
/// as is.
pub async fn generate_session_token<C>(
    client: &mut C,
    source: &mut dyn CredentialSource,
) -> Result<(AccountInfo, String)>
where
    C: AccountClient + ?Sized,
{
    authorize(client, source).await?;
    let me = client.me().await?;
    info!("Successfully logged in as {} (ID: {})", me.first_name, me.id);
    let token = client.export_session()?;
    Ok((me, token))
}
