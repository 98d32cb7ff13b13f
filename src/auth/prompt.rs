//! Credential sources: a terminal prompt and a refusing stand-in for servers.

use std::io::{self, BufRead, Write};
use std::thread;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::config::ENV_STRING_SESSION;
use crate::error::{KeepOnlineError, Result};

use super::CredentialSource;

/// Reads credentials from the terminal.
///
/// Prompts go to stderr so stdout stays clean for the printed session token.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        let prompt = prompt.to_string();
        off_runtime(move || read_answer(&prompt)).await
    }
}

fn read_answer(prompt: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(KeepOnlineError::Auth(
            "input closed before login finished".to_string(),
        ));
    }
    Ok(line.trim().to_string())
}

/// Run a blocking terminal read on its own thread and await the answer.
///
/// The thread is detached, not a `spawn_blocking` task: a prompt abandoned on
/// shutdown must not hold the runtime open until someone presses Enter.
async fn off_runtime<T, F>(read: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    thread::Builder::new()
        .name("terminal-prompt".to_string())
        .spawn(move || {
            let _ = tx.send(read());
        })?;

    rx.await.map_err(|_| {
        KeepOnlineError::Auth("terminal prompt ended without an answer".to_string())
    })?
}

#[async_trait]
impl CredentialSource for TerminalPrompt {
    async fn phone(&mut self) -> Result<String> {
        let phone = self
            .ask("Enter phone number (international format): ")
            .await?;
        if phone.is_empty() {
            return Err(KeepOnlineError::Auth("phone number is required".to_string()));
        }
        Ok(phone)
    }

    async fn code(&mut self) -> Result<String> {
        self.ask("Enter the code you received: ").await
    }

    async fn password(&mut self, hint: Option<&str>) -> Result<String> {
        let prompt = match hint {
            Some(hint) if !hint.is_empty() => format!("2FA password (hint: {}): ", hint),
            _ => "2FA password: ".to_string(),
        };
        let password = off_runtime(move || Ok(rpassword::prompt_password(prompt)?)).await?;
        Ok(password.trim().to_string())
    }
}

/// A source for processes that must never prompt.
///
/// Every request fails with the configured explanation.
#[derive(Debug, Clone)]
pub struct NonInteractive {
    reason: String,
}

impl NonInteractive {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The runner was given a token and the server rejected it.
    pub fn for_token() -> Self {
        Self::new(format!(
            "Not authorized. The provided {} might be invalid or expired. \
             Generate a new one with `keeponline login` and update the environment variable.",
            ENV_STRING_SESSION
        ))
    }

    fn refuse(&self) -> KeepOnlineError {
        KeepOnlineError::Auth(self.reason.clone())
    }
}

#[async_trait]
impl CredentialSource for NonInteractive {
    async fn phone(&mut self) -> Result<String> {
        Err(self.refuse())
    }

    async fn code(&mut self) -> Result<String> {
        Err(self.refuse())
    }

    async fn password(&mut self, _hint: Option<&str>) -> Result<String> {
        Err(self.refuse())
    }
}
