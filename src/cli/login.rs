//! `keeponline login` - one-shot interactive session bootstrap.

use anyhow::{Context, Result};
use tracing::{info, warn};

use keeponline::auth::{generate_session_token, TerminalPrompt};
use keeponline::config::{Config, ENV_STRING_SESSION};
use keeponline::telegram::{AccountClient, TelegramClient};

/// Log in on a fresh in-memory session and print the token on stdout.
pub(crate) async fn cmd_login() -> Result<()> {
    let config = Config::from_env().with_context(|| "Failed to load configuration")?;

    info!("Starting session generation...");
    let mut client = TelegramClient::fresh(&config);
    client
        .connect()
        .await
        .with_context(|| "Failed to connect to Telegram")?;

    eprintln!("Please enter your phone number, code, and 2FA password if prompted.");
    let mut prompt = TerminalPrompt::new();
    let result = generate_session_token(&mut client, &mut prompt).await;

    if let Err(e) = client.disconnect().await {
        warn!("Error while disconnecting: {}", e);
    }

    let (_, token) = result.with_context(|| "Could not log in to generate a session token")?;

    eprintln!();
    eprintln!("Your session token follows on stdout. Keep it secret.");
    eprintln!(
        "Store it as the {} environment variable where keeponline runs.",
        ENV_STRING_SESSION
    );
    println!("{}", token);

    Ok(())
}
