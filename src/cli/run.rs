//! `keeponline run` - the long-lived heartbeat process.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use keeponline::auth::{CredentialSource, NonInteractive, TerminalPrompt};
use keeponline::config::{Config, SessionSource, ENV_STRING_SESSION};
use keeponline::heartbeat::{HeartbeatRunner, RunExit};
use keeponline::telegram::TelegramClient;
use keeponline::utils::SessionLockGuard;

pub(crate) async fn cmd_run() -> Result<()> {
    let config = Config::from_env().with_context(|| "Failed to load configuration")?;

    // Held until the runner has disconnected.
    let _lock = match config.session {
        SessionSource::File(ref path) => Some(SessionLockGuard::acquire(path)?),
        SessionSource::Token(_) => None,
    };

    let client = TelegramClient::from_config(&config)
        .with_context(|| "Failed to initialize the Telegram client")?;

    // A server configured with a token must never block on a prompt.
    let credentials: Box<dyn CredentialSource> = if config.session.is_token() {
        Box::new(NonInteractive::for_token())
    } else {
        Box::new(TerminalPrompt::new())
    };

    let mut runner = HeartbeatRunner::new(client, credentials, config.update_interval());
    let exit = runner.run(shutdown_signal()).await?;

    if exit.is_clean() {
        info!("Stopped.");
        return Ok(());
    }
    bail!(describe_exit(&exit, &config.session))
}

/// Operator-facing explanation for a stop that was not requested.
fn describe_exit(exit: &RunExit, session: &SessionSource) -> String {
    let fix = match session {
        SessionSource::Token(_) => format!(
            "Run 'keeponline login' and update {}.",
            ENV_STRING_SESSION
        ),
        SessionSource::File(path) => format!(
            "Delete {} and run 'keeponline run' from a terminal to log in again.",
            path.display()
        ),
    };
    match exit {
        RunExit::Interrupted => "Stopped by signal.".to_string(),
        RunExit::AuthorizationRevoked(reason) => format!(
            "Session is no longer authorized ({}).\n\n  Fix: {}",
            reason, fix
        ),
        RunExit::AuthorizationLost => format!(
            "Re-authorization failed after reconnect.\n\n  Fix: {}",
            fix
        ),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
