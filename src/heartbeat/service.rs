//! Heartbeat runner implementation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::auth::{authorize, AuthOutcome, CredentialSource};
use crate::error::{ClientError, Result};
use crate::telegram::AccountClient;

use super::classify::{classify, ErrorClass};

/// Wait after a failed tick before trying again.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Upper bound for the best-effort offline call during shutdown.
pub const OFFLINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a [`HeartbeatRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Disconnected,
    Connecting,
    Authorizing,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Disconnected => "disconnected",
            RunnerState::Connecting => "connecting",
            RunnerState::Authorizing => "authorizing",
            RunnerState::Running => "running",
            RunnerState::ShuttingDown => "shutting-down",
            RunnerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// The shutdown signal fired.
    Interrupted,
    /// The server reported the session as revoked.
    AuthorizationRevoked(String),
    /// A reconnect succeeded but the session was no longer logged in.
    AuthorizationLost,
}

impl RunExit {
    /// Interrupts are the only expected way for the runner to stop.
    pub fn is_clean(&self) -> bool {
        matches!(self, RunExit::Interrupted)
    }
}

/// Counters reported when the runner stops.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub heartbeats_sent: u64,
    pub failures: u64,
    pub last_heartbeat: Option<DateTime<Local>>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            started_at: Local::now(),
            heartbeats_sent: 0,
            failures: 0,
            last_heartbeat: None,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} heartbeat(s) sent, {} failure(s) since {}",
            self.heartbeats_sent,
            self.failures,
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        if let Some(last) = self.last_heartbeat {
            write!(f, ", last at {}", last.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}

enum Tick {
    Sent,
    AuthorizationLost,
}

/// Keeps an account online by repeating `account.updateStatus(offline=false)`.
///
/// One task, one request in flight at a time. [`run`](Self::run) always ends
/// with the shutdown sequence, whatever stopped it.
pub struct HeartbeatRunner<C> {
    client: C,
    credentials: Box<dyn CredentialSource>,
    interval: Duration,
    state: RunnerState,
    summary: RunSummary,
}

impl<C: AccountClient> HeartbeatRunner<C> {
    /// `credentials` is consulted only if the session is not authorized.
    pub fn new(client: C, credentials: Box<dyn CredentialSource>, interval: Duration) -> Self {
        Self {
            client,
            credentials,
            interval,
            state: RunnerState::Disconnected,
            summary: RunSummary::new(),
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Connect, authorize, then heartbeat until `shutdown` resolves or the
    /// session becomes unusable.
    ///
    /// `shutdown` is watched from the first connection attempt on. Startup
    /// failures are returned as errors. The shutdown sequence runs in every
    /// case before this returns.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<RunExit>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let started = tokio::select! {
            started = self.start() => Some(started),
            _ = &mut shutdown => None,
        };

        let outcome = match started {
            None => {
                info!("Received shutdown signal during startup");
                Ok(RunExit::Interrupted)
            }
            Some(Err(e)) => Err(e),
            Some(Ok(())) => {
                tokio::select! {
                    exit = self.heartbeat_loop() => Ok(exit),
                    _ = &mut shutdown => {
                        info!("Received shutdown signal");
                        Ok(RunExit::Interrupted)
                    }
                }
            }
        };

        self.shut_down().await;
        outcome
    }

    async fn start(&mut self) -> Result<()> {
        self.transition(RunnerState::Connecting);
        info!("Connecting to Telegram...");
        self.client.connect().await?;

        self.transition(RunnerState::Authorizing);
        match authorize(&mut self.client, self.credentials.as_mut()).await? {
            AuthOutcome::AlreadyAuthorized => info!("Successfully authorized"),
            AuthOutcome::SignedIn => info!("Signed in"),
        }

        let me = self.client.me().await?;
        info!("Logged in as: {} (ID: {})", me.first_name, me.id);

        self.transition(RunnerState::Running);
        info!(
            "Will send online status updates every {} minute(s)",
            self.interval.as_secs() / 60
        );
        Ok(())
    }

    async fn heartbeat_loop(&mut self) -> RunExit {
        loop {
            match self.tick().await {
                Ok(Tick::Sent) => tokio::time::sleep(self.interval).await,
                Ok(Tick::AuthorizationLost) => return RunExit::AuthorizationLost,
                Err(e) => {
                    self.summary.failures += 1;
                    match classify(&e) {
                        ErrorClass::AuthRevoked => {
                            error!(
                                "Authentication error detected: {}. The session may be revoked \
                                 or expired; generate a new one.",
                                e
                            );
                            return RunExit::AuthorizationRevoked(e.to_string());
                        }
                        ErrorClass::Connectivity => warn!(
                            "{}. Attempting to reconnect in {}s...",
                            e,
                            RETRY_BACKOFF.as_secs()
                        ),
                        ErrorClass::Transient => warn!(
                            "An error occurred: {}. Trying again in {}s...",
                            e,
                            RETRY_BACKOFF.as_secs()
                        ),
                    }
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn tick(&mut self) -> std::result::Result<Tick, ClientError> {
        if !self.client.is_connected() {
            self.transition(RunnerState::Connecting);
            warn!("Client disconnected, attempting to reconnect...");
            self.client.connect().await?;
            if !self.client.is_authorized().await? {
                error!("Re-authorization failed after reconnect. The session might be invalid.");
                return Ok(Tick::AuthorizationLost);
            }
            info!("Reconnected");
            self.transition(RunnerState::Running);
        }

        info!("Sending online status update...");
        self.client.update_status(false).await?;
        self.summary.heartbeats_sent += 1;
        self.summary.last_heartbeat = Some(Local::now());
        Ok(Tick::Sent)
    }

    async fn shut_down(&mut self) {
        self.transition(RunnerState::ShuttingDown);

        if self.client.is_connected() {
            info!("Setting status to offline before disconnecting...");
            match tokio::time::timeout(OFFLINE_TIMEOUT, self.client.update_status(true)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Could not set offline status: {}", e),
                Err(_) => warn!(
                    "Could not set offline status: no reply within {}s",
                    OFFLINE_TIMEOUT.as_secs()
                ),
            }
        }

        info!("Disconnecting client...");
        if let Err(e) = self.client.disconnect().await {
            warn!("Error while disconnecting: {}", e);
        }

        self.transition(RunnerState::Terminated);
        info!("Client disconnected. {}", self.summary);
    }

    fn transition(&mut self, next: RunnerState) {
        if self.state != next {
            debug!("Runner state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use crate::auth::NonInteractive;
    use crate::error::KeepOnlineError;
    use crate::telegram::{AccountInfo, MockAccountClient, SignInOutcome};

    const INTERVAL: Duration = Duration::from_secs(2 * 60);

    fn me() -> AccountInfo {
        AccountInfo {
            id: 42,
            first_name: "Ada".to_string(),
        }
    }

    /// A mock that starts authorized and stays connected unless a test flips
    /// `connected`.
    fn authorized_client(connected: Arc<AtomicBool>) -> MockAccountClient {
        let mut client = MockAccountClient::new();
        let on_connect = Arc::clone(&connected);
        client.expect_connect().returning(move || {
            on_connect.store(true, Ordering::SeqCst);
            Ok(())
        });
        client
            .expect_is_connected()
            .returning(move || connected.load(Ordering::SeqCst));
        client.expect_is_authorized().returning(|| Ok(true));
        client.expect_me().times(1).returning(|| Ok(me()));
        client.expect_disconnect().times(1).returning(|| Ok(()));
        client
    }

    fn runner(client: MockAccountClient) -> HeartbeatRunner<MockAccountClient> {
        HeartbeatRunner::new(client, Box::new(NonInteractive::for_token()), INTERVAL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_are_spaced_by_interval() {
        let connected = Arc::new(AtomicBool::new(false));
        let mut client = authorized_client(connected);

        let sent = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&sent);
        client
            .expect_update_status()
            .withf(|offline| !*offline)
            .returning(move |_| {
                record.lock().unwrap().push(Instant::now());
                Ok(())
            });
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .times(1)
            .returning(|_| Ok(()));

        let mut runner = runner(client);
        let exit = runner
            .run(tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(30)))
            .await
            .unwrap();

        assert_eq!(exit, RunExit::Interrupted);
        assert!(exit.is_clean());
        assert_eq!(runner.state(), RunnerState::Terminated);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!((sent[1] - sent[0]).as_secs(), INTERVAL.as_secs());
        assert_eq!((sent[2] - sent[1]).as_secs(), INTERVAL.as_secs());
        assert_eq!(runner.summary().heartbeats_sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_backs_off_and_reconnects() {
        let connected = Arc::new(AtomicBool::new(false));
        let connects = Arc::new(AtomicUsize::new(0));
        let auth_checks = Arc::new(AtomicUsize::new(0));

        let mut client = MockAccountClient::new();
        let on_connect = Arc::clone(&connected);
        let connect_count = Arc::clone(&connects);
        client.expect_connect().returning(move || {
            connect_count.fetch_add(1, Ordering::SeqCst);
            on_connect.store(true, Ordering::SeqCst);
            Ok(())
        });
        let link = Arc::clone(&connected);
        client
            .expect_is_connected()
            .returning(move || link.load(Ordering::SeqCst));
        let auth_count = Arc::clone(&auth_checks);
        client.expect_is_authorized().returning(move || {
            auth_count.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });
        client.expect_me().times(1).returning(|| Ok(me()));
        client.expect_disconnect().times(1).returning(|| Ok(()));

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&attempts);
        let drop_connection = Arc::clone(&connected);
        client
            .expect_update_status()
            .withf(|offline| !*offline)
            .returning(move |_| {
                let mut attempts = record.lock().unwrap();
                attempts.push(Instant::now());
                if attempts.len() == 1 {
                    drop_connection.store(false, Ordering::SeqCst);
                    Err(ClientError::Connection("connection reset".to_string()))
                } else {
                    Ok(())
                }
            });
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .times(1)
            .returning(|_| Ok(()));

        let mut runner = runner(client);
        let exit = runner
            .run(tokio::time::sleep(Duration::from_secs(90)))
            .await
            .unwrap();
        assert_eq!(exit, RunExit::Interrupted);

        // Same client: one connect at startup, one in the tick after backoff.
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        // Startup check plus the re-check after reconnecting.
        assert_eq!(auth_checks.load(Ordering::SeqCst), 2);

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!((attempts[1] - attempts[0]).as_secs(), RETRY_BACKOFF.as_secs());
        assert_eq!(runner.summary().failures, 1);
        assert_eq!(runner.summary().heartbeats_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_error_is_retried() {
        let connected = Arc::new(AtomicBool::new(false));
        let mut client = authorized_client(connected);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        client
            .expect_update_status()
            .withf(|offline| !*offline)
            .returning(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ClientError::Rpc {
                        code: 420,
                        name: "FLOOD_WAIT".to_string(),
                    })
                } else {
                    Ok(())
                }
            });
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .returning(|_| Ok(()));

        let mut runner = runner(client);
        let exit = runner
            .run(tokio::time::sleep(Duration::from_secs(61)))
            .await
            .unwrap();

        assert_eq!(exit, RunExit::Interrupted);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_session_stops_loop_and_shuts_down() {
        let connected = Arc::new(AtomicBool::new(false));
        let mut client = authorized_client(connected);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        client
            .expect_update_status()
            .withf(|offline| !*offline)
            .returning(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(())
                } else {
                    Err(ClientError::Rpc {
                        code: 401,
                        name: "AUTH_KEY_UNREGISTERED".to_string(),
                    })
                }
            });
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .times(1)
            .returning(|_| {
                Err(ClientError::Rpc {
                    code: 401,
                    name: "AUTH_KEY_UNREGISTERED".to_string(),
                })
            });

        let mut runner = runner(client);
        let exit = runner.run(std::future::pending()).await.unwrap();

        assert!(
            matches!(exit, RunExit::AuthorizationRevoked(ref msg) if msg.contains("AUTH_KEY_UNREGISTERED"))
        );
        assert!(!exit.is_clean());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(runner.state(), RunnerState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_survives_failed_offline_call() {
        let connected = Arc::new(AtomicBool::new(false));
        let mut client = authorized_client(connected);

        let mut seq = mockall::Sequence::new();
        client
            .expect_update_status()
            .withf(|offline| !*offline)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ClientError::Connection("broken pipe".to_string())));

        let mut runner = runner(client);
        let exit = runner
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(exit, RunExit::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_without_authorization_aborts() {
        let connected = Arc::new(AtomicBool::new(false));
        let on_connect = Arc::clone(&connected);
        let mut client = MockAccountClient::new();
        client.expect_connect().returning(move || {
            on_connect.store(true, Ordering::SeqCst);
            Ok(())
        });
        let probe = Arc::clone(&connected);
        client
            .expect_is_connected()
            .returning(move || probe.load(Ordering::SeqCst));
        let mut authorized = vec![false, true];
        client
            .expect_is_authorized()
            .times(2)
            .returning(move || Ok(authorized.pop().unwrap_or(false)));
        client.expect_me().returning(|| Ok(me()));
        let drop_connection = Arc::clone(&connected);
        client
            .expect_update_status()
            .withf(|offline| !*offline)
            .times(1)
            .returning(move |_| {
                drop_connection.store(false, Ordering::SeqCst);
                Err(ClientError::Connection("closed".to_string()))
            });
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .returning(|_| Ok(()));
        client.expect_disconnect().times(1).returning(|| Ok(()));

        let mut runner = runner(client);
        let exit = runner.run(std::future::pending()).await.unwrap();
        assert_eq!(exit, RunExit::AuthorizationLost);
    }

    #[tokio::test]
    async fn test_rejected_token_is_fatal_without_prompt() {
        let mut client = MockAccountClient::new();
        client.expect_connect().times(1).returning(|| Ok(()));
        client.expect_is_connected().returning(|| true);
        client.expect_is_authorized().returning(|| Ok(false));
        client.expect_request_login_code().never();
        client
            .expect_update_status()
            .withf(|offline| !*offline)
            .never();
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .times(1)
            .returning(|_| Ok(()));
        client.expect_disconnect().times(1).returning(|| Ok(()));

        let mut runner = runner(client);
        let err = runner.run(std::future::pending()).await.unwrap_err();

        assert!(matches!(err, KeepOnlineError::Auth(_)));
        assert!(err.to_string().contains("TELEGRAM_STRING_SESSION"));
        assert_eq!(runner.state(), RunnerState::Terminated);
    }

    #[tokio::test]
    async fn test_connect_failure_at_startup_is_returned() {
        let mut client = MockAccountClient::new();
        client
            .expect_connect()
            .times(1)
            .returning(|| Err(ClientError::Connection("dns failure".to_string())));
        client.expect_is_connected().returning(|| false);
        client.expect_disconnect().times(1).returning(|| Ok(()));

        let mut runner = runner(client);
        let err = runner.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, KeepOnlineError::Client(ClientError::Connection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_sent_when_no_heartbeat_ever_succeeded() {
        let connected = Arc::new(AtomicBool::new(false));
        let mut client = authorized_client(connected);

        client
            .expect_update_status()
            .withf(|offline| !*offline)
            .returning(|_| {
                Err(ClientError::Rpc {
                    code: 420,
                    name: "FLOOD_WAIT".to_string(),
                })
            });
        let offline_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&offline_calls);
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .returning(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let mut runner = runner(client);
        let exit = runner
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap();

        assert_eq!(exit, RunExit::Interrupted);
        assert_eq!(runner.summary().heartbeats_sent, 0);
        assert_eq!(offline_calls.load(Ordering::SeqCst), 1);
    }

    /// Never answers, like an operator who walked away from the prompt.
    struct Unanswered;

    #[async_trait::async_trait]
    impl CredentialSource for Unanswered {
        async fn phone(&mut self) -> Result<String> {
            std::future::pending().await
        }

        async fn code(&mut self) -> Result<String> {
            std::future::pending().await
        }

        async fn password(&mut self, _hint: Option<&str>) -> Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_login_prompt_shuts_down() {
        let mut client = MockAccountClient::new();
        client.expect_connect().times(1).returning(|| Ok(()));
        client.expect_is_connected().returning(|| true);
        client.expect_is_authorized().returning(|| Ok(false));
        client.expect_me().never();
        client
            .expect_update_status()
            .withf(|offline| *offline)
            .times(1)
            .returning(|_| Ok(()));
        client.expect_disconnect().times(1).returning(|| Ok(()));

        let mut runner = HeartbeatRunner::new(client, Box::new(Unanswered), INTERVAL);
        let started = Instant::now();
        let exit = runner
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(exit, RunExit::Interrupted);
        assert_eq!(started.elapsed().as_secs(), 1);
        assert_eq!(runner.state(), RunnerState::Terminated);
    }

    /// Delegates to a mock but takes an hour to connect.
    struct SlowConnect {
        inner: MockAccountClient,
        connecting: bool,
    }

    #[async_trait::async_trait]
    impl AccountClient for SlowConnect {
        async fn connect(&mut self) -> std::result::Result<(), ClientError> {
            self.connecting = true;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.inner.connect().await
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn is_authorized(&mut self) -> std::result::Result<bool, ClientError> {
            self.inner.is_authorized().await
        }

        async fn request_login_code(&mut self, phone: &str) -> std::result::Result<(), ClientError> {
            self.inner.request_login_code(phone).await
        }

        async fn sign_in(&mut self, code: &str) -> std::result::Result<SignInOutcome, ClientError> {
            self.inner.sign_in(code).await
        }

        async fn check_password(&mut self, password: &str) -> std::result::Result<(), ClientError> {
            self.inner.check_password(password).await
        }

        async fn me(&mut self) -> std::result::Result<AccountInfo, ClientError> {
            self.inner.me().await
        }

        async fn update_status(&mut self, offline: bool) -> std::result::Result<(), ClientError> {
            self.inner.update_status(offline).await
        }

        fn export_session(&self) -> std::result::Result<String, ClientError> {
            self.inner.export_session()
        }

        async fn disconnect(&mut self) -> std::result::Result<(), ClientError> {
            self.inner.disconnect().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_connecting_shuts_down_promptly() {
        let mut inner = MockAccountClient::new();
        inner.expect_connect().never();
        inner.expect_is_connected().returning(|| false);
        inner.expect_update_status().never();
        inner.expect_disconnect().times(1).returning(|| Ok(()));

        let client = SlowConnect {
            inner,
            connecting: false,
        };
        let mut runner = HeartbeatRunner::new(client, Box::new(NonInteractive::for_token()), INTERVAL);
        let started = Instant::now();
        let exit = runner
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(exit, RunExit::Interrupted);
        assert!(runner.client.connecting);
        assert_eq!(started.elapsed().as_secs(), 1);
        assert_eq!(runner.state(), RunnerState::Terminated);
    }

    #[test]
    fn test_summary_display() {
        let mut summary = RunSummary::new();
        summary.heartbeats_sent = 7;
        summary.failures = 1;
        let text = summary.to_string();
        assert!(text.starts_with("7 heartbeat(s) sent, 1 failure(s) since "));
        assert!(!text.contains("last at"));
    }
}
