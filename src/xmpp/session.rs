// Session lifecycle: login, connection/account status bookkeeping, and the
// explicit indefinite reconnection loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use super::connection::{
    Connection, ConnectionConfig, ConnectionEvent, EventSubscription, Transport,
};
use crate::error::Error;
use crate::models::{Account, AccountStatus, ConnectionStatus};
use crate::store::{AccountStore, ConnectionStatusStore};

const RECONNECT_BASE_MS: u64 = 500;
const RECONNECT_CAP_MS: u64 = 60_000;

/// Explicit session state. There is no "uninitialized" handle to poke at:
/// either a connection is live or it is not.
enum SessionState {
    NoSession,
    Connecting,
    Active(Arc<dyn Connection>),
}

/// Read-side access to the current live connection. Consumers fetch the
/// handle per operation and never cache it across a reconnect.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connection(&self) -> Result<Arc<dyn Connection>, Error>;
}

/// Owns the one live connection of the process. A second login replaces the
/// session rather than duplicating it.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    accounts: Arc<dyn AccountStore>,
    statuses: Arc<dyn ConnectionStatusStore>,
    state: Arc<TokioMutex<SessionState>>,
    monitor: TokioMutex<Option<JoinHandle<()>>>,
    // Serializes login and shutdown end to end; concurrent attempts would
    // otherwise race past teardown and leave two live connections.
    attempt_gate: TokioMutex<()>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        accounts: Arc<dyn AccountStore>,
        statuses: Arc<dyn ConnectionStatusStore>,
    ) -> Self {
        SessionManager {
            transport,
            accounts,
            statuses,
            state: Arc::new(TokioMutex::new(SessionState::NoSession)),
            monitor: TokioMutex::new(None),
            attempt_gate: TokioMutex::new(()),
        }
    }

    /// Restore the session on startup: reset the connection status to
    /// neutral and log the stored account in, if there is one. No-op while
    /// a session is live or being established.
    pub async fn initialize(&self) {
        {
            let state = self.state.lock().await;
            if !matches!(*state, SessionState::NoSession) {
                debug!("Session already live, skipping initialize");
                return;
            }
        }

        self.statuses.update_status(ConnectionStatus::default()).await;

        if let Some(account) = self.accounts.account().await {
            self.login(account).await;
        }
    }

    /// Connect and authenticate as one atomic attempt, replacing any live
    /// session. The outcome is absorbed into the persisted account status;
    /// callers observe it through the reactive account stream, never as an
    /// error from this call.
    pub async fn login(&self, account: Account) {
        let _attempt = self.attempt_gate.lock().await;
        self.teardown_current().await;
        *self.state.lock().await = SessionState::Connecting;

        let config = ConnectionConfig::from(&account);
        match self.transport.connect(&config).await {
            Ok(connection) => self.connection_success(account, connection).await,
            Err(error) => self.connection_failure(account, error).await,
        }
    }

    /// The live connection handle. Callers re-fetch per operation instead of
    /// caching, since a reconnect may replace the handle at any time.
    pub async fn get_connection(&self) -> Result<Arc<dyn Connection>, Error> {
        match &*self.state.lock().await {
            SessionState::Active(connection) => Ok(connection.clone()),
            _ => Err(Error::NoActiveSession),
        }
    }

    /// In-band registration is not implemented.
    pub async fn register(&self, _account: Account) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    /// Stop monitoring and release the connection. Idempotent.
    pub async fn shutdown(&self) {
        let _attempt = self.attempt_gate.lock().await;
        self.teardown_current().await;
    }

    async fn connection_success(&self, account: Account, connection: Arc<dyn Connection>) {
        debug!("authenticated: {}", connection.is_authenticated());

        // Subscribe before anything can observe the session as live, so a
        // disconnect fired ahead of the monitor task is buffered, not lost.
        let events = connection.subscribe();

        // The handle goes live before the status flips, so anyone reacting
        // to availability can already fetch the connection.
        *self.state.lock().await = SessionState::Active(connection.clone());

        self.accounts
            .update_account(account.with_status(AccountStatus::Online))
            .await;
        self.statuses
            .update_status(ConnectionStatus {
                availability: true,
                authenticated: connection.is_authenticated(),
            })
            .await;

        let monitor = tokio::spawn(monitor_connection(
            self.transport.clone(),
            self.accounts.clone(),
            self.statuses.clone(),
            self.state.clone(),
            account,
            events,
        ));
        if let Some(previous) = self.monitor.lock().await.replace(monitor) {
            previous.abort();
        }
    }

    async fn connection_failure(&self, account: Account, error: Error) {
        warn!("Login for {} failed: {}", account.jid(), error);
        self.accounts
            .update_account(account.with_status(error.account_status()))
            .await;
        *self.state.lock().await = SessionState::NoSession;
    }

    async fn teardown_current(&self) {
        if let Some(task) = self.monitor.lock().await.take() {
            task.abort();
        }
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, SessionState::NoSession)
        };
        if let SessionState::Active(connection) = previous {
            if let Err(e) = connection.close().await {
                warn!("Error closing connection: {}", e);
            }
        }
    }
}

#[async_trait]
impl ConnectionProvider for SessionManager {
    async fn connection(&self) -> Result<Arc<dyn Connection>, Error> {
        self.get_connection().await
    }
}

/// Watches the live connection for transport-level disconnects and redials
/// indefinitely. Dies only through `shutdown` or a replacing `login`.
async fn monitor_connection(
    transport: Arc<dyn Transport>,
    accounts: Arc<dyn AccountStore>,
    statuses: Arc<dyn ConnectionStatusStore>,
    state: Arc<TokioMutex<SessionState>>,
    account: Account,
    mut events: EventSubscription,
) {
    let config = ConnectionConfig::from(&account);

    loop {
        loop {
            match events.recv().await {
                Some(ConnectionEvent::Disconnected { reason }) => {
                    warn!("Connection lost ({}), reconnecting", reason);
                    break;
                }
                Some(_) => {}
                None => {
                    warn!("Connection event stream closed, reconnecting");
                    break;
                }
            }
        }

        statuses.update_status(ConnectionStatus::default()).await;
        *state.lock().await = SessionState::Connecting;

        let (connection, fresh_events) = redial(transport.as_ref(), &config).await;
        events = fresh_events;

        // Handle first, status second, same as the initial login
        *state.lock().await = SessionState::Active(connection.clone());
        accounts
            .update_account(account.with_status(AccountStatus::Online))
            .await;
        statuses
            .update_status(ConnectionStatus {
                availability: true,
                authenticated: connection.is_authenticated(),
            })
            .await;
        info!("Reconnected as {}", account.jid());
    }
}

/// Retry the transport until it answers, with exponential backoff and
/// jitter. Never gives up; the transport owns no retry of its own.
/// The fresh subscription is taken here, before the caller publishes the
/// connection, so no disconnect window opens between the two.
async fn redial(
    transport: &dyn Transport,
    config: &ConnectionConfig,
) -> (Arc<dyn Connection>, EventSubscription) {
    let mut attempt: u32 = 0;
    loop {
        match transport.connect(config).await {
            Ok(connection) => {
                let events = connection.subscribe();
                return (connection, events);
            }
            Err(error) => {
                attempt = attempt.saturating_add(1);
                let base = RECONNECT_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.min(7)));
                let jitter = rand::random::<u64>() % 500;
                let backoff = Duration::from_millis(base.min(RECONNECT_CAP_MS) + jitter);
                warn!(
                    "Reconnect attempt {} failed: {}; retrying in {:?}",
                    attempt, error, backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
