//! A bounded pool of connections to the remote store.
//!
//! Capacity is enforced with a semaphore: callers past the limit wait for a
//! connection to come back instead of being rejected. Idle connections are
//! probed with `PING` before reuse and dropped once they have sat idle past
//! the configured timeout.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{ConfigError, Error};
use crate::store::{Connection, Connector};

pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(240);

/// Pool sizing and timeouts.
///
/// # Example
///
/// ```rust
/// use redistore::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::build()
///     .max_size(32)
///     .idle_timeout(Some(Duration::from_secs(60)))
///     .wait_timeout(Some(Duration::from_secs(2)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections.
    pub max_size: usize,
    /// Idle connections older than this are closed instead of reused.
    /// `None` keeps them forever.
    pub idle_timeout: Option<Duration>,
    /// How long `acquire` may wait for capacity. `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            wait_timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn build() -> Self {
        Self::default()
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn wait_timeout(mut self, wait_timeout: Option<Duration>) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }
}

/// A point-in-time view of the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently open, borrowed or idle.
    pub open: usize,
    pub idle: usize,
}

/// A connection pool. Clones share the same connections.
pub struct Pool<C: Connector> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Connector> {
    connector: C,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
    open: AtomicUsize,
    closed: AtomicBool,
}

struct IdleConnection<T> {
    conn: T,
    since: Instant,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: Connector> Pool<C> {
    /// Creates an empty pool. Connections are dialled on demand.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size));
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                semaphore,
                idle: Mutex::new(VecDeque::new()),
                open: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Borrows a connection, waiting while the pool is at capacity.
    ///
    /// An idle connection is reused when one is available and answers
    /// `PING`; dead or stale ones are closed and replaced. Otherwise a new
    /// connection is dialled, and a dial failure is returned to this caller.
    #[tracing::instrument(name = "acquiring pooled connection", skip(self))]
    pub async fn acquire(&self) -> Result<PooledConnection<C>, Error> {
        let permit = match self.shared.config.wait_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.acquire_permit())
                .await
                .map_err(|_| {
                    tracing::warn!(?timeout, "timed out waiting for a pooled connection");
                    Error::PoolTimeout
                })??,
            None => self.acquire_permit().await?,
        };

        loop {
            let idle = self.shared.idle.lock().pop_back();
            let Some(idle) = idle else {
                break;
            };

            if self.shared.is_expired(&idle) {
                tracing::debug!("closing connection past its idle timeout");
                self.shared.close_connection(idle.conn).await;
                continue;
            }

            let mut conn = PooledConnection {
                conn: Some(idle.conn),
                shared: Arc::clone(&self.shared),
                _permit: None,
            };
            match conn.ping().await {
                Ok(_) => {
                    conn._permit = Some(permit);
                    return Ok(conn);
                }
                Err(err) => {
                    tracing::debug!(err = %err, "discarding idle connection that failed its health check");
                    conn.discard().await;
                }
            }
        }

        let conn = self.shared.connector.connect().await.map_err(|err| {
            tracing::error!(err = %err, "failed to open connection");
            err
        })?;
        self.shared.open.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("opened new connection");

        Ok(PooledConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
            _permit: Some(permit),
        })
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, Error> {
        // nothing would ever release a permit
        if self.shared.config.max_size == 0 {
            return Err(ConfigError::InvalidPoolSize(0).into());
        }

        let permit = Arc::clone(&self.shared.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        Ok(permit)
    }

    /// Closes the pool.
    ///
    /// Waiting and future `acquire` calls fail with [`Error::PoolClosed`].
    /// Idle connections are closed now; borrowed ones when they are
    /// released. Calling this again has no effect.
    #[tracing::instrument(name = "closing connection pool", skip(self))]
    pub async fn close(&self) {
        // flipped under the idle lock so no release can slip in behind the drain
        let idle: Vec<_> = {
            let mut idle = self.shared.idle.lock();
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            idle.drain(..).collect()
        };
        self.shared.semaphore.close();

        for idle in idle {
            self.shared.close_connection(idle.conn).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            max_size: self.shared.config.max_size,
            open: self.shared.open.load(Ordering::Acquire),
            idle: self.shared.idle.lock().len(),
        }
    }
}

impl<C: Connector> Shared<C> {
    fn is_expired(&self, idle: &IdleConnection<C::Connection>) -> bool {
        self.config
            .idle_timeout
            .is_some_and(|timeout| idle.since.elapsed() > timeout)
    }

    async fn close_connection(&self, conn: C::Connection) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        if let Err(err) = conn.close().await {
            tracing::warn!(err = %err, "error closing connection");
        }
    }

    fn release(&self, conn: C::Connection) {
        let stale = {
            let mut idle = self.idle.lock();
            if self.closed.load(Ordering::Acquire) {
                drop(idle);
                self.close_in_background(vec![conn]);
                return;
            }

            let mut stale = Vec::new();
            while idle.front().is_some_and(|oldest| self.is_expired(oldest)) {
                if let Some(oldest) = idle.pop_front() {
                    stale.push(oldest.conn);
                }
            }
            idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
            stale
        };

        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "closing connections past their idle timeout");
            self.close_in_background(stale);
        }
    }

    fn close_in_background(&self, conns: Vec<C::Connection>) {
        self.open.fetch_sub(conns.len(), Ordering::AcqRel);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for conn in conns {
                        if let Err(err) = conn.close().await {
                            tracing::warn!(err = %err, "error closing connection");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    count = conns.len(),
                    "no async runtime to close connections on, dropping them"
                );
            }
        }
    }
}

/// A borrowed connection. Dropping it returns the connection to the pool.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    shared: Arc<Shared<C>>,
    // released after the connection is back in the idle set
    _permit: Option<OwnedSemaphorePermit>,
}

impl<C: Connector> PooledConnection<C> {
    /// Closes the connection instead of returning it to the pool.
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.close_connection(conn).await;
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection is only taken on release"))
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("connection is only taken on release"))
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn);
        }
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}
