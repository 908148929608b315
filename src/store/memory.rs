use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::Error;
use crate::config::ConfigError;
use crate::store::{Connection, Connector, DialOptions, DialTarget};

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self) -> bool {
        self.expires_at.map(|e| e > Instant::now()).unwrap_or(true)
    }
}

/// An in-process stand-in for a Redis server.
///
/// Every connection dialled from a `MemoryConnector` (and its clones) sees
/// the same keyspace. The connector also counts dials, open connections and
/// writes, and can simulate an unreachable or restarted server, which makes
/// it the backend of choice for tests.
///
/// ### Note
///
/// Do not use this in a production environment.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<State>,
}

#[derive(Debug, Default)]
struct State {
    data: DashMap<String, StoredValue>,
    dialled: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    writes: AtomicUsize,
    refuse: AtomicBool,
    // connections dialled before the current generation are dead
    generation: AtomicU64,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent dials fail, like an unreachable server.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Kills every connection dialled so far, like a server restart.
    pub fn break_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of successful dials.
    pub fn dialled(&self) -> usize {
        self.state.dialled.load(Ordering::SeqCst)
    }

    /// Connections dialled and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn peak_open_connections(&self) -> usize {
        self.state.peak_open.load(Ordering::SeqCst)
    }

    /// Number of `SET`/`SETEX` commands served.
    pub fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state
            .data
            .get(key)
            .map(|value| value.is_live())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.state.data.iter().filter(|v| v.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cleanup_expired(&self) {
        self.state.data.retain(|_, value| value.is_live());
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, Error> {
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(Error::Backend("connection refused".to_owned()));
        }

        self.state.dialled.fetch_add(1, Ordering::SeqCst);
        let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_open.fetch_max(open, Ordering::SeqCst);

        Ok(MemoryConnection {
            connector: self.clone(),
            generation: self.state.generation.load(Ordering::SeqCst),
        })
    }

    fn from_target(_target: &DialTarget, _options: &DialOptions) -> Result<Self, ConfigError> {
        Err(ConfigError::UnsupportedTarget(
            "the in-memory connector only works with a pre-built pool",
        ))
    }
}

/// A connection to a [`MemoryConnector`] keyspace.
#[derive(Debug)]
pub struct MemoryConnection {
    connector: MemoryConnector,
    generation: u64,
}

impl MemoryConnection {
    fn state(&self) -> Result<&State, Error> {
        let state = &self.connector.state;
        if state.generation.load(Ordering::SeqCst) != self.generation {
            return Err(Error::Backend("connection reset by peer".to_owned()));
        }
        Ok(state)
    }

    fn write(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        let state = self.state()?;
        state.writes.fetch_add(1, Ordering::SeqCst);
        state.data.insert(
            key.to_owned(),
            StoredValue {
                data: value.to_vec(),
                expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
            },
        );
        Ok(())
    }
}

impl Connection for MemoryConnection {
    async fn ping(&mut self) -> Result<String, Error> {
        self.state()?;
        Ok("PONG".to_owned())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.state()?;
        self.connector.cleanup_expired();
        Ok(self
            .connector
            .state
            .data
            .get(key)
            .map(|value| value.data.clone()))
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        self.write(key, value, None)
    }

    async fn set_ex(&mut self, key: &str, seconds: i64, value: &[u8]) -> Result<(), Error> {
        if seconds <= 0 {
            return Err(Error::Backend(
                "ERR invalid expire time in 'setex' command".to_owned(),
            ));
        }
        self.write(key, value, Some(Duration::from_secs(seconds.unsigned_abs())))
    }

    async fn del(&mut self, key: &str) -> Result<i64, Error> {
        let state = self.state()?;
        self.connector.cleanup_expired();
        Ok(state.data.remove(key).map(|_| 1).unwrap_or(0))
    }

    async fn exists(&mut self, key: &str) -> Result<bool, Error> {
        self.state()?;
        Ok(self.connector.contains_key(key))
    }

    async fn ttl(&mut self, key: &str) -> Result<i64, Error> {
        self.state()?;
        self.connector.cleanup_expired();
        let ttl = match self.connector.state.data.get(key) {
            None => -2,
            Some(value) => match value.expires_at {
                None => -1,
                Some(expires_at) => {
                    let remaining = expires_at.saturating_duration_since(Instant::now());
                    remaining.as_secs_f64().round() as i64
                }
            },
        };
        Ok(ttl)
    }

    async fn close(self) -> Result<(), Error> {
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.connector.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_share_one_keyspace() {
        let connector = MemoryConnector::new();
        let mut first = connector.connect().await.unwrap();
        let mut second = connector.connect().await.unwrap();

        first.set_ex("k", 60, b"v").await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(second.exists("k").await.unwrap());
        assert_eq!(second.ttl("k").await.unwrap(), 60);

        assert_eq!(second.del("k").await.unwrap(), 1);
        assert_eq!(first.del("k").await.unwrap(), 0);
        assert_eq!(first.ttl("k").await.unwrap(), -2);

        first.set("forever", b"v").await.unwrap();
        assert_eq!(first.ttl("forever").await.unwrap(), -1);
        assert_eq!(connector.writes(), 2);
    }

    #[tokio::test]
    async fn setex_requires_a_positive_ttl() {
        let connector = MemoryConnector::new();
        let mut conn = connector.connect().await.unwrap();
        assert!(conn.set_ex("k", 0, b"v").await.is_err());
    }

    #[tokio::test]
    async fn broken_connections_fail_every_command() {
        let connector = MemoryConnector::new();
        let mut conn = connector.connect().await.unwrap();
        connector.break_connections();

        assert!(conn.ping().await.is_err());
        assert!(conn.get("k").await.is_err());

        let mut fresh = connector.connect().await.unwrap();
        assert_eq!(fresh.ping().await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn open_connections_are_counted() {
        let connector = MemoryConnector::new();
        let conn = connector.connect().await.unwrap();
        let other = connector.connect().await.unwrap();
        assert_eq!(connector.open_connections(), 2);

        conn.close().await.unwrap();
        drop(other);
        assert_eq!(connector.open_connections(), 0);
        assert_eq!(connector.peak_open_connections(), 2);

        connector.refuse_connections(true);
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.dialled(), 2);
    }
}
