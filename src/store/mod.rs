//! The session store: cookie handling on one side, Redis on the other.

use std::sync::Arc;

use tower_cookies::Cookies;

use crate::codec::CodecSet;
use crate::error::LoadError;
use crate::pool::{Pool, PooledConnection};
use crate::serializer::SessionSerializer;
use crate::service::Registry;
use crate::session::{Id, Session, SessionOptions};
use crate::Error;

mod connection;
pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

pub use connection::*;
pub use memory::{MemoryConnection, MemoryConnector};
#[cfg(feature = "redis-store")]
pub use redis::{RedisConnection, RedisConnector};

/// The connector used when none is named.
#[cfg(feature = "redis-store")]
pub type DefaultConnector = RedisConnector;
#[cfg(not(feature = "redis-store"))]
pub type DefaultConnector = MemoryConnector;

/// Stores sessions in Redis and their identifiers in signed, optionally
/// encrypted, cookies.
///
/// Build one with [`StoreBuilder`](crate::StoreBuilder) and share it behind
/// an [`Arc`]. The store keeps no per-request state.
pub struct Store<C: Connector = DefaultConnector> {
    pub(crate) pool: Pool<C>,
    pub(crate) codecs: CodecSet,
    pub(crate) options: SessionOptions,
    pub(crate) default_max_age: i64,
    pub(crate) max_length: usize,
    pub(crate) key_prefix: String,
    pub(crate) serializer: Arc<dyn SessionSerializer>,
}

impl<C: Connector> std::fmt::Debug for Store<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("pool", &self.pool)
            .field("codecs", &self.codecs)
            .field("options", &self.options)
            .field("default_max_age", &self.default_max_age)
            .field("max_length", &self.max_length)
            .field("key_prefix", &self.key_prefix)
            .field("serializer", &self.serializer)
            .finish()
    }
}

impl<C: Connector> Store<C> {
    /// Returns the session registered under `name` for this request, loading
    /// it on first use.
    ///
    /// Every call with the same registry and name yields the same shared
    /// session. A failed load registers and carries the fresh session.
    pub async fn get(
        &self,
        registry: &Registry<C>,
        cookies: &Cookies,
        name: &str,
    ) -> Result<Session, LoadError> {
        if let Some(session) = registry.get(name) {
            return Ok(session);
        }

        match self.new_session(cookies, name).await {
            Ok(session) => Ok(registry.register(session)),
            Err(err) => {
                registry.register(err.session.clone());
                Err(err)
            }
        }
    }

    /// Creates a session, loading its values when the request carries a
    /// valid cookie named `name`.
    ///
    /// The result is never empty-handed: on failure the fresh session rides
    /// along in the [`LoadError`].
    #[tracing::instrument(name = "loading session", skip(self, cookies))]
    pub async fn new_session(&self, cookies: &Cookies, name: &str) -> Result<Session, LoadError> {
        let session = Session::new(name, self.options.clone());

        let Some(cookie) = cookies.get(name) else {
            return Ok(session);
        };

        let id = match self.decode_id(name, cookie.value()) {
            Ok(id) => id,
            Err(source) => {
                tracing::warn!(err = %source, "possibly suspicious activity: undecodable session cookie");
                return Err(LoadError { session, source });
            }
        };
        session.assign_id(id);

        match self.load_record(&session).await {
            Ok(found) => {
                session.set_is_new(!found);
                Ok(session)
            }
            Err(source) => {
                tracing::error!(err = %source, "failed to load session");
                Err(LoadError { session, source })
            }
        }
    }

    /// Persists the session and sets its cookie.
    ///
    /// A negative max-age deletes the session instead.
    #[tracing::instrument(name = "saving session", skip(self, cookies, session), fields(session = session.name()))]
    pub async fn save(&self, cookies: &Cookies, session: &Session) -> Result<(), Error> {
        let options = session.options();
        if options.max_age < 0 {
            return self.delete(cookies, session).await;
        }

        let id = session.id_or_gen().to_string();
        let value = self.codecs.encode(session.name(), &id)?;
        let cookie = options.to_cookie(session.name(), value);

        self.save_record(session).await?;
        cookies.add(cookie);
        Ok(())
    }

    /// Removes the session from Redis, empties it and expires its cookie.
    #[tracing::instrument(name = "deleting session", skip(self, cookies, session), fields(session = session.name()))]
    pub async fn delete(&self, cookies: &Cookies, session: &Session) -> Result<(), Error> {
        self.delete_record(session).await?;
        session.clear();
        cookies.add(session.options().to_expired_cookie(session.name()));
        Ok(())
    }

    /// Writes the session's values to Redis, assigning an identifier first
    /// when it has none.
    pub async fn save_record(&self, session: &Session) -> Result<(), Error> {
        let data = self.serializer.serialize(session)?;
        if self.max_length != 0 && data.len() > self.max_length {
            return Err(Error::PayloadTooLarge {
                size: data.len(),
                limit: self.max_length,
            });
        }

        let key = self.key_for(&session.id_or_gen());
        let ttl = match session.max_age() {
            0 => self.default_max_age,
            max_age => max_age,
        };

        let mut conn = self.pool.acquire().await?;
        let result = if ttl > 0 {
            conn.set_ex(&key, ttl, &data).await
        } else {
            conn.set(&key, &data).await
        };
        settle(conn, result).await.inspect_err(|err| {
            tracing::error!(err = %err, "failed to write session");
        })
    }

    /// Reads the session's values from Redis into it.
    ///
    /// Returns `false` when the session has no identifier or nothing is
    /// stored under it.
    pub async fn load_record(&self, session: &Session) -> Result<bool, Error> {
        let Some(id) = session.id() else {
            return Ok(false);
        };

        let mut conn = self.pool.acquire().await?;
        let result = conn.get(&self.key_for(&id)).await;
        let Some(data) = settle(conn, result).await? else {
            return Ok(false);
        };

        self.serializer.deserialize(&data, session)?;
        Ok(true)
    }

    /// Deletes the session's record. Sessions without an identifier were
    /// never stored, so nothing is sent.
    pub async fn delete_record(&self, session: &Session) -> Result<(), Error> {
        let Some(id) = session.id() else {
            return Ok(());
        };

        let mut conn = self.pool.acquire().await?;
        let result = conn.del(&self.key_for(&id)).await;
        settle(conn, result).await.map(|_| ()).inspect_err(|err| {
            tracing::error!(err = %err, "failed to delete session");
        })
    }

    /// Checks the server is reachable. `true` when it answers `PONG`.
    pub async fn ping(&self) -> Result<bool, Error> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.ping().await;
        settle(conn, result).await.map(|reply| reply == "PONG")
    }

    /// The Redis key a session identifier is stored under.
    pub fn key_for(&self, id: &Id) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// The connection pool the store borrows from.
    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    /// Cookie directives given to new sessions.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Prepended to every session identifier to form its Redis key.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// The payload ceiling in bytes. `0` means no limit.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// TTL in seconds for sessions saved with a max-age of 0.
    pub fn default_max_age(&self) -> i64 {
        self.default_max_age
    }

    /// Sets the payload ceiling in bytes. `0` disables it.
    pub fn set_max_length(&mut self, length: usize) {
        self.max_length = length;
    }

    /// Sets the prefix for Redis keys. Records saved under the old prefix
    /// are no longer found.
    pub fn set_key_prefix(&mut self, prefix: impl Into<String>) {
        self.key_prefix = prefix.into();
    }

    /// Replaces the serializer. Records written with the previous one may
    /// fail to decode.
    pub fn set_serializer(&mut self, serializer: impl SessionSerializer) {
        self.serializer = Arc::new(serializer);
    }

    /// Sets the cookie max-age given to new sessions, and the age past which
    /// a cookie is no longer accepted. Sessions saved with a max-age of 0
    /// still use the default TTL in Redis.
    pub fn set_max_age(&mut self, seconds: i64) {
        self.options.max_age = seconds;
        self.codecs.set_max_age(seconds);
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn decode_id(&self, name: &str, value: &str) -> Result<Id, Error> {
        let decoded = self.codecs.decode(name, value)?;
        decoded
            .parse::<Id>()
            .map_err(|err| Error::Cookie(err.to_string()))
    }
}

// Connections that failed a command are closed rather than reused.
async fn settle<C: Connector, T>(
    conn: PooledConnection<C>,
    result: Result<T, Error>,
) -> Result<T, Error> {
    if result.is_err() {
        conn.discard().await;
    }
    result
}
