//! Store configuration.
//!
//! [`StoreBuilder`] collects every store setting, validates them in one pass
//! and only then opens the connection pool.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{CodecSet, KeyPair};
use crate::pool::{Pool, PoolConfig};
use crate::serializer::{BinarySerializer, SessionSerializer};
use crate::session::SessionOptions;
use crate::store::{Connector, DefaultConnector, DialOptions, DialTarget, Store, TlsOptions};
use crate::Error;

pub const DEFAULT_MAX_LENGTH: usize = 4096;
pub const DEFAULT_KEY_PREFIX: &str = "session_";
/// TTL for sessions saved with a max-age of 0: 20 minutes.
pub const DEFAULT_MAX_AGE: i64 = 60 * 20;
pub const MAX_DATABASE: i64 = 15;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("exactly one connection option is required: use pool, address or url")]
    MissingTarget,

    #[error("only one connection option can be specified: pool, address and url are mutually exclusive")]
    ConflictingTargets,

    #[error("at least one key pair is required")]
    NoKeyPairs,

    #[error("key pair {0} has an empty authentication key")]
    EmptyAuthKey(usize),

    #[error("database number must be between 0 and {MAX_DATABASE}, got {0}")]
    InvalidDatabase(i64),

    #[error("pool size must be positive, got {0}")]
    InvalidPoolSize(usize),

    #[error("default max age cannot be negative, got {0}")]
    NegativeDefaultMaxAge(i64),

    #[error("network and address cannot be empty")]
    EmptyAddress,

    #[error("url cannot be empty")]
    EmptyUrl,

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported connection target: {0}")]
    UnsupportedTarget(&'static str),

    #[error("tls: {0}")]
    Tls(String),
}

/// Builds a [`Store`].
///
/// Exactly one connection option is required: [`pool`](Self::pool),
/// [`address`](Self::address) or [`url`](Self::url).
///
/// # Example
///
/// ```rust,no_run
/// use redistore::{KeyPair, StoreBuilder};
///
/// # async fn run() -> Result<(), redistore::Error> {
/// let store = StoreBuilder::new(KeyPair::from_flat(["new-auth-key", "new-encryption-key", "old-auth-key"]))
///     .address("tcp", "localhost:6379")
///     .database(1)
///     .max_length(8192)
///     .key_prefix("myapp_")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct StoreBuilder<C: Connector = DefaultConnector> {
    key_pairs: Vec<KeyPair>,
    pool: Option<Pool<C>>,
    address: Option<(String, String)>,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    database: i64,
    tls: Option<TlsOptions>,
    pool_config: PoolConfig,
    max_length: usize,
    key_prefix: String,
    default_max_age: i64,
    serializer: Arc<dyn SessionSerializer>,
    session_options: SessionOptions,
}

impl<C: Connector> std::fmt::Debug for StoreBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("key_pairs", &self.key_pairs.len())
            .field("pool", &self.pool.is_some())
            .field("address", &self.address)
            .field("url", &self.url.as_ref().map(|_| ".."))
            .field("database", &self.database)
            .field("tls", &self.tls)
            .field("pool_config", &self.pool_config)
            .field("max_length", &self.max_length)
            .field("key_prefix", &self.key_prefix)
            .field("default_max_age", &self.default_max_age)
            .field("serializer", &self.serializer)
            .field("session_options", &self.session_options)
            .finish()
    }
}

impl StoreBuilder {
    /// Starts a builder for the default connector with the given key pairs.
    pub fn new(key_pairs: Vec<KeyPair>) -> Self {
        Self::with_key_pairs(key_pairs)
    }
}

impl<C: Connector> StoreBuilder<C> {
    /// Starts a builder for any connector with the given key pairs.
    pub fn with_key_pairs(key_pairs: Vec<KeyPair>) -> Self {
        Self {
            key_pairs,
            pool: None,
            address: None,
            url: None,
            username: None,
            password: None,
            database: 0,
            tls: None,
            pool_config: PoolConfig::default(),
            max_length: DEFAULT_MAX_LENGTH,
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            default_max_age: DEFAULT_MAX_AGE,
            serializer: Arc::new(BinarySerializer),
            session_options: SessionOptions::default(),
        }
    }

    /// Uses an existing connection pool, whose connector the store adopts.
    /// Pool sizing and dial options are ignored.
    pub fn pool<D: Connector>(self, pool: Pool<D>) -> StoreBuilder<D> {
        StoreBuilder {
            key_pairs: self.key_pairs,
            pool: Some(pool),
            address: self.address,
            url: self.url,
            username: self.username,
            password: self.password,
            database: self.database,
            tls: self.tls,
            pool_config: self.pool_config,
            max_length: self.max_length,
            key_prefix: self.key_prefix,
            default_max_age: self.default_max_age,
            serializer: self.serializer,
            session_options: self.session_options,
        }
    }

    /// Connects to `address` over `network` (`"tcp"` or `"unix"`).
    pub fn address(mut self, network: impl Into<String>, address: impl Into<String>) -> Self {
        self.address = Some((network.into(), address.into()));
        self
    }

    /// Connects with a URL such as `redis://:password@localhost:6379/1`.
    ///
    /// Credentials and database come from the URL; [`auth`](Self::auth) and
    /// [`database`](Self::database) only apply to [`address`](Self::address).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into()).filter(|u: &String| !u.is_empty());
        self.password = Some(password.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Selects the Redis database, 0 through 15.
    pub fn database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    /// Dials over TLS. Needs the `tls` feature with the Redis connector.
    ///
    /// For URL targets a `rediss://` scheme already enables TLS with the
    /// system roots; these options replace that setup.
    pub fn tls(mut self, options: TlsOptions) -> Self {
        self.tls = Some(options);
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_config.max_size = size;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    pub fn wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_config.wait_timeout = timeout;
        self
    }

    /// Maximum size of a serialized session in bytes. `0` disables the check.
    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = length;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// TTL in seconds for sessions saved with a max-age of 0. `0` stores
    /// them without expiry.
    pub fn default_max_age(mut self, seconds: i64) -> Self {
        self.default_max_age = seconds;
        self
    }

    pub fn serializer(mut self, serializer: impl SessionSerializer) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Default cookie directives for new sessions.
    pub fn session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = options;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.session_options.path = path.into();
        self
    }

    /// Default cookie max-age for new sessions. Cookies older than this are
    /// rejected when read back.
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.session_options.max_age = seconds;
        self
    }

    /// Checks the settings without connecting to anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_pairs.is_empty() {
            return Err(ConfigError::NoKeyPairs);
        }
        if let Some(index) = self.key_pairs.iter().position(|pair| !pair.has_auth_key()) {
            return Err(ConfigError::EmptyAuthKey(index));
        }

        let targets = [
            self.pool.is_some(),
            self.address.is_some(),
            self.url.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        match targets {
            0 => return Err(ConfigError::MissingTarget),
            1 => {}
            _ => return Err(ConfigError::ConflictingTargets),
        }

        if let Some((network, address)) = &self.address {
            if network.is_empty() || address.is_empty() {
                return Err(ConfigError::EmptyAddress);
            }
        }
        if self.url.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::EmptyUrl);
        }
        if !(0..=MAX_DATABASE).contains(&self.database) {
            return Err(ConfigError::InvalidDatabase(self.database));
        }
        let pool_size = self
            .pool
            .as_ref()
            .map_or(self.pool_config.max_size, |pool| pool.config().max_size);
        if pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(pool_size));
        }
        if self.default_max_age < 0 {
            return Err(ConfigError::NegativeDefaultMaxAge(self.default_max_age));
        }

        Ok(())
    }

    /// Validates the settings, opens the pool and pings the server.
    ///
    /// Nothing is dialled when validation fails, and no store is returned
    /// when the server does not answer.
    #[tracing::instrument(name = "building session store", skip(self))]
    pub async fn build(self) -> Result<Store<C>, Error> {
        self.validate().map_err(|err| {
            tracing::error!(err = %err, "invalid store configuration");
            err
        })?;

        let owns_pool = self.pool.is_none();
        let pool = match self.pool {
            Some(pool) => pool,
            None => {
                let target = match (self.address, self.url) {
                    (Some((network, address)), _) => DialTarget::Address { network, address },
                    (None, Some(url)) => DialTarget::Url(url),
                    (None, None) => return Err(ConfigError::MissingTarget.into()),
                };
                let options = DialOptions {
                    username: self.username,
                    password: self.password,
                    database: u8::try_from(self.database)
                        .map_err(|_| ConfigError::InvalidDatabase(self.database))?,
                    tls: self.tls,
                };
                Pool::new(C::from_target(&target, &options)?, self.pool_config)
            }
        };

        let mut codecs = CodecSet::new(&self.key_pairs);
        codecs.set_max_age(self.session_options.max_age);

        let store = Store {
            pool,
            codecs,
            options: self.session_options,
            default_max_age: self.default_max_age,
            max_length: self.max_length,
            key_prefix: self.key_prefix,
            serializer: self.serializer,
        };

        if let Err(err) = store.ping().await {
            tracing::error!(err = %err, "failed to connect to the session store");
            if owns_pool {
                store.close().await;
            }
            return Err(err);
        }

        Ok(store)
    }
}
