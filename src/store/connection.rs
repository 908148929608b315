use std::future::Future;

use crate::Error;

/// A single connection to the remote key-value store.
///
/// These are the only commands the session store issues.
pub trait Connection: Send + 'static {
    /// `PING`, returning the server's reply (normally `"PONG"`).
    fn ping(&mut self) -> impl Future<Output = Result<String, Error>> + Send;

    /// `GET key`.
    fn get(&mut self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, Error>> + Send;

    /// `SET key value`, without expiry.
    fn set(&mut self, key: &str, value: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;

    /// `SETEX key seconds value`.
    fn set_ex(
        &mut self,
        key: &str,
        seconds: i64,
        value: &[u8],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// `DEL key`, returning the number of removed keys.
    fn del(&mut self, key: &str) -> impl Future<Output = Result<i64, Error>> + Send;

    /// `EXISTS key`.
    fn exists(&mut self, key: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// `TTL key`: seconds remaining, `-1` without expiry, `-2` when missing.
    fn ttl(&mut self, key: &str) -> impl Future<Output = Result<i64, Error>> + Send;

    /// Closes the connection.
    fn close(self) -> impl Future<Output = Result<(), Error>> + Send
    where
        Self: Sized;
}

/// Where a [`Connector`] dials to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialTarget {
    Address { network: String, address: String },
    Url(String),
}

/// Credentials and database selection applied to every dialled connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DialOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u8,
    /// Dial over TLS when set.
    pub tls: Option<TlsOptions>,
}

/// TLS settings for dialled connections.
///
/// With no root certificates the system roots are trusted.
///
/// ```rust
/// use redistore::TlsOptions;
///
/// # let ca_der: Vec<u8> = Vec::new();
/// let options = TlsOptions::build().root_certificate(ca_der);
/// let testing_only = TlsOptions::build().skip_verify(true);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Accept any server certificate. Handshake signatures are still checked.
    pub skip_verify: bool,
    /// DER-encoded certificates trusted instead of the system roots.
    pub root_certificates: Vec<Vec<u8>>,
}

impl TlsOptions {
    pub fn build() -> Self {
        Self::default()
    }

    pub fn skip_verify(mut self, skip_verify: bool) -> Self {
        self.skip_verify = skip_verify;
        self
    }

    pub fn root_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.root_certificates.push(der.into());
        self
    }
}

/// Opens new [`Connection`]s for a [`Pool`](crate::Pool).
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Opens a connection. Failures are returned as is, never retried.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Error>> + Send;

    /// Builds a connector for an address or URL target.
    fn from_target(target: &DialTarget, options: &DialOptions) -> Result<Self, crate::ConfigError>
    where
        Self: Sized;
}
