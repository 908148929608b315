use fred::prelude::{
    Builder, Client, ClientLike, Config, Expiration, KeysInterface, ServerConfig,
};

use crate::Error;
use crate::config::ConfigError;
use crate::store::{Connection, Connector, DialOptions, DialTarget, TlsOptions};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;

/// Dials Redis connections with [`fred`].
///
/// Each pooled connection is its own `fred` client. Use
/// [`RedisConnector::new`] with a hand-built [`Config`] for settings the
/// store builder does not expose.
///
/// ```rust,no_run
/// use redistore::{Pool, PoolConfig, RedisConnector};
/// use redistore::fred::prelude::Config;
///
/// let config = Config::from_url("redis://127.0.0.1:6379/0").unwrap();
/// let pool = Pool::new(RedisConnector::new(config), PoolConfig::default());
/// ```
#[derive(Clone, Debug)]
pub struct RedisConnector {
    config: Config,
}

impl RedisConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Connector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self) -> Result<RedisConnection, Error> {
        let client = Builder::from_config(self.config.clone()).build()?;
        client.init().await?;
        Ok(RedisConnection { client })
    }

    fn from_target(target: &DialTarget, options: &DialOptions) -> Result<Self, ConfigError> {
        let mut config = match target {
            DialTarget::Url(url) => {
                Config::from_url(url).map_err(|err| ConfigError::InvalidUrl(err.to_string()))?
            }
            DialTarget::Address { network, address } => {
                let server = match network.as_str() {
                    "tcp" | "tcp4" | "tcp6" => {
                        let (host, port) = split_host_port(address)?;
                        ServerConfig::new_centralized(host, port)
                    }
                    "unix" => ServerConfig::Unix {
                        path: address.into(),
                    },
                    other => return Err(ConfigError::UnsupportedNetwork(other.to_owned())),
                };

                Config {
                    server,
                    username: options.username.clone(),
                    password: options.password.clone().filter(|p| !p.is_empty()),
                    database: Some(options.database),
                    ..Default::default()
                }
            }
        };

        if let Some(tls) = &options.tls {
            apply_tls(&mut config, tls)?;
        }

        Ok(Self::new(config))
    }
}

#[cfg(feature = "tls")]
fn apply_tls(config: &mut Config, options: &TlsOptions) -> Result<(), ConfigError> {
    config.tls = Some(tls::client_config(options)?);
    Ok(())
}

#[cfg(not(feature = "tls"))]
fn apply_tls(_: &mut Config, _: &TlsOptions) -> Result<(), ConfigError> {
    Err(ConfigError::Tls("built without the `tls` feature".to_owned()))
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;

    use fred::prelude::{TlsConfig, TlsConnector};
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

    use crate::config::ConfigError;
    use crate::store::TlsOptions;

    pub(super) fn client_config(options: &TlsOptions) -> Result<TlsConfig, ConfigError> {
        if options.skip_verify {
            tracing::warn!("server certificate verification is disabled");
            let builder = ClientConfig::builder();
            let verifier = AnyServerCertificate(Arc::clone(builder.crypto_provider()));
            let config = builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
                .with_no_client_auth();
            return Ok(TlsConfig::from(config));
        }

        if options.root_certificates.is_empty() {
            let connector =
                TlsConnector::default_rustls().map_err(|err| ConfigError::Tls(err.to_string()))?;
            return Ok(TlsConfig::from(connector));
        }

        let mut roots = RootCertStore::empty();
        for der in &options.root_certificates {
            roots
                .add(CertificateDer::from(der.clone()))
                .map_err(|err| ConfigError::Tls(err.to_string()))?;
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsConfig::from(config))
    }

    /// Trusts any certificate chain while still checking handshake signatures.
    #[derive(Debug)]
    struct AnyServerCertificate(Arc<CryptoProvider>);

    impl ServerCertVerifier for AnyServerCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

fn split_host_port(address: &str) -> Result<(String, u16), ConfigError> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Ok((address.to_owned(), DEFAULT_PORT));
    };

    let port = port
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidAddress(address.to_owned()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { DEFAULT_HOST } else { host };

    Ok((host.to_owned(), port))
}

/// A pooled `fred` client.
#[derive(Debug)]
pub struct RedisConnection {
    client: Client,
}

impl RedisConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Connection for RedisConnection {
    async fn ping(&mut self) -> Result<String, Error> {
        Ok(self.client.ping::<String>(None).await?)
    }

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.client.get::<Option<Vec<u8>>, _>(key).await?)
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        let _: () = self.client.set(key, value, None, None, false).await?;
        Ok(())
    }

    async fn set_ex(&mut self, key: &str, seconds: i64, value: &[u8]) -> Result<(), Error> {
        let _: () = self
            .client
            .set(key, value, Some(Expiration::EX(seconds)), None, false)
            .await?;
        Ok(())
    }

    async fn del(&mut self, key: &str) -> Result<i64, Error> {
        Ok(self.client.del::<i64, _>(key).await?)
    }

    async fn exists(&mut self, key: &str) -> Result<bool, Error> {
        Ok(self.client.exists::<i64, _>(key).await? > 0)
    }

    async fn ttl(&mut self, key: &str) -> Result<i64, Error> {
        Ok(self.client.ttl::<i64, _>(key).await?)
    }

    async fn close(self) -> Result<(), Error> {
        Ok(self.client.quit().await?)
    }
}
