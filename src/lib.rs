//! # Redistore: Redis-backed cookie sessions for tower
//!
//! `redistore` keeps session values in Redis and only a signed (optionally
//! encrypted) session identifier in the browser cookie. Sessions are loaded
//! by name, edited in memory and written back explicitly with `save`.
//!
//! # Quick Start
//!
//! Here's a basic example with [Axum](https://docs.rs/axum/latest/axum/).
//! This requires the `axum` and `redis-store` features (both enabled by default).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{Router, routing::get};
//! use redistore::{KeyPair, SessionLayer, Sessions, StoreBuilder};
//! use tower_cookies::CookieManagerLayer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = StoreBuilder::new(KeyPair::from_flat(["authentication-key", "encryption-key-32-bytes-long-xx"]))
//!         .address("tcp", "localhost:6379")
//!         .key_prefix("myapp_")
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let app = Router::new()
//!         .route("/", get(handler))
//!         .layer(SessionLayer::new(Arc::new(store)))
//!         .layer(CookieManagerLayer::new()); // CookieManagerLayer must be after
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//!
//! async fn handler(sessions: Sessions) -> String {
//!     // A broken or forged cookie still yields a fresh session.
//!     let session = sessions.get("session").await.unwrap_or_else(|err| err.into_session());
//!     let count = session.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
//!     session.insert("count", count);
//!     sessions.save(&session).await.unwrap();
//!     format!("You've visited this page {count} times")
//! }
//! ```
//!
//! # Session Management
//!
//! ```rust,no_run
//! use redistore::Sessions;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct User { id: i32 }
//!
//! async fn handler(sessions: Sessions) {
//! let session = sessions.get("session").await.unwrap();
//!
//! // Plain values
//! session.insert("theme", "dark");
//! let theme = session.get("theme");
//!
//! // Any serde type
//! session.insert_typed("user", &User { id: 1 }).unwrap();
//! let user: Option<User> = session.get_typed("user").unwrap();
//!
//! // Expire the cookie with the browser session; Redis keeps the default TTL
//! session.set_max_age(0);
//!
//! // Write every session obtained during this request
//! sessions.save_all().await.unwrap();
//!
//! // Remove the session from Redis and expire its cookie
//! sessions.delete(&session).await.unwrap();
//! # }
//! ```
//!
//! # Keys
//!
//! Cookies are protected with [`KeyPair`]s. The first pair encodes; every
//! pair is tried when decoding, so keys can be rotated by putting the new
//! pair first. A pair with an encryption key also encrypts the cookie.
//!
//! # Serialization
//!
//! Session values are stored with the [`BinarySerializer`] by default, or
//! as JSON with the [`JsonSerializer`]. The binary format is one of:
//!
//! - [`bincode`](https://crates.io/crates/bincode) (default) - Fast, compact binary serialization.
//! - [`rmp-serde`](https://crates.io/crates/rmp-serde) (MessagePack) - Cross-language compatible serialization.
//!
//! ```toml
//! [dependencies]
//! redistore = { version = "0.1", default-features = false, features = ["axum", "redis-store", "messagepack"] }
//! ```
//!
//! # Important Notes
//!
//! ## Middleware Ordering
//! The `SessionLayer` must be applied **before** the `CookieManagerLayer`, so
//! that it runs inside it.
//!
//! ## Best Practices
//!
//! - Enable HTTPS in production and set `secure` in the session options.
//! - Use appropriate `SameSite` cookie settings (e.g., `Strict` or `Lax`).
//! - Use an encryption key when session identifiers should not be readable.

pub use cookie;

#[cfg(feature = "redis-store")]
pub use fred;

pub use tower_cookies;

mod codec;
pub use codec::KeyPair;

mod config;
pub use config::*;

mod error;
pub use error::*;

#[cfg(feature = "axum")]
mod extract;
#[cfg(feature = "axum")]
pub use extract::Sessions;

mod pool;
pub use pool::*;

mod serializer;
pub use serializer::{BinarySerializer, JsonSerializer, SessionSerializer};

mod service;
pub use service::*;

mod session;
pub use session::*;

pub mod store;
#[cfg(feature = "redis-store")]
pub use store::RedisConnector;
pub use store::{MemoryConnector, Store, TlsOptions};
