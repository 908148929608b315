//! Session middleware for tower applications.
//!
//! [`SessionLayer`] gives every request its own [`Registry`], the set of
//! sessions obtained while handling it.

use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Request;
use parking_lot::Mutex;
use tower::{Layer, Service};
use tower_cookies::Cookies;

use crate::store::{Connector, DefaultConnector, Store};
use crate::{Error, Session};

/// The sessions of one request, by name.
///
/// Clones share the same sessions.
pub struct Registry<C: Connector = DefaultConnector> {
    store: Arc<Store<C>>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl<C: Connector> Clone for Registry<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &*self.sessions.lock())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Registry<C> {
    pub fn new(store: Arc<Store<C>>) -> Self {
        Self {
            store,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<Store<C>> {
        &self.store
    }

    pub fn get(&self, name: &str) -> Option<Session> {
        self.sessions.lock().get(name).cloned()
    }

    /// Registers `session` under its name unless one is already there, and
    /// returns the registered session.
    pub fn register(&self, session: Session) -> Session {
        self.sessions
            .lock()
            .entry(session.name().to_owned())
            .or_insert(session)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Saves every registered session, stopping at the first failure.
    #[tracing::instrument(name = "saving all sessions", skip_all)]
    pub async fn save_all(&self, cookies: &Cookies) -> Result<(), Error> {
        let sessions: Vec<Session> = self.sessions.lock().values().cloned().collect();
        for session in &sessions {
            self.store.save(cookies, session).await?;
        }
        Ok(())
    }
}

/// A Tower Middleware to use sessions.
#[derive(Debug)]
pub struct SessionService<S, C: Connector = DefaultConnector> {
    inner: S,
    store: Arc<Store<C>>,
}

impl<S: Clone, C: Connector> Clone for SessionService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<ReqBody, S, C> Service<Request<ReqBody>> for SessionService<S, C>
where
    S: Service<Request<ReqBody>>,
    C: Connector,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        req.extensions_mut()
            .insert(Registry::new(Arc::clone(&self.store)));
        self.inner.call(req)
    }
}

/// Layer to apply [`SessionService`] middleware.
///
/// Sessions read and write cookies through `tower-cookies`, so this layer
/// must sit inside a [`CookieManagerLayer`](tower_cookies::CookieManagerLayer).
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use redistore::{KeyPair, SessionLayer, StoreBuilder};
/// use tower::ServiceBuilder;
/// use tower_cookies::CookieManagerLayer;
///
/// # async fn run() -> Result<(), redistore::Error> {
/// let store = StoreBuilder::new(vec![KeyPair::signing("secret-key")])
///     .address("tcp", "localhost:6379")
///     .build()
///     .await?;
///
/// let layers = ServiceBuilder::new()
///     .layer(CookieManagerLayer::new())
///     .layer(SessionLayer::new(Arc::new(store)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SessionLayer<C: Connector = DefaultConnector> {
    store: Arc<Store<C>>,
}

impl<C: Connector> Clone for SessionLayer<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<C: Connector> SessionLayer<C> {
    /// Create a new session manager layer.
    pub fn new(store: Arc<Store<C>>) -> Self {
        Self { store }
    }
}

impl<S, C: Connector> Layer<S> for SessionLayer<C> {
    type Service = SessionService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            store: Arc::clone(&self.store),
        }
    }
}
