use std::sync::Arc;

use axum_core::extract::FromRequestParts;
use http::{StatusCode, request::Parts};
use tower_cookies::Cookies;

use crate::error::LoadError;
use crate::service::Registry;
use crate::store::{Connector, DefaultConnector, Store};
use crate::{Error, Session};

/// Axum extractor for the sessions of the current request.
///
/// Requires [`SessionLayer`](crate::SessionLayer) inside a
/// `tower_cookies::CookieManagerLayer`.
///
/// ```rust,no_run
/// use redistore::Sessions;
///
/// async fn handler(sessions: Sessions) -> String {
///     let session = match sessions.get("session").await {
///         Ok(session) => session,
///         Err(err) => err.into_session(),
///     };
///     let visits = session.get("visits").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
///     session.insert("visits", visits);
///     sessions.save(&session).await.unwrap();
///     format!("visit number {visits}")
/// }
/// ```
pub struct Sessions<C: Connector = DefaultConnector> {
    registry: Registry<C>,
    cookies: Cookies,
}

impl<C: Connector> Clone for Sessions<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            cookies: self.cookies.clone(),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Sessions<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sessions")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Sessions<C> {
    pub fn new(registry: Registry<C>, cookies: Cookies) -> Self {
        Self { registry, cookies }
    }

    pub fn store(&self) -> &Arc<Store<C>> {
        self.registry.store()
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    /// See [`Store::get`].
    pub async fn get(&self, name: &str) -> Result<Session, LoadError> {
        self.store().get(&self.registry, &self.cookies, name).await
    }

    /// See [`Store::new_session`]. The session is not registered.
    pub async fn new_session(&self, name: &str) -> Result<Session, LoadError> {
        self.store().new_session(&self.cookies, name).await
    }

    pub async fn save(&self, session: &Session) -> Result<(), Error> {
        self.store().save(&self.cookies, session).await
    }

    /// Saves every session obtained with [`get`](Self::get).
    pub async fn save_all(&self) -> Result<(), Error> {
        self.registry.save_all(&self.cookies).await
    }

    pub async fn delete(&self, session: &Session) -> Result<(), Error> {
        self.store().delete(&self.cookies, session).await
    }
}

impl<S, C> FromRequestParts<S> for Sessions<C>
where
    S: Sync + Send,
    C: Connector,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let registry = parts.extensions.get::<Registry<C>>().cloned().ok_or_else(|| {
            tracing::error!("session layer not found in the request extensions");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "session layer not found in the request extensions",
            )
        })?;

        let cookies = parts.extensions.get::<Cookies>().cloned().ok_or_else(|| {
            tracing::error!("cookies not found in the request extensions");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "cookies not found in the request extensions",
            )
        })?;

        Ok(Self { registry, cookies })
    }
}
