use axum::routing::get;
use axum::{Json, Router};
use redistore::{KeyPair, SessionLayer, SessionOptions, Sessions, StoreBuilder};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;

const SESSION: &str = "test_sess";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct AppSession {
    user: Option<User>,
    ip: Option<IpAddr>,
}

fn routes() -> Router {
    Router::new()
        .route(
            "/",
            get(|sessions: Sessions| async move {
                // a forged or stale cookie still gets a fresh session
                let session = sessions
                    .get(SESSION)
                    .await
                    .unwrap_or_else(|err| err.into_session());
                let count = session.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
                session.insert("count", count);
                sessions.save_all().await.map_err(|e| e.to_string()).unwrap();
                format!("You've visited this page {count} times")
            }),
        )
        .route(
            "/insert",
            get(|sessions: Sessions| async move {
                let app_session = AppSession {
                    user: Some(User {
                        id: 34895634,
                        name: String::from("John Doe"),
                    }),
                    ip: Some(IpAddr::from(Ipv4Addr::new(192, 168, 0, 1))),
                };

                let session = sessions
                    .get(SESSION)
                    .await
                    .unwrap_or_else(|err| err.into_session());
                session
                    .insert_typed("app", &app_session)
                    .map_err(|e| e.to_string())
                    .unwrap();
                sessions.save(&session).await.map_err(|e| e.to_string()).unwrap();
            }),
        )
        .route(
            "/get",
            get(|sessions: Sessions| async move {
                let session = sessions
                    .get(SESSION)
                    .await
                    .unwrap_or_else(|err| err.into_session());
                let app: Option<AppSession> =
                    session.get_typed("app").map_err(|e| e.to_string()).unwrap();
                Json(app.unwrap_or_default())
            }),
        )
        .route(
            "/browser-session",
            get(|sessions: Sessions| async move {
                let session = sessions
                    .get(SESSION)
                    .await
                    .unwrap_or_else(|err| err.into_session());
                // cookie lives until the browser closes, Redis keeps the default TTL
                session.set_max_age(0);
                sessions.save(&session).await.map_err(|e| e.to_string()).unwrap();
            }),
        )
        .route(
            "/delete",
            get(|sessions: Sessions| async move {
                let session = sessions
                    .get(SESSION)
                    .await
                    .unwrap_or_else(|err| err.into_session());
                sessions.delete(&session).await.map_err(|e| e.to_string()).unwrap();
            }),
        )
}

#[tokio::main]
async fn main() {
    let options = SessionOptions::build()
        .http_only(true)
        .same_site(cookie::SameSite::Lax)
        .secure(true)
        .max_age(60 * 60)
        .path("/");

    let store = StoreBuilder::new(KeyPair::from_flat([
        "a-long-random-authentication-key",
        "a-long-random-encryption-key",
    ]))
    .address("tcp", "127.0.0.1:6379")
    .key_prefix("demo_")
    .session_options(options)
    .build()
    .await
    .unwrap();

    let app = routes()
        .layer(SessionLayer::new(Arc::new(store)))
        .layer(CookieManagerLayer::new());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
