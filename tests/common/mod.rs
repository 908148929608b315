#![allow(dead_code)]

use redistore::store::MemoryConnector;
use redistore::tower_cookies::Cookies;
use redistore::{KeyPair, Pool, PoolConfig, Store, StoreBuilder};
use serde::{Deserialize, Serialize};

pub const SESSION_NAME: &str = "test_sess";
pub const KEY_PREFIX: &str = "sess_";

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TestUser {
    pub id: i64,
    pub name: String,
}

pub fn test_user() -> TestUser {
    TestUser {
        id: 1,
        name: "Test User".to_string(),
    }
}

pub fn key_pairs() -> Vec<KeyPair> {
    vec![KeyPair::signing("secret")]
}

pub fn builder(connector: &MemoryConnector) -> StoreBuilder<MemoryConnector> {
    StoreBuilder::new(key_pairs())
        .pool(Pool::new(connector.clone(), PoolConfig::default()))
        .key_prefix(KEY_PREFIX)
}

pub async fn memory_store() -> (Store<MemoryConnector>, MemoryConnector) {
    let connector = MemoryConnector::new();
    let store = builder(&connector).build().await.unwrap();
    (store, connector)
}

/// Builds the jar of a follow-up request carrying the cookie `name` set on
/// `response`.
pub fn next_request(response: &Cookies, name: &str) -> Cookies {
    let cookies = Cookies::default();
    if let Some(cookie) = response.get(name) {
        cookies.add(cookie.into_owned());
    }
    cookies
}
