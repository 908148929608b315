mod common;

#[cfg(test)]
mod tests {
    use super::*;
    use common::*;
    use redistore::store::{Connection, MemoryConnector};
    use redistore::tower_cookies::Cookies;
    use redistore::{
        BinarySerializer, Error, Id, JsonSerializer, KeyPair, Pool, PoolConfig, Registry,
        Session, SessionOptions, SessionSerializer, StoreBuilder, Value,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, connector) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        assert!(session.is_new());
        assert!(session.id().is_none());

        session.set_max_age(1200);
        session.insert("foo", "bar");
        store.save(&cookies, &session).await.unwrap();

        let id = session.id().expect("save assigns an id");
        assert_eq!(id.to_string().len(), redistore::ID_LEN);
        assert!(connector.contains_key(&format!("{KEY_PREFIX}{id}")));

        let cookie = cookies.get(SESSION_NAME).expect("save sets the cookie");
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::seconds(1200)));
        assert_ne!(cookie.value(), id.to_string());

        let request = next_request(&cookies, SESSION_NAME);
        let loaded = store.new_session(&request, SESSION_NAME).await.unwrap();
        assert!(!loaded.is_new());
        assert_eq!(loaded.id(), Some(id));
        assert_eq!(loaded.get("foo"), Some(Value::from("bar")));
    }

    #[tokio::test]
    async fn test_typed_values_survive_the_store() {
        let (store, _) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.insert_typed("user", &test_user()).unwrap();
        store.save(&cookies, &session).await.unwrap();

        let request = next_request(&cookies, SESSION_NAME);
        let loaded = store.new_session(&request, SESSION_NAME).await.unwrap();
        let user: Option<TestUser> = loaded.get_typed("user").unwrap();
        assert_eq!(user, Some(test_user()));
    }

    #[tokio::test]
    async fn test_id_is_stable_across_saves() {
        let (store, connector) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        store.save(&cookies, &session).await.unwrap();
        let id = session.id();

        session.insert("count", 2);
        store.save(&cookies, &session).await.unwrap();
        store.save(&cookies, &session).await.unwrap();

        assert_eq!(session.id(), id);
        assert_eq!(connector.len(), 1);
    }

    #[tokio::test]
    async fn test_payload_size_ceiling() {
        let connector = MemoryConnector::new();
        let cookies = Cookies::default();

        let session = Session::new(SESSION_NAME, SessionOptions::default());
        session.insert("data", "x".repeat(256));
        let size = BinarySerializer.serialize(&session).unwrap().len();

        let exact = builder(&connector).max_length(size).build().await.unwrap();
        exact.save(&cookies, &session).await.unwrap();

        let writes = connector.writes();
        let tight = builder(&connector).max_length(size - 1).build().await.unwrap();
        let err = tight.save(&cookies, &session).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit, .. } if limit == size - 1));
        assert_eq!(connector.writes(), writes, "no write after a rejected payload");

        let unlimited = builder(&connector).max_length(0).build().await.unwrap();
        session.insert("data", "x".repeat(64 * 1024));
        unlimited.save(&cookies, &session).await.unwrap();
    }

    #[tokio::test]
    async fn test_key_rotation() {
        let connector = MemoryConnector::new();
        let old = vec![KeyPair::signing("old-key")];
        let new = vec![KeyPair::signing("new-key")];
        let rotated = vec![KeyPair::signing("new-key"), KeyPair::signing("old-key")];

        let store_with = |keys: Vec<KeyPair>| {
            StoreBuilder::new(keys)
                .pool(Pool::new(connector.clone(), PoolConfig::default()))
                .build()
        };
        let old_store = store_with(old).await.unwrap();
        let new_store = store_with(new).await.unwrap();
        let rotated_store = store_with(rotated).await.unwrap();

        let cookies = Cookies::default();
        let session = old_store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.insert("foo", "bar");
        old_store.save(&cookies, &session).await.unwrap();

        let request = next_request(&cookies, SESSION_NAME);
        let loaded = rotated_store.new_session(&request, SESSION_NAME).await.unwrap();
        assert_eq!(loaded.get("foo"), Some(Value::from("bar")));

        let err = new_store.new_session(&request, SESSION_NAME).await.unwrap_err();
        assert!(matches!(err.source, Error::Cookie(_)));

        let cookies = Cookies::default();
        let session = new_store.new_session(&cookies, SESSION_NAME).await.unwrap();
        new_store.save(&cookies, &session).await.unwrap();
        let request = next_request(&cookies, SESSION_NAME);
        assert!(new_store.new_session(&request, SESSION_NAME).await.is_ok());
    }

    #[tokio::test]
    async fn test_encrypted_cookies() {
        let connector = MemoryConnector::new();
        let store = StoreBuilder::new(KeyPair::from_flat(["auth-key", "encryption-key"]))
            .pool(Pool::new(connector, PoolConfig::default()))
            .build()
            .await
            .unwrap();

        let cookies = Cookies::default();
        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.insert("foo", "bar");
        store.save(&cookies, &session).await.unwrap();

        let id = session.id().unwrap().to_string();
        let cookie = cookies.get(SESSION_NAME).unwrap();
        assert!(!cookie.value().contains(&id));

        let request = next_request(&cookies, SESSION_NAME);
        let loaded = store.new_session(&request, SESSION_NAME).await.unwrap();
        assert_eq!(loaded.get("foo"), Some(Value::from("bar")));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, connector) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.insert("foo", "bar");
        store.save(&cookies, &session).await.unwrap();
        assert_eq!(connector.len(), 1);

        store.delete(&cookies, &session).await.unwrap();
        store.delete(&cookies, &session).await.unwrap();

        assert!(connector.is_empty());
        assert!(session.is_empty());
        let cookie = cookies.get(SESSION_NAME).unwrap();
        assert_eq!(cookie.value(), "");
        assert!(cookie.max_age().is_some_and(|age| age.is_negative()));
    }

    #[tokio::test]
    async fn test_negative_max_age_deletes() {
        let (store, connector) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.insert("foo", "bar");
        store.save(&cookies, &session).await.unwrap();
        let key = store.key_for(&session.id().unwrap());

        session.set_max_age(-1);
        store.save(&cookies, &session).await.unwrap();

        assert!(!connector.contains_key(&key));
        assert!(session.is_empty());
        let cookie = cookies.get(SESSION_NAME).unwrap();
        assert!(cookie.max_age().is_some_and(|age| age.is_negative()));
    }

    #[tokio::test]
    async fn test_negative_max_age_without_id_sends_nothing() {
        let (store, connector) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.set_max_age(-1);
        store.save(&cookies, &session).await.unwrap();

        assert!(session.id().is_none());
        assert_eq!(connector.dialled(), 1, "only the build-time ping connects");
        assert_eq!(connector.writes(), 0);
    }

    #[tokio::test]
    async fn test_zero_max_age_uses_default_ttl() {
        let connector = MemoryConnector::new();
        let store = builder(&connector).default_max_age(300).build().await.unwrap();
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.set_max_age(0);
        session.insert("foo", "bar");
        store.save(&cookies, &session).await.unwrap();

        let key = store.key_for(&session.id().unwrap());
        assert!(connector.contains_key(&key));

        let mut conn = store.pool().acquire().await.unwrap();
        assert_eq!(conn.ttl(&key).await.unwrap(), 300);

        let cookie = cookies.get(SESSION_NAME).unwrap();
        assert_eq!(cookie.max_age(), None);
        assert_eq!(cookie.expires(), None);
    }

    #[tokio::test]
    async fn test_zero_default_max_age_stores_without_expiry() {
        let connector = MemoryConnector::new();
        let store = builder(&connector).default_max_age(0).build().await.unwrap();
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.set_max_age(0);
        store.save(&cookies, &session).await.unwrap();

        let key = store.key_for(&session.id().unwrap());
        let mut conn = store.pool().acquire().await.unwrap();
        assert_eq!(conn.ttl(&key).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_far_future_max_age_saves() {
        let (store, connector) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.set_max_age(i64::MAX / 2);
        session.insert("foo", "bar");
        store.save(&cookies, &session).await.unwrap();

        let key = store.key_for(&session.id().unwrap());
        assert!(connector.contains_key(&key));

        let cookie = cookies.get(SESSION_NAME).unwrap();
        assert_eq!(
            cookie.max_age(),
            Some(cookie::time::Duration::seconds(i64::MAX / 2))
        );
        assert!(cookie.expires().is_none());

        let request = next_request(&cookies, SESSION_NAME);
        let loaded = store.new_session(&request, SESSION_NAME).await.unwrap();
        assert_eq!(loaded.get("foo"), Some(Value::from("bar")));
    }

    #[tokio::test]
    async fn test_bad_cookie_yields_fresh_session() {
        let (store, _) = memory_store().await;
        let cookies = Cookies::default();
        cookies.add(cookie::Cookie::new(SESSION_NAME, "forged-value"));

        let err = store.new_session(&cookies, SESSION_NAME).await.unwrap_err();
        assert!(matches!(err.source, Error::Cookie(_)));

        let session = err.into_session();
        assert!(session.is_new());
        assert!(session.id().is_none());
        session.insert("foo", "bar");
        store.save(&cookies, &session).await.unwrap();
        assert!(session.id().is_some());
    }

    #[tokio::test]
    async fn test_missing_record_is_new() {
        let (store, connector) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        store.save(&cookies, &session).await.unwrap();
        let id = session.id();
        store.delete_record(&session).await.unwrap();
        assert!(connector.is_empty());

        let request = next_request(&cookies, SESSION_NAME);
        let loaded = store.new_session(&request, SESSION_NAME).await.unwrap();
        assert!(loaded.is_new());
        assert_eq!(loaded.id(), id);
    }

    #[tokio::test]
    async fn test_backend_failure_yields_fresh_session() {
        let (store, connector) = memory_store().await;
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        store.save(&cookies, &session).await.unwrap();

        connector.break_connections();
        connector.refuse_connections(true);

        let request = next_request(&cookies, SESSION_NAME);
        let err = store.new_session(&request, SESSION_NAME).await.unwrap_err();
        assert!(matches!(err.source, Error::Backend(_)));
        assert!(err.session.is_new());
    }

    #[tokio::test]
    async fn test_registry_shares_sessions() {
        let (store, _) = memory_store().await;
        let store = Arc::new(store);
        let registry = Registry::new(Arc::clone(&store));
        let cookies = Cookies::default();

        let first = store.get(&registry, &cookies, SESSION_NAME).await.unwrap();
        first.insert("foo", "bar");
        let second = store.get(&registry, &cookies, SESSION_NAME).await.unwrap();
        assert_eq!(second.get("foo"), Some(Value::from("bar")));

        let other = store.get(&registry, &cookies, "other").await.unwrap();
        assert!(other.is_empty());
        assert_eq!(registry.len(), 2);

        registry.save_all(&cookies).await.unwrap();
        assert!(first.id().is_some());
        assert!(other.id().is_some());
        assert!(cookies.get(SESSION_NAME).is_some());
        assert!(cookies.get("other").is_some());
    }

    #[tokio::test]
    async fn test_registry_keeps_sessions_from_failed_loads() {
        let (store, _) = memory_store().await;
        let store = Arc::new(store);
        let registry = Registry::new(Arc::clone(&store));
        let cookies = Cookies::default();
        cookies.add(cookie::Cookie::new(SESSION_NAME, "garbage"));

        let err = store.get(&registry, &cookies, SESSION_NAME).await.unwrap_err();
        err.session.insert("foo", "bar");

        let again = store.get(&registry, &cookies, SESSION_NAME).await.unwrap();
        assert_eq!(again.get("foo"), Some(Value::from("bar")));
    }

    #[tokio::test]
    async fn test_json_serializer_store() {
        let connector = MemoryConnector::new();
        let store = builder(&connector)
            .serializer(JsonSerializer)
            .build()
            .await
            .unwrap();
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        session.insert("foo", "bar");
        session.insert("count", 3);
        store.save(&cookies, &session).await.unwrap();

        let request = next_request(&cookies, SESSION_NAME);
        let loaded = store.new_session(&request, SESSION_NAME).await.unwrap();
        assert_eq!(loaded.get("foo"), Some(Value::from("bar")));
        assert_eq!(loaded.get("count").and_then(|v| v.as_i64()), Some(3));

        loaded.insert(7, "int key");
        assert!(matches!(
            store.save(&request, &loaded).await,
            Err(Error::Encode(_))
        ));
    }

    #[tokio::test]
    async fn test_runtime_setters() {
        let (mut store, _) = memory_store().await;
        store.set_key_prefix("other_");
        store.set_max_length(16);
        store.set_max_age(60);
        store.set_serializer(JsonSerializer);

        let cookies = Cookies::default();
        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        assert_eq!(session.max_age(), 60);
        session.insert("data", "x".repeat(64));
        assert!(matches!(
            store.save(&cookies, &session).await,
            Err(Error::PayloadTooLarge { .. })
        ));

        assert!(store.key_for(&Id::generate()).starts_with("other_"));
    }

    #[tokio::test]
    async fn test_old_cookies_are_rejected() {
        let (mut store, connector) = memory_store().await;
        store.set_max_age(1);
        let cookies = Cookies::default();

        let session = store.new_session(&cookies, SESSION_NAME).await.unwrap();
        // the record outlives the cookie
        session.set_max_age(3600);
        session.insert("foo", "bar");
        store.save(&cookies, &session).await.unwrap();
        let key = store.key_for(&session.id().unwrap());

        let request = next_request(&cookies, SESSION_NAME);
        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

        let err = store.new_session(&request, SESSION_NAME).await.unwrap_err();
        assert!(matches!(err.source, Error::Cookie(_)));
        let fresh = err.into_session();
        assert!(fresh.id().is_none());
        assert!(fresh.is_empty());
        assert!(connector.contains_key(&key));
    }

    #[tokio::test]
    async fn test_ping_and_close() {
        let (store, _) = memory_store().await;
        assert!(store.ping().await.unwrap());

        store.close().await;
        assert!(matches!(store.ping().await, Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn test_sessions_are_independent_by_name() {
        let (store, _) = memory_store().await;
        let cookies = Cookies::default();

        let a = store.new_session(&cookies, "a").await.unwrap();
        let b = store.new_session(&cookies, "b").await.unwrap();
        a.insert("foo", 1);
        store.save(&cookies, &a).await.unwrap();
        store.save(&cookies, &b).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert!(b.get("foo").is_none());
    }
}
