//! Per-request session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};

use crate::Error;
use crate::serializer::{decode_value, encode_value};

mod id;
mod options;
mod value;

pub use id::{ID_LEN, Id, ParseIdError};
pub use options::{DEFAULT_COOKIE_MAX_AGE, SessionOptions};
pub use value::{Key, Value, Values};

/// A session obtained from a [`Store`](crate::Store).
///
/// `Session` is a cheap handle: clones share the same state, so a session
/// fetched twice through a [`Registry`](crate::Registry) during one request
/// is the same session.
///
/// The identifier is written at most once. It is either decoded from the
/// request cookie or assigned on the first save, and never changes
/// afterwards.
#[derive(Clone, Debug)]
pub struct Session {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    id: OnceLock<Id>,
    values: RwLock<Values>,
    options: RwLock<SessionOptions>,
    // set until a stored record is loaded for this request
    is_new: AtomicBool,
}

impl Session {
    /// Creates a fresh, unsaved session.
    pub fn new(name: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                id: OnceLock::new(),
                values: RwLock::new(Values::new()),
                options: RwLock::new(options),
                is_new: AtomicBool::new(true),
            }),
        }
    }

    /// The cookie name this session is stored under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the session ID, if one has been assigned.
    pub fn id(&self) -> Option<Id> {
        self.inner.id.get().copied()
    }

    /// `true` unless a stored record was loaded for this request.
    pub fn is_new(&self) -> bool {
        self.inner.is_new.load(Ordering::Relaxed)
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.inner.values.read().get(&key.into()).cloned()
    }

    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.inner.values.read().contains_key(&key.into())
    }

    /// Sets `key` to `value`, returning the previous value.
    pub fn insert(&self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
        self.inner.values.write().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: impl Into<Key>) -> Option<Value> {
        self.inner.values.write().remove(&key.into())
    }

    pub fn clear(&self) {
        self.inner.values.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values.read().is_empty()
    }

    /// A snapshot of the value bag.
    pub fn values(&self) -> Values {
        self.inner.values.read().clone()
    }

    /// Runs `f` with shared access to the value bag.
    pub fn with_values<R>(&self, f: impl FnOnce(&Values) -> R) -> R {
        f(&self.inner.values.read())
    }

    /// Runs `f` with exclusive access to the value bag.
    pub fn with_values_mut<R>(&self, f: impl FnOnce(&mut Values) -> R) -> R {
        f(&mut self.inner.values.write())
    }

    /// Stores any `serde` type under `key`.
    ///
    /// The value keeps its exact shape through the binary serializer. The
    /// JSON serializer stores it as an opaque `{"type", "data"}` map.
    ///
    /// # Example
    ///
    /// ```rust
    /// use redistore::{Session, SessionOptions};
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Debug, PartialEq, Serialize, Deserialize)]
    /// struct User {
    ///     id: i64,
    ///     name: String,
    /// }
    ///
    /// let session = Session::new("sess", SessionOptions::default());
    /// let user = User { id: 7, name: "Ada".into() };
    /// session.insert_typed("user", &user).unwrap();
    ///
    /// let loaded: Option<User> = session.get_typed("user").unwrap();
    /// assert_eq!(loaded, Some(user));
    /// ```
    pub fn insert_typed<T>(&self, key: impl Into<Key>, value: &T) -> Result<(), Error>
    where
        T: Serialize,
    {
        let data = encode_value(value)?;
        let typed = Value::Typed {
            type_name: std::any::type_name::<T>().to_owned(),
            data,
        };
        self.insert(key, typed);
        Ok(())
    }

    /// Reads a value stored with [`Session::insert_typed`].
    ///
    /// Returns `Ok(None)` when the key is absent and an error when the key
    /// holds something other than a `T`.
    pub fn get_typed<T>(&self, key: impl Into<Key>) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        let key = key.into();
        let values = self.inner.values.read();
        match values.get(&key) {
            None => Ok(None),
            Some(Value::Typed { type_name, data }) => {
                let expected = std::any::type_name::<T>();
                if type_name != expected {
                    return Err(Error::Decode(format!(
                        "value at {key} is a {type_name}, not a {expected}"
                    )));
                }
                decode_value(data).map(Some)
            }
            Some(_) => Err(Error::Decode(format!("value at {key} is not a typed value"))),
        }
    }

    /// A copy of this session's cookie directives.
    pub fn options(&self) -> SessionOptions {
        self.inner.options.read().clone()
    }

    pub fn max_age(&self) -> i64 {
        self.inner.options.read().max_age
    }

    /// Sets the max-age used by the next save. A negative value deletes the
    /// session on save.
    pub fn set_max_age(&self, seconds: i64) {
        self.inner.options.write().max_age = seconds;
    }

    pub fn update_options(&self, f: impl FnOnce(&mut SessionOptions)) {
        f(&mut self.inner.options.write());
    }

    /// Returns the identifier, assigning a fresh one if none is set.
    pub(crate) fn id_or_gen(&self) -> Id {
        *self.inner.id.get_or_init(Id::generate)
    }

    /// Assigns the identifier decoded from the request cookie. Has no effect
    /// once an identifier is set.
    pub(crate) fn assign_id(&self, id: Id) -> bool {
        self.inner.id.set(id).is_ok()
    }

    pub(crate) fn set_is_new(&self, is_new: bool) {
        self.inner.is_new.store(is_new, Ordering::Relaxed);
    }

    /// `true` when both handles share the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
