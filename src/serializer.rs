//! Session payload serializers.
//!
//! A [`SessionSerializer`] turns a session's value bag into the bytes stored
//! in Redis and back. Two implementations ship with the crate:
//!
//! - [`BinarySerializer`] (default) keeps every key and value exactly,
//!   including integer keys and [`Value::Typed`] payloads. It uses
//!   [`bincode`](https://crates.io/crates/bincode), or
//!   [`rmp-serde`](https://crates.io/crates/rmp-serde) with the
//!   `messagepack` feature.
//! - [`JsonSerializer`] writes a JSON object. Keys must be strings and
//!   values come back as the closest JSON shape, so `UInt` may return as
//!   `Int`, `Bytes` as a base64 `Str` and `Typed` as a `Map`.

use std::collections::BTreeMap;
use std::fmt::Debug;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::session::{Key, Value, Values};
use crate::{Error, Session};

#[cfg(feature = "bincode")]
pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(feature = "bincode")]
pub(crate) fn decode_value<T: DeserializeOwned>(value: &[u8]) -> Result<T, Error> {
    bincode::serde::decode_from_slice(value, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(feature = "messagepack")]
pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    rmp_serde::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(feature = "messagepack")]
pub(crate) fn decode_value<T: DeserializeOwned>(value: &[u8]) -> Result<T, Error> {
    rmp_serde::from_slice(value).map_err(|e| Error::Decode(e.to_string()))
}

/// Converts a session's values to and from bytes.
pub trait SessionSerializer: Debug + Send + Sync + 'static {
    /// Encodes the session's value bag. Never mutates the session.
    fn serialize(&self, session: &Session) -> Result<Vec<u8>, Error>;

    /// Decodes `data` and merges the entries into the session's value bag.
    /// Nothing but the value bag is touched.
    fn deserialize(&self, data: &[u8], session: &Session) -> Result<(), Error>;
}

/// Exact, binary encoding of the value bag.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinarySerializer;

impl SessionSerializer for BinarySerializer {
    fn serialize(&self, session: &Session) -> Result<Vec<u8>, Error> {
        session.with_values(|values| encode_value(values))
    }

    fn deserialize(&self, data: &[u8], session: &Session) -> Result<(), Error> {
        let decoded: Values = decode_value(data)?;
        session.with_values_mut(|values| values.extend(decoded));
        Ok(())
    }
}

/// JSON encoding of the value bag. Requires string keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl SessionSerializer for JsonSerializer {
    fn serialize(&self, session: &Session) -> Result<Vec<u8>, Error> {
        let object = session.with_values(|values| {
            let mut object = JsonMap::with_capacity(values.len());
            for (key, value) in values {
                let Key::Str(key) = key else {
                    return Err(Error::Encode(format!(
                        "non-string key value, cannot serialize session to JSON: {key}"
                    )));
                };
                object.insert(key.clone(), to_json(value)?);
            }
            Ok(object)
        })?;

        serde_json::to_vec(&object).map_err(|e| Error::Encode(e.to_string()))
    }

    fn deserialize(&self, data: &[u8], session: &Session) -> Result<(), Error> {
        let object: JsonMap<String, Json> =
            serde_json::from_slice(data).map_err(|e| Error::Decode(e.to_string()))?;

        session.with_values_mut(|values| {
            for (key, value) in object {
                values.insert(Key::Str(key), from_json(value));
            }
        });
        Ok(())
    }
}

fn to_json(value: &Value) -> Result<Json, Error> {
    let json = match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::Number((*n).into()),
        Value::UInt(n) => Json::Number((*n).into()),
        Value::Float(n) => Number::from_f64(*n)
            .map(Json::Number)
            .ok_or_else(|| Error::Encode(format!("{n} cannot be represented in JSON")))?,
        Value::Str(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => Json::String(STANDARD.encode(bytes)),
        Value::List(items) => Json::Array(items.iter().map(to_json).collect::<Result<_, _>>()?),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_json(v)?)))
                .collect::<Result<_, Error>>()?,
        ),
        Value::Typed { type_name, data } => {
            let mut object = JsonMap::with_capacity(2);
            object.insert("type".to_owned(), Json::String(type_name.clone()));
            object.insert("data".to_owned(), Json::String(STANDARD.encode(data)));
            Json::Object(object)
        }
    };
    Ok(json)
}

fn from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(n) = n.as_i64() {
                Value::Int(n)
            } else if let Some(n) = n.as_u64() {
                Value::UInt(n)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Str(s),
        Json::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        Json::Object(object) => Value::Map(
            object
                .into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}
