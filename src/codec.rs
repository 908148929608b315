//! Authentication and encryption of the session cookie value.
//!
//! The session identifier travels to the client inside a cookie protected by
//! an ordered list of [`KeyPair`]s. The first pair protects new cookies; every
//! pair is tried, in order, when reading one back. Rotating keys means
//! prepending a new pair and dropping the old one once outstanding cookies
//! have been refreshed.
//!
//! Every protected value carries the time it was issued. Values older than
//! the codec max-age are rejected even when their signature checks out.

use cookie::time::OffsetDateTime;
use cookie::{Cookie, CookieJar, Key};
use sha2::{Digest, Sha256};

use crate::Error;
use crate::session::DEFAULT_COOKIE_MAX_AGE;

/// An authentication key and an optional encryption key.
///
/// Key material of any length is accepted and hashed to the size the
/// underlying HMAC-SHA256 and AES-256-GCM primitives need. A pair without an
/// encryption key signs the cookie; a pair with one encrypts and
/// authenticates it.
#[derive(Clone)]
pub struct KeyPair {
    auth: Vec<u8>,
    encryption: Option<Vec<u8>>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("auth", &"..")
            .field("encrypted", &self.encryption.is_some())
            .finish()
    }
}

impl KeyPair {
    pub fn new(auth: impl Into<Vec<u8>>, encryption: Option<Vec<u8>>) -> Self {
        Self {
            auth: auth.into(),
            encryption: encryption.filter(|key| !key.is_empty()),
        }
    }

    /// A pair that signs without encrypting.
    pub fn signing(auth: impl Into<Vec<u8>>) -> Self {
        Self::new(auth, None)
    }

    /// Groups a flat key list into `(auth, encryption)` pairs.
    ///
    /// An odd trailing key becomes a signing-only pair, and an empty
    /// encryption key disables encryption for its pair.
    ///
    /// ```rust
    /// use redistore::KeyPair;
    ///
    /// let pairs = KeyPair::from_flat(["new-auth", "new-enc", "old-auth"]);
    /// assert_eq!(pairs.len(), 2);
    /// assert!(pairs[0].is_encrypted());
    /// assert!(!pairs[1].is_encrypted());
    /// ```
    pub fn from_flat<I, K>(keys: I) -> Vec<KeyPair>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let keys: Vec<Vec<u8>> = keys.into_iter().map(|k| k.as_ref().to_vec()).collect();
        keys.chunks(2)
            .map(|chunk| KeyPair::new(chunk[0].clone(), chunk.get(1).cloned()))
            .collect()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub(crate) fn has_auth_key(&self) -> bool {
        !self.auth.is_empty()
    }

    fn key(&self) -> Key {
        let mut material = [0u8; 64];
        material[..32].copy_from_slice(&Sha256::digest(&self.auth));
        let encryption = self.encryption.as_deref().unwrap_or(&self.auth);
        material[32..].copy_from_slice(&Sha256::digest(encryption));
        Key::from(&material)
    }
}

/// The ordered codecs built from a store's key pairs.
#[derive(Clone)]
pub struct CodecSet {
    codecs: Vec<Codec>,
    // seconds; 0 or less accepts values of any age
    max_age: i64,
}

#[derive(Clone)]
struct Codec {
    key: Key,
    encrypted: bool,
}

impl std::fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecSet")
            .field("codecs", &self.codecs.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl CodecSet {
    pub fn new(pairs: &[KeyPair]) -> Self {
        let codecs = pairs
            .iter()
            .map(|pair| Codec {
                key: pair.key(),
                encrypted: pair.is_encrypted(),
            })
            .collect();
        Self {
            codecs,
            max_age: DEFAULT_COOKIE_MAX_AGE,
        }
    }

    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    /// Sets how long, in seconds, a protected value stays acceptable.
    /// `0` or less disables the check.
    pub fn set_max_age(&mut self, seconds: i64) {
        self.max_age = seconds;
    }

    /// Protects `value` for the cookie `name` with the first key pair.
    pub fn encode(&self, name: &str, value: &str) -> Result<String, Error> {
        self.encode_at(name, value, now())
    }

    /// Recovers the value of cookie `name`, trying every key pair in order.
    pub fn decode(&self, name: &str, protected: &str) -> Result<String, Error> {
        self.decode_at(name, protected, now())
    }

    fn encode_at(&self, name: &str, value: &str, issued_at: i64) -> Result<String, Error> {
        let codec = self
            .codecs
            .first()
            .ok_or_else(|| Error::Encode("no key pairs configured".to_owned()))?;

        let mut jar = CookieJar::new();
        let cookie = Cookie::new(name.to_owned(), format!("{issued_at}|{value}"));
        if codec.encrypted {
            jar.private_mut(&codec.key).add(cookie);
        } else {
            jar.signed_mut(&codec.key).add(cookie);
        }

        jar.get(name)
            .map(|cookie| cookie.value().to_owned())
            .ok_or_else(|| Error::Encode(format!("failed to protect cookie {name}")))
    }

    fn decode_at(&self, name: &str, protected: &str, now: i64) -> Result<String, Error> {
        let jar = CookieJar::new();
        for codec in &self.codecs {
            let cookie = Cookie::new(name.to_owned(), protected.to_owned());
            let verified = if codec.encrypted {
                jar.private(&codec.key).decrypt(cookie)
            } else {
                jar.signed(&codec.key).verify(cookie)
            };

            if let Some(cookie) = verified {
                return self.check_age(name, cookie.value(), now);
            }
        }

        Err(Error::Cookie(format!(
            "{name} could not be verified with any of the {} configured keys",
            self.codecs.len()
        )))
    }

    fn check_age(&self, name: &str, payload: &str, now: i64) -> Result<String, Error> {
        let (issued_at, value) = payload
            .split_once('|')
            .and_then(|(issued_at, value)| Some((issued_at.parse::<i64>().ok()?, value)))
            .ok_or_else(|| Error::Cookie(format!("{name} has a malformed value")))?;

        if self.max_age > 0 && issued_at < now.saturating_sub(self.max_age) {
            return Err(Error::Cookie(format!("{name} has an expired timestamp")));
        }

        Ok(value.to_owned())
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[KeyPair]) -> CodecSet {
        CodecSet::new(pairs)
    }

    #[test]
    fn signed_round_trip() {
        let codecs = set(&[KeyPair::signing("secret")]);
        let encoded = codecs.encode("sess", "identifier").unwrap();

        assert_ne!(encoded, "identifier");
        assert_eq!(codecs.decode("sess", &encoded).unwrap(), "identifier");
    }

    #[test]
    fn encrypted_round_trip_hides_the_value() {
        let codecs = set(&KeyPair::from_flat(["auth-key", "encryption-key"]));
        let encoded = codecs.encode("sess", "identifier").unwrap();

        assert!(!encoded.contains("identifier"));
        assert_eq!(codecs.decode("sess", &encoded).unwrap(), "identifier");
    }

    #[test]
    fn tampered_values_are_rejected() {
        let codecs = set(&[KeyPair::signing("secret")]);
        let mut encoded = codecs.encode("sess", "identifier").unwrap();
        encoded.push('x');

        assert!(matches!(
            codecs.decode("sess", &encoded),
            Err(Error::Cookie(_))
        ));
        assert!(codecs.decode("sess", "garbage").is_err());
    }

    #[test]
    fn values_are_bound_to_the_cookie_name() {
        let codecs = set(&KeyPair::from_flat(["auth-key", "encryption-key"]));
        let encoded = codecs.encode("sess", "identifier").unwrap();

        assert!(codecs.decode("other", &encoded).is_err());
    }

    #[test]
    fn rotated_keys_still_decode_old_cookies() {
        let old = KeyPair::from_flat(["old-auth", "old-enc"]).remove(0);
        let new = KeyPair::from_flat(["new-auth", "new-enc"]).remove(0);

        let before_rotation = set(&[old.clone()]).encode("sess", "id-1").unwrap();
        let rotated = set(&[new.clone(), old]);
        assert_eq!(rotated.decode("sess", &before_rotation).unwrap(), "id-1");

        let after_rotation = rotated.encode("sess", "id-2").unwrap();
        assert_eq!(set(&[new]).decode("sess", &after_rotation).unwrap(), "id-2");
    }

    #[test]
    fn unknown_keys_fail() {
        let encoded = set(&[KeyPair::signing("one")]).encode("sess", "v").unwrap();
        assert!(set(&[KeyPair::signing("two")]).decode("sess", &encoded).is_err());
    }

    #[test]
    fn stale_values_are_rejected() {
        let mut codecs = set(&[KeyPair::signing("secret")]);
        codecs.set_max_age(60);
        let issued = 1_700_000_000;
        let encoded = codecs.encode_at("sess", "identifier", issued).unwrap();

        assert_eq!(
            codecs.decode_at("sess", &encoded, issued + 60).unwrap(),
            "identifier"
        );
        let err = codecs.decode_at("sess", &encoded, issued + 61).unwrap_err();
        assert!(matches!(err, Error::Cookie(_)));
        assert!(err.to_string().contains("expired timestamp"));
    }

    #[test]
    fn encrypted_values_expire_too() {
        let codecs = set(&KeyPair::from_flat(["auth-key", "encryption-key"]));
        let issued = 1_700_000_000;
        let encoded = codecs.encode_at("sess", "identifier", issued).unwrap();

        let past_default = issued + DEFAULT_COOKIE_MAX_AGE + 1;
        assert!(codecs.decode_at("sess", &encoded, past_default).is_err());
    }

    #[test]
    fn zero_max_age_accepts_any_age() {
        let mut codecs = set(&[KeyPair::signing("secret")]);
        codecs.set_max_age(0);
        let encoded = codecs.encode_at("sess", "identifier", 0).unwrap();

        assert_eq!(
            codecs.decode_at("sess", &encoded, i64::MAX).unwrap(),
            "identifier"
        );
    }

    #[test]
    fn values_without_a_timestamp_are_rejected() {
        let key = KeyPair::signing("secret").key();
        let mut jar = CookieJar::new();
        jar.signed_mut(&key)
            .add(Cookie::new("sess", "identifier"));
        let forged = jar.get("sess").unwrap().value().to_owned();

        let codecs = set(&[KeyPair::signing("secret")]);
        assert!(matches!(
            codecs.decode("sess", &forged),
            Err(Error::Cookie(_))
        ));
    }

    #[test]
    fn from_flat_pairs_keys() {
        let pairs = KeyPair::from_flat(["a", "", "b", "c", "d"]);
        assert_eq!(pairs.len(), 3);
        assert!(!pairs[0].is_encrypted());
        assert!(pairs[1].is_encrypted());
        assert!(!pairs[2].is_encrypted());
    }
}
