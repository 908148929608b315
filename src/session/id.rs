use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

const ID_BYTES: usize = 32;

/// Length of the textual identifier: 32 random bytes, base32, unpadded.
pub const ID_LEN: usize = 52;

/// A session identifier.
///
/// Generated from 32 bytes of OS-seeded randomness and rendered as unpadded
/// base32, which keeps it safe inside cookie values and Redis keys.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, Eq, Hash, PartialEq)]
pub struct Id([u8; ID_BYTES]);

impl Id {
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::generate()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE32_NOPAD.encode(&self.0))
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("session id must be {ID_LEN} characters, got {0}")]
    Length(usize),

    #[error("session id is not valid base32: {0}")]
    Encoding(String),
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_LEN {
            return Err(ParseIdError::Length(s.len()));
        }

        let decoded = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|err| ParseIdError::Encoding(err.to_string()))?;

        let bytes: [u8; ID_BYTES] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| ParseIdError::Length(v.len()))?;

        Ok(Self(bytes))
    }
}
