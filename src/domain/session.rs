//! Session identifiers.
//!
//! A session id names a workspace directory, so it must never contain path
//! separators, dots, or anything else a filesystem could interpret. Only
//! `[_a-zA-Z0-9]{1,32}` is accepted.

use std::fmt;

use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;

use super::error::DomainError;

pub const MAX_SESSION_ID_LEN: usize = 32;
pub const GENERATED_SESSION_ID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        if value.is_empty()
            || value.len() > MAX_SESSION_ID_LEN
            || !value.bytes().all(is_session_byte)
        {
            return Err(DomainError::invalid_identifier(value));
        }
        Ok(Self(value.to_string()))
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_SESSION_ID_LEN)
            .map(char::from)
            .collect();
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_session_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
