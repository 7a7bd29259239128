//! Commands accepted inside an atomic batch and the replies they produce.

use std::time::Duration;

use crate::error::StoreError;

/// A single store command. Batches of these run all-or-nothing via
/// [`KvStore::exec`](crate::KvStore::exec).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read a value.
    Get { key: String },
    /// Replace a value and return the previous one. Clears any TTL.
    GetSet { key: String, value: String },
    /// Set a key's TTL. A zero TTL deletes the key.
    Expire { key: String, ttl: Duration },
    /// Increment an integer value, treating an absent key as `0`.
    Incr { key: String },
    /// `1` if the key exists, `0` otherwise.
    Exists { key: String },
    /// Delete a key; replies with the number of keys removed.
    Del { key: String },
}

impl Command {
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    pub fn getset(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::GetSet {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn expire(key: impl Into<String>, ttl: Duration) -> Self {
        Self::Expire {
            key: key.into(),
            ttl,
        }
    }

    pub fn incr(key: impl Into<String>) -> Self {
        Self::Incr { key: key.into() }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists { key: key.into() }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::Del { key: key.into() }
    }

    /// The key this command touches.
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key }
            | Self::GetSet { key, .. }
            | Self::Expire { key, .. }
            | Self::Incr { key }
            | Self::Exists { key }
            | Self::Del { key } => key,
        }
    }
}

/// Reply to one [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Value(String),
    Integer(i64),
}

impl Reply {
    /// Interpret a `GET`/`GETSET` reply.
    pub fn into_value(self) -> Result<Option<String>, StoreError> {
        match self {
            Self::Nil => Ok(None),
            Self::Value(v) => Ok(Some(v)),
            other => Err(StoreError::UnexpectedReply(format!(
                "expected a value or nil, got {other:?}"
            ))),
        }
    }

    /// Interpret an `INCR`/`EXISTS`/`EXPIRE`/`DEL` reply.
    pub fn into_integer(self) -> Result<i64, StoreError> {
        match self {
            Self::Integer(n) => Ok(n),
            other => Err(StoreError::UnexpectedReply(format!(
                "expected an integer, got {other:?}"
            ))),
        }
    }
}
