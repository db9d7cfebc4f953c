use super::{Link, LinkStatus};
use crate::error::{StoreError, StoreResult};
use crate::resp::RespValue;
use std::fmt;
use std::sync::Arc;

/// TTL state of a key, mirroring the store's `TTL` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key is missing or already expired (-2)
    Missing,
    /// Key exists without expiration (-1)
    NoExpiry,
    /// Key expires after this many seconds
    ExpiresIn(u64),
}

impl KeyTtl {
    /// Remaining seconds; `None` for both `Missing` and `NoExpiry`
    pub fn seconds(self) -> Option<u64> {
        match self {
            KeyTtl::ExpiresIn(secs) => Some(secs),
            KeyTtl::Missing | KeyTtl::NoExpiry => None,
        }
    }
}

/// Shared reference to the manager's current link.
///
/// Cloning is cheap; every clone talks over the same connection. Each method
/// issues exactly one command.
#[derive(Clone)]
pub struct Handle {
    link: Arc<dyn Link>,
    generation: u64,
}

impl Handle {
    pub(crate) fn new(link: Arc<dyn Link>, generation: u64) -> Self {
        Handle { link, generation }
    }

    /// Incremented by the manager on every (re)initialization
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status()
    }

    pub fn is_connected(&self) -> bool {
        self.link.status() == LinkStatus::Ready
    }

    /// Whether both handles share one underlying link
    pub fn same_link(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.link, &other.link)
    }

    /// Issue a raw command. Error replies become `StoreError::Protocol`.
    pub async fn call<A: AsRef<[u8]>>(&self, args: &[A]) -> StoreResult<RespValue> {
        match self.link.call(RespValue::command(args)).await? {
            RespValue::Error(message) => Err(StoreError::Protocol(message)),
            reply => Ok(reply),
        }
    }

    pub async fn ping(&self) -> StoreResult<()> {
        match self.call(&["PING"]).await? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    /// `GET`; `None` when the key does not exist. Bytes that are not valid
    /// UTF-8 are replaced with U+FFFD rather than failing the read.
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.call(&["GET", key]).await? {
            RespValue::BulkString(None) => Ok(None),
            RespValue::BulkString(Some(data)) => match String::from_utf8(data) {
                Ok(text) => Ok(Some(text)),
                Err(e) => Ok(Some(String::from_utf8_lossy(e.as_bytes()).into_owned())),
            },
            other => Err(unexpected("GET", &other)),
        }
    }

    /// `SET` without expiration; clears any TTL the key had
    pub async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let reply = self.call(&["SET", key, value]).await?;
        expect_ok("SET", reply)
    }

    /// `SETEX`: value and expiration in one atomic command
    pub async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> StoreResult<()> {
        let seconds = seconds.to_string();
        let reply = self.call(&["SETEX", key, seconds.as_str(), value]).await?;
        expect_ok("SETEX", reply)
    }

    /// `DEL`; true when a key was removed
    pub async fn del(&self, key: &str) -> StoreResult<bool> {
        match self.call(&["DEL", key]).await? {
            RespValue::Integer(n) => Ok(n > 0),
            other => Err(unexpected("DEL", &other)),
        }
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.call(&["EXISTS", key]).await? {
            RespValue::Integer(n) => Ok(n > 0),
            other => Err(unexpected("EXISTS", &other)),
        }
    }

    /// `EXPIRE`; false when the key does not exist
    pub async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        let seconds = seconds.to_string();
        match self.call(&["EXPIRE", key, seconds.as_str()]).await? {
            RespValue::Integer(n) => Ok(n == 1),
            other => Err(unexpected("EXPIRE", &other)),
        }
    }

    pub async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        match self.call(&["TTL", key]).await? {
            RespValue::Integer(-2) => Ok(KeyTtl::Missing),
            RespValue::Integer(-1) => Ok(KeyTtl::NoExpiry),
            RespValue::Integer(n) if n >= 0 => Ok(KeyTtl::ExpiresIn(n as u64)),
            other => Err(unexpected("TTL", &other)),
        }
    }

    pub(crate) async fn quit(&self) -> StoreResult<()> {
        self.link.quit().await
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("generation", &self.generation)
            .field("status", &self.status())
            .finish()
    }
}

fn expect_ok(command: &str, reply: RespValue) -> StoreResult<()> {
    match reply {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        other => Err(unexpected(command, &other)),
    }
}

fn unexpected(command: &str, reply: &RespValue) -> StoreError {
    StoreError::Protocol(format!("unexpected {} reply to {}", reply.kind(), command))
}
