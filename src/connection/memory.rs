//! In-process store for tests and deterministic simulation
//!
//! [`MemoryStore`] executes the command subset this crate speaks (PING, AUTH,
//! SELECT, GET, SET [EX], SETEX, DEL, EXISTS, EXPIRE, TTL, QUIT) with Redis
//! reply semantics. Expiry runs on tokio's clock, so tests that pause time
//! can advance past a TTL without sleeping.
//!
//! Fault hooks:
//! - [`MemoryStore::refuse_connects`]: the next N connect attempts fail
//! - [`MemoryStore::sever_links`]: every open link drops, as on network loss
//! - [`MemoryStore::fail_quit`]: QUIT replies with an error

use super::{BoxFuture, Connector, Link, LinkStatus};
use crate::config::PoolConfig;
use crate::error::{StoreError, StoreResult};
use crate::resp::RespValue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<Vec<u8>, Entry>,
    refuse_connects: u32,
    fail_quit: bool,
    links: Vec<Weak<AtomicBool>>,
}

impl MemoryState {
    /// Lazily drop `key` if its deadline has passed, then look it up.
    fn live(&mut self, key: &[u8]) -> Option<&mut Entry> {
        let now = Instant::now();
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|deadline| deadline <= now);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

/// Shared in-memory keyspace. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    stats: Arc<MemoryStats>,
}

#[derive(Debug, Default)]
struct MemoryStats {
    connects: AtomicU64,
    commands: AtomicU64,
    quits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful connects so far
    pub fn connects(&self) -> u64 {
        self.stats.connects.load(Ordering::SeqCst)
    }

    /// Commands executed so far (handshake commands included)
    pub fn commands(&self) -> u64 {
        self.stats.commands.load(Ordering::SeqCst)
    }

    /// QUIT commands received so far
    pub fn quits(&self) -> u64 {
        self.stats.quits.load(Ordering::SeqCst)
    }

    /// Make the next `count` connect attempts fail
    pub fn refuse_connects(&self, count: u32) {
        self.state.lock().refuse_connects = count;
    }

    /// Make QUIT reply with an error
    pub fn fail_quit(&self, fail: bool) {
        self.state.lock().fail_quit = fail;
    }

    /// Drop every open link
    pub fn sever_links(&self) {
        let mut state = self.state.lock();
        for link in state.links.drain(..) {
            if let Some(flag) = link.upgrade() {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Number of keys, counting ones whose TTL has elapsed but are not yet purged
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute one command and produce the store's reply
    pub fn execute(&self, request: &RespValue) -> RespValue {
        self.stats.commands.fetch_add(1, Ordering::SeqCst);

        let Some((name, args)) = request.as_command() else {
            return RespValue::error("ERR protocol error: expected a command array");
        };

        let mut state = self.state.lock();
        match (name.as_str(), args.as_slice()) {
            ("PING", []) => RespValue::pong(),
            ("PING", [payload]) => RespValue::bulk(payload.to_vec()),
            ("AUTH", [_]) | ("AUTH", [_, _]) => RespValue::ok(),
            ("SELECT", [index]) => match parse_int(index) {
                Some(_) => RespValue::ok(),
                None => RespValue::error("ERR value is not an integer or out of range"),
            },
            ("QUIT", []) => {
                self.stats.quits.fetch_add(1, Ordering::SeqCst);
                if state.fail_quit {
                    RespValue::error("ERR simulated QUIT failure")
                } else {
                    RespValue::ok()
                }
            }
            ("GET", [key]) => match state.live(key) {
                Some(entry) => RespValue::bulk(entry.value.clone()),
                None => RespValue::nil(),
            },
            ("SET", [key, value]) => {
                state.entries.insert(
                    key.to_vec(),
                    Entry {
                        value: value.to_vec(),
                        expires_at: None,
                    },
                );
                RespValue::ok()
            }
            ("SET", [key, value, option, seconds]) if option.eq_ignore_ascii_case(b"EX") => {
                set_with_ttl(&mut state, key, value, seconds)
            }
            ("SETEX", [key, seconds, value]) => set_with_ttl(&mut state, key, value, seconds),
            ("DEL", keys) if !keys.is_empty() => {
                let mut removed = 0;
                for key in keys {
                    if state.live(key).is_some() {
                        state.entries.remove(*key);
                        removed += 1;
                    }
                }
                RespValue::Integer(removed)
            }
            ("EXISTS", keys) if !keys.is_empty() => {
                let found = keys.iter().filter(|key| state.live(key).is_some()).count();
                RespValue::Integer(found as i64)
            }
            ("EXPIRE", [key, seconds]) => {
                let Some(seconds) = parse_int(seconds) else {
                    return RespValue::error("ERR value is not an integer or out of range");
                };
                if state.live(key).is_none() {
                    return RespValue::Integer(0);
                }
                if seconds <= 0 {
                    state.entries.remove(*key);
                } else if let Some(entry) = state.entries.get_mut(*key) {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds as u64));
                }
                RespValue::Integer(1)
            }
            ("TTL", [key]) => match state.live(key) {
                None => RespValue::Integer(-2),
                Some(Entry {
                    expires_at: None, ..
                }) => RespValue::Integer(-1),
                Some(Entry {
                    expires_at: Some(deadline),
                    ..
                }) => {
                    // Rounded to the nearest second, as the store does
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    RespValue::Integer(((remaining.as_millis() + 500) / 1000) as i64)
                }
            },
            (name, _) => RespValue::error(format!(
                "ERR unknown command or wrong number of arguments for '{}'",
                name.to_ascii_lowercase()
            )),
        }
    }

    fn register_link(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(true));
        let mut state = self.state.lock();
        state.links.retain(|l| l.strong_count() > 0);
        state.links.push(Arc::downgrade(&flag));
        flag
    }
}

fn set_with_ttl(state: &mut MemoryState, key: &[u8], value: &[u8], seconds: &[u8]) -> RespValue {
    match parse_int(seconds) {
        Some(secs) if secs > 0 => {
            state.entries.insert(
                key.to_vec(),
                Entry {
                    value: value.to_vec(),
                    expires_at: Some(Instant::now() + Duration::from_secs(secs as u64)),
                },
            );
            RespValue::ok()
        }
        Some(_) => RespValue::error("ERR invalid expire time in 'setex' command"),
        None => RespValue::error("ERR value is not an integer or out of range"),
    }
}

fn parse_int(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Connector producing links into a [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        MemoryConnector { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, config: &'a PoolConfig) -> BoxFuture<'a, StoreResult<Arc<dyn Link>>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            {
                let mut state = self.store.state.lock();
                if state.refuse_connects > 0 {
                    state.refuse_connects -= 1;
                    return Err(StoreError::Connection(format!(
                        "connection to {} refused",
                        config.endpoint.redacted()
                    )));
                }
            }
            self.store.stats.connects.fetch_add(1, Ordering::SeqCst);
            let link = MemoryLink {
                store: self.store.clone(),
                open: self.store.register_link(),
            };
            Ok(Arc::new(link) as Arc<dyn Link>)
        })
    }
}

/// A link into a [`MemoryStore`]. Never reconnects: once severed it is closed.
#[derive(Debug)]
pub struct MemoryLink {
    store: MemoryStore,
    open: Arc<AtomicBool>,
}

impl Link for MemoryLink {
    fn call(&self, request: RespValue) -> BoxFuture<'_, StoreResult<RespValue>> {
        Box::pin(async move {
            // Yield so concurrent callers interleave as they would on a socket
            tokio::task::yield_now().await;
            if !self.open.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("connection lost".to_string()));
            }
            Ok(self.store.execute(&request))
        })
    }

    fn status(&self) -> LinkStatus {
        if self.open.load(Ordering::SeqCst) {
            LinkStatus::Ready
        } else {
            LinkStatus::Closed
        }
    }

    fn quit(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            if !self.open.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            match self.store.execute(&RespValue::command(&["QUIT"])) {
                RespValue::Error(message) => Err(StoreError::Protocol(message)),
                _ => Ok(()),
            }
        })
    }
}
