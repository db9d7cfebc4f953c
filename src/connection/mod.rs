//! Connection lifecycle
//!
//! A [`ConnectionManager`] owns at most one live [`Handle`] at a time and
//! creates it through a [`Connector`]. The handle wraps a [`Link`], which is
//! the transport-level session: a pipelined TCP connection in production
//! ([`TcpConnector`]), or an in-process store for tests ([`MemoryConnector`]).
//!
//! ## State machine
//!
//! ```text
//! Uninitialized ──handle()──▶ Connecting ──ok──▶ Ready
//!                                 │               │ link lost / disconnect()
//!                                 ▼ failure       ▼
//!                              Errored        Disconnected
//!                                 └──handle()──▶ Connecting ◀──handle()──┘
//! ```
//!
//! Nothing reconnects implicitly from `Disconnected` or `Errored`: the next
//! `handle()` call starts a fresh `Connecting` round. A `Ready` link that
//! loses its socket repairs itself in the background according to the
//! configured [`ReconnectStrategy`](crate::config::ReconnectStrategy); calls
//! made meanwhile wait in its queue.

mod handle;
mod manager;
pub mod memory;
pub mod tcp;

#[cfg(test)]
mod lifecycle_model;

pub use handle::{Handle, KeyTtl};
pub use manager::ConnectionManager;
pub use memory::{MemoryConnector, MemoryStore};
pub use tcp::TcpConnector;

use crate::config::PoolConfig;
use crate::error::StoreResult;
use crate::resp::RespValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future type returned by the object-safe transport traits
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle state of a [`ConnectionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection has been attempted yet
    Uninitialized,
    /// A connect + handshake is in progress
    Connecting,
    /// A live handle is available
    Ready,
    /// The handle was closed explicitly or its link went down
    Disconnected,
    /// The last connect attempt failed; the next `handle()` retries
    Errored,
}

/// Health of a single link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    Ready,
    /// The socket was lost; the link is retrying per its reconnect strategy
    Reconnecting,
    /// Terminal: shut down, or reconnection was abandoned
    Closed,
}

/// One session with the store.
///
/// Implementations must accept concurrent `call`s and answer each with the
/// reply to its own request.
pub trait Link: Send + Sync + 'static {
    /// Send one command and wait for its reply. Server error replies come
    /// back as `Ok(RespValue::Error(..))`; only transport faults are `Err`.
    fn call(&self, request: RespValue) -> BoxFuture<'_, StoreResult<RespValue>>;

    fn status(&self) -> LinkStatus;

    /// Graceful shutdown (QUIT). The link is `Closed` afterwards, even on error.
    fn quit(&self) -> BoxFuture<'_, StoreResult<()>>;
}

/// Factory for links; performs connect + handshake.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, config: &'a PoolConfig) -> BoxFuture<'a, StoreResult<Arc<dyn Link>>>;
}
