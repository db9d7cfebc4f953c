//! Namespaced JSON records with optional expiration over a Redis-protocol store.
//!
//! - [`config`]: layered connection configuration (defaults, environment, overrides)
//! - [`connection`]: connection lifecycle, pipelined TCP transport, in-memory store
//! - [`table`]: namespace bindings with CRUD and TTL operations
//! - [`resp`]: RESP2 values and `tokio_util` framing

pub mod config;
pub mod connection;
pub mod error;
pub mod observability;
pub mod resp;
pub mod rng;
pub mod table;

pub use config::{Endpoint, PoolConfig, PoolOverrides, ReconnectStrategy};
pub use connection::{
    ConnectionManager, ConnectionState, Handle, KeyTtl, MemoryConnector, MemoryStore, TcpConnector,
};
pub use error::{StoreError, StoreResult};
pub use table::{Table, TableOptions};
