//! Loopback RESP server backed by a `MemoryStore`

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use redis_table::resp::{RespCodec, RespValue};
use redis_table::MemoryStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

pub struct TestServer {
    addr: SocketAddr,
    store: MemoryStore,
    accepts: Arc<AtomicU64>,
    kill: Arc<watch::Sender<u64>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Server that requires `AUTH <password>` (or `AUTH <user> <password>`)
    pub async fn with_password(password: &str) -> Self {
        Self::start_with(Some(password.to_string())).await
    }

    async fn start_with(password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = MemoryStore::new();
        let accepts = Arc::new(AtomicU64::new(0));
        let kill = Arc::new(watch::channel(0u64).0);

        let task = {
            let store = store.clone();
            let accepts = accepts.clone();
            let kill = kill.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    accepts.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, store.clone(), password.clone(), kill.subscribe()));
                }
            })
        };

        TestServer {
            addr,
            store,
            accepts,
            kill,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port())
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Connections accepted so far
    pub fn accepts(&self) -> u64 {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Close every open client connection; the listener keeps accepting
    pub fn drop_connections(&self) {
        self.kill.send_modify(|n| *n += 1);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
        self.drop_connections();
    }
}

async fn serve(
    stream: TcpStream,
    store: MemoryStore,
    password: Option<String>,
    mut kill: watch::Receiver<u64>,
) {
    let mut framed = Framed::new(stream, RespCodec);
    let mut authenticated = password.is_none();

    loop {
        let request = tokio::select! {
            _ = kill.changed() => return,
            frame = framed.next() => match frame {
                Some(Ok(request)) => request,
                _ => return,
            },
        };

        let (reply, quit) = match request.as_command() {
            Some((name, args)) if name == "AUTH" => {
                let given = args.last().map(|p| p.to_vec());
                let expected = password.as_ref().map(|p| p.as_bytes().to_vec());
                if expected.is_none() || given == expected {
                    authenticated = true;
                    (RespValue::ok(), false)
                } else {
                    let message = "WRONGPASS invalid username-password pair or user is disabled.";
                    (RespValue::error(message), false)
                }
            }
            Some(_) if !authenticated => {
                (RespValue::error("NOAUTH Authentication required."), false)
            }
            Some((name, _)) if name == "QUIT" => (store.execute(&request), true),
            _ => (store.execute(&request), false),
        };

        if framed.send(reply).await.is_err() || quit {
            return;
        }
    }
}

/// A listener that accepts connections but never answers
pub async fn silent_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Poll `check` every 10ms until it holds or `timeout_ms` passes
pub async fn wait_until(timeout_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
