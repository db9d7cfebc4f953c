//! Multiplexed TCP link
//!
//! Each link is an actor task owning one session: a
//! `redis::aio::MultiplexedConnection` running over a socket this module opens
//! itself, plus the spawned task driving that connection. Callers talk
//! to the actor through an unbounded channel; every request carries a oneshot
//! for its reply. Requests are dispatched as they arrive and the multiplexed
//! connection pipelines them, so concurrent calls share the socket without
//! waiting on each other.
//!
//! When the driver task ends the socket is gone: in-flight calls fail (they
//! may or may not have been applied), the link moves to `Reconnecting`, and
//! new calls queue until the reconnect strategy either restores a session or
//! gives up.

use super::{BoxFuture, Connector, Link, LinkStatus};
use crate::config::PoolConfig;
use crate::error::{StoreError, StoreResult};
use crate::resp::RespValue;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, RedisError, Value};
use socket2::{SockRef, TcpKeepalive};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type CallReply = oneshot::Sender<StoreResult<RespValue>>;
type QuitReply = oneshot::Sender<StoreResult<()>>;

/// Connects over TCP and spawns a [`TcpLink`] actor
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, config: &'a PoolConfig) -> BoxFuture<'a, StoreResult<Arc<dyn Link>>> {
        Box::pin(async move {
            let session = establish(config).await?;
            Ok(Arc::new(TcpLink::spawn(session, config.clone())) as Arc<dyn Link>)
        })
    }
}

/// Caller side of a link actor
pub struct TcpLink {
    tx: mpsc::UnboundedSender<LinkMessage>,
    status: Arc<Mutex<LinkStatus>>,
}

impl TcpLink {
    fn spawn(session: Session, config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(LinkStatus::Ready));
        let actor = LinkActor {
            rx,
            session: Some(session),
            queued: VecDeque::new(),
            config,
            status: status.clone(),
        };
        tokio::spawn(actor.run());
        TcpLink { tx, status }
    }
}

impl Link for TcpLink {
    fn call(&self, request: RespValue) -> BoxFuture<'_, StoreResult<RespValue>> {
        Box::pin(async move {
            let command = to_command(&request)?;
            let (reply, response) = oneshot::channel();
            self.tx
                .send(LinkMessage::Call { command, reply })
                .map_err(|_| StoreError::Connection("link is closed".to_string()))?;
            response.await.map_err(|_| {
                StoreError::Connection("link closed before replying".to_string())
            })?
        })
    }

    fn status(&self) -> LinkStatus {
        *self.status.lock()
    }

    fn quit(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let (reply, response) = oneshot::channel();
            if self.tx.send(LinkMessage::Quit { reply }).is_err() {
                // Actor already gone; nothing left to shut down
                return Ok(());
            }
            response.await.unwrap_or(Ok(()))
        })
    }
}

enum LinkMessage {
    Call { command: Cmd, reply: CallReply },
    Quit { reply: QuitReply },
}

/// A connected, authenticated connection and the task driving its socket
struct Session {
    conn: MultiplexedConnection,
    driver: JoinHandle<()>,
}

impl Session {
    /// Send one command on its own task so replies never wait on each other
    fn dispatch(&self, command: Cmd, reply: CallReply) {
        let mut conn = self.conn.clone();
        tokio::spawn(async move {
            let result = command.query_async(&mut conn).await;
            let _ = reply.send(into_reply(result));
        });
    }

    async fn quit(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let result: Result<Value, RedisError> = redis::cmd("QUIT").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            // The server may close before the reply is read
            Err(e) if e.is_connection_dropped() => Ok(()),
            Err(e) => match into_reply(Err(e))? {
                RespValue::Error(message) => Err(StoreError::Protocol(message)),
                _ => Ok(()),
            },
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

enum Event {
    Message(Option<LinkMessage>),
    Lost,
}

enum Attempt {
    Connected(Session),
    Failed(StoreError),
    Quit(QuitReply),
    Dropped,
}

struct LinkActor {
    rx: mpsc::UnboundedReceiver<LinkMessage>,
    session: Option<Session>,
    /// Calls received while reconnecting, sent once a session is back
    queued: VecDeque<(Cmd, CallReply)>,
    config: PoolConfig,
    status: Arc<Mutex<LinkStatus>>,
}

impl LinkActor {
    async fn run(mut self) {
        loop {
            let event = {
                let Some(session) = self.session.as_mut() else {
                    break;
                };
                while let Some((command, reply)) = self.queued.pop_front() {
                    session.dispatch(command, reply);
                }
                tokio::select! {
                    msg = self.rx.recv() => Event::Message(msg),
                    _ = &mut session.driver => Event::Lost,
                }
            };

            match event {
                Event::Message(None) => {
                    debug!(endpoint = %self.config.endpoint, "all handles dropped, closing link");
                    break;
                }
                Event::Message(Some(LinkMessage::Call { command, reply })) => {
                    if let Some(session) = self.session.as_ref() {
                        session.dispatch(command, reply);
                    }
                }
                Event::Message(Some(LinkMessage::Quit { reply })) => {
                    *self.status.lock() = LinkStatus::Closed;
                    let result = match self.session.as_ref() {
                        Some(session) => session.quit().await,
                        None => Ok(()),
                    };
                    let _ = reply.send(result);
                    break;
                }
                Event::Lost => {
                    if !self.recover("closed by server".to_string()).await {
                        break;
                    }
                }
            }
        }
        self.shutdown();
    }

    /// Run the reconnect strategy. Returns true when a session is restored.
    async fn recover(&mut self, reason: String) -> bool {
        self.session = None;
        let endpoint = self.config.endpoint.redacted();
        warn!(endpoint = %endpoint, reason = %reason, "connection lost");

        if self.config.reconnect_strategy.is_disabled() {
            info!(endpoint = %endpoint, "reconnect disabled, link closed");
            return false;
        }
        *self.status.lock() = LinkStatus::Reconnecting;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let Some(delay) = self
                .config
                .reconnect_strategy
                .next_delay(attempt, self.config.max_retries)
            else {
                error!(endpoint = %endpoint, attempts = attempt - 1, "reconnection abandoned");
                return false;
            };
            info!(
                endpoint = %endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );

            match self.attempt(delay).await {
                Attempt::Connected(session) => {
                    self.session = Some(session);
                    *self.status.lock() = LinkStatus::Ready;
                    info!(endpoint = %endpoint, attempt, "ready");
                    return true;
                }
                Attempt::Failed(err) => {
                    warn!(endpoint = %endpoint, attempt, error = %err, "reconnect attempt failed");
                }
                Attempt::Quit(reply) => {
                    // No session to send QUIT on; shutting down is all that is left
                    let _ = reply.send(Ok(()));
                    return false;
                }
                Attempt::Dropped => return false,
            }
        }
    }

    /// Wait `delay`, then connect, while still accepting messages.
    async fn attempt(&mut self, delay: Duration) -> Attempt {
        let config = self.config.clone();
        let connect = async move {
            tokio::time::sleep(delay).await;
            establish(&config).await
        };
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(session) => Attempt::Connected(session),
                        Err(err) => Attempt::Failed(err),
                    };
                }
                msg = self.rx.recv() => match msg {
                    Some(LinkMessage::Call { command, reply }) => {
                        self.queued.push_back((command, reply));
                    }
                    Some(LinkMessage::Quit { reply }) => return Attempt::Quit(reply),
                    None => return Attempt::Dropped,
                },
            }
        }
    }

    fn shutdown(&mut self) {
        *self.status.lock() = LinkStatus::Closed;
        self.session = None;
        for (_, reply) in self.queued.drain(..) {
            let _ = reply.send(Err(StoreError::Connection("link closed".to_string())));
        }
        self.rx.close();
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                LinkMessage::Call { reply, .. } => {
                    let _ = reply.send(Err(StoreError::Connection("link closed".to_string())));
                }
                LinkMessage::Quit { reply } => {
                    let _ = reply.send(Ok(()));
                }
            }
        }
        debug!(endpoint = %self.config.endpoint, "link actor stopped");
    }
}

/// TCP connect plus handshake, bounded by the connect timeout
async fn establish(config: &PoolConfig) -> StoreResult<Session> {
    match tokio::time::timeout(config.connect_timeout, open(config)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Connection(format!(
            "connecting to {} timed out after {}ms",
            config.endpoint,
            config.connect_timeout.as_millis()
        ))),
    }
}

/// Open the socket, then let the multiplexed connection run AUTH and SELECT
/// from the endpoint before a final PING.
async fn open(config: &PoolConfig) -> StoreResult<Session> {
    let endpoint = &config.endpoint;
    let stream = TcpStream::connect(endpoint.address())
        .await
        .map_err(|e| StoreError::Connection(format!("connecting to {}: {}", endpoint, e)))?;
    stream.set_nodelay(true)?;
    if config.keep_alive {
        let keepalive = TcpKeepalive::new().with_time(config.keep_alive_initial_delay);
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
    }

    let (conn, driver) = MultiplexedConnection::new(endpoint.session_info(), stream)
        .await
        .map_err(|e| StoreError::Connection(format!("handshake rejected: {}", e)))?;
    let session = Session {
        conn,
        driver: tokio::spawn(driver),
    };

    let mut conn = session.conn.clone();
    let pong: Result<Value, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
    match pong {
        Ok(Value::SimpleString(s)) if s == "PONG" => Ok(session),
        Ok(other) => Err(StoreError::Connection(format!(
            "handshake PING got unexpected reply {:?}",
            other
        ))),
        Err(e) => Err(StoreError::Connection(format!("handshake PING rejected: {}", e))),
    }
}

/// Build a command from a RESP array of bulk strings
fn to_command(request: &RespValue) -> StoreResult<Cmd> {
    let RespValue::Array(Some(parts)) = request else {
        return Err(StoreError::Protocol(format!(
            "expected a command array, got {}",
            request.kind()
        )));
    };
    let mut command = Cmd::new();
    for part in parts {
        match part {
            RespValue::BulkString(Some(data)) => {
                command.arg(data.as_slice());
            }
            other => {
                return Err(StoreError::Protocol(format!(
                    "command argument cannot be {}",
                    other.kind()
                )))
            }
        }
    }
    Ok(command)
}

/// Map a reply onto the link contract: server errors are values, transport
/// faults are `Connection` errors.
fn into_reply(result: Result<Value, RedisError>) -> StoreResult<RespValue> {
    match result {
        Ok(value) => from_value(value),
        Err(e) if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() => {
            Err(StoreError::Connection(e.to_string()))
        }
        Err(e) => match (e.code(), e.detail()) {
            (Some(code), Some(detail)) => Ok(RespValue::Error(format!("{} {}", code, detail))),
            (Some(code), None) => Ok(RespValue::Error(code.to_string())),
            _ => Ok(RespValue::Error(e.to_string())),
        },
    }
}

fn from_value(value: Value) -> StoreResult<RespValue> {
    Ok(match value {
        Value::Nil => RespValue::BulkString(None),
        Value::Int(n) => RespValue::Integer(n),
        Value::BulkString(data) => RespValue::BulkString(Some(data)),
        Value::SimpleString(s) => RespValue::SimpleString(s),
        Value::Okay => RespValue::ok(),
        Value::Array(items) => RespValue::Array(Some(
            items
                .into_iter()
                .map(from_value)
                .collect::<StoreResult<Vec<_>>>()?,
        )),
        other => return Err(StoreError::Protocol(format!("unsupported reply {:?}", other))),
    })
}
