//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to one node so commands skip the handshake,
//! while bounding how many sockets a node may hold open.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Bounded Waits**: A checkout waits for a semaphore slot at most the
//!    caller's timeout, then fails with `PoolExhausted`.
//! 3. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 4. **Poison on Failure**: A connection whose last exchange failed may hold
//!    undrained bytes and is never handed out again.
//!
//! ## Slot Accounting
//!
//! ```text
//! permits (max_connections) = in-use + idle
//! idle.len() <= max_idle
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use skv_common::{encode_frame, split_frame, MessageKind, ProtocolError};

use crate::error::{ClientError, ClientResult};

/// Pool configuration for one node.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Node address, e.g. "127.0.0.1:3000".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_connections: usize,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

struct PoolInner {
    config: PoolConfig,
    idle: Mutex<VecDeque<Connection>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        ConnectionPool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
                config,
                permits,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.config.addr
    }

    /// Checks out a connection, opening one when no idle connection exists.
    ///
    /// Waits at most `wait` for a free slot.
    pub async fn acquire(&self, wait: Duration) -> ClientResult<PooledConnection> {
        let permit = match tokio::time::timeout(wait, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore only closes with the pool.
            Ok(Err(_)) => return Err(ClientError::NotConnected),
            Err(_) => {
                return Err(ClientError::PoolExhausted {
                    addr: self.inner.config.addr.clone(),
                })
            }
        };

        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn, permit));
        }

        // A failed connect drops the permit and frees the slot.
        let conn = Connection::connect(&self.inner.config.addr, self.inner.config.connect_timeout).await?;
        Ok(PooledConnection::new(self.inner.clone(), conn, permit))
    }

    /// Drops idle connections and fails current and future waiters.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        self.inner.idle.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        let free = self.inner.permits.available_permits();
        self.inner
            .config
            .max_connections
            .saturating_sub(free)
            .saturating_sub(self.idle_count())
    }

    fn pop_idle(&self) -> Option<Connection> {
        self.inner.idle.lock().pop_front()
    }
}

impl PoolInner {
    fn return_connection(&self, conn: Connection) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle {
            idle.push_back(conn);
        }
    }
}

/// RAII guard returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
    // Released after `drop` has parked the connection.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection, permit: OwnedSemaphorePermit) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
            _permit: permit,
        }
    }

    /// Sends one frame and waits up to `deadline` for the reply body.
    pub async fn exchange(
        &mut self,
        kind: MessageKind,
        body: &[u8],
        deadline: Duration,
    ) -> ClientResult<BytesMut> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(ClientError::NotConnected),
        };
        let response = match tokio::time::timeout(deadline, conn.exchange(kind, body)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(deadline)),
        };
        if let Err(err) = &response {
            // Unknown bytes may remain on the socket.
            debug!(addr = %self.pool.config.addr, error = %err, "discarding connection");
            self.valid = false;
        }
        response
    }

    /// Keeps the connection out of the pool once dropped.
    pub fn discard(&mut self) {
        self.valid = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.valid {
                self.pool.return_connection(conn);
            }
        }
    }
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    stream: TcpStream,
    addr: String,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Connection {
    pub async fn connect(addr: &str, timeout: Duration) -> ClientResult<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(ClientError::connection(addr, err)),
            Err(_) => {
                let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out");
                return Err(ClientError::connection(addr, err));
            }
        };
        // Disable Nagle to keep request latency low for small payloads.
        stream
            .set_nodelay(true)
            .map_err(|err| ClientError::connection(addr, err))?;

        Ok(Connection {
            stream,
            addr: addr.to_string(),
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: BytesMut::with_capacity(1024),
        })
    }

    /// Writes one frame and reads exactly one reply frame of the same kind.
    pub async fn exchange(&mut self, kind: MessageKind, body: &[u8]) -> ClientResult<BytesMut> {
        self.write_buf.clear();
        encode_frame(kind, body, &mut self.write_buf)?;
        self.stream
            .write_all(&self.write_buf)
            .await
            .map_err(|err| ClientError::connection(self.addr.as_str(), err))?;

        loop {
            if let Some((header, body)) = split_frame(&mut self.read_buf)? {
                if header.kind != kind {
                    return Err(ProtocolError::UnexpectedMessageKind(header.kind as u8).into());
                }
                return Ok(body);
            }
            let read = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|err| ClientError::connection(self.addr.as_str(), err))?;
            if read == 0 {
                let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed by node");
                return Err(ClientError::connection(self.addr.as_str(), err));
            }
        }
    }
}
