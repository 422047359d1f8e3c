//! TCP transport shared by every probe.
//!
//! Each attempt opens exactly one [`Connection`] through a [`Connector`] and
//! never hands it to another attempt. Dropping a `Connection` closes the
//! socket, so aborting an attempt's future is enough to release it.

use crate::error::ProbeError;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

/// Pause between connect retries
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    open: AtomicUsize,
}

/// Counts connections opened through a connector.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counters: Arc<Counters>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections opened since the tracker was created
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::Acquire)
    }

    /// Connections currently open
    pub fn open(&self) -> usize {
        self.counters.open.load(Ordering::Acquire)
    }

    fn guard(&self) -> OpenGuard {
        self.counters.opened.fetch_add(1, Ordering::AcqRel);
        self.counters.open.fetch_add(1, Ordering::AcqRel);
        OpenGuard {
            counters: self.counters.clone(),
        }
    }
}

#[derive(Debug)]
struct OpenGuard {
    counters: Arc<Counters>,
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One TCP connection owned by one attempt
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    _guard: Option<OpenGuard>,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Orderly shutdown of the write side, then release the socket.
    ///
    /// A peer that already hung up is not an error.
    pub async fn close(mut self) -> io::Result<()> {
        match self.stream.shutdown().await {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Opens connections with an explicit connect timeout
#[derive(Debug, Clone, Default)]
pub struct Connector {
    tracker: Option<ConnectionTracker>,
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose connections are counted by `tracker`
    pub fn with_tracker(tracker: ConnectionTracker) -> Self {
        Self {
            tracker: Some(tracker),
        }
    }

    pub fn tracker(&self) -> Option<&ConnectionTracker> {
        self.tracker.as_ref()
    }

    /// Connect once, failing with `Timeout` if `connect_timeout` elapses
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Connection, ProbeError> {
        match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => self.wrap(stream),
            Ok(Err(e)) => Err(ProbeError::connection(format!("{}:{}: {}", host, port, e))),
            Err(_) => Err(ProbeError::Timeout(connect_timeout)),
        }
    }

    /// Connect with up to `retries` additional tries, all within `connect_timeout`
    pub async fn connect_with_retry(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        retries: u32,
    ) -> Result<Connection, ProbeError> {
        let deadline = Instant::now() + connect_timeout;
        let mut tries = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProbeError::Timeout(connect_timeout));
            }

            match self.connect(host, port, remaining).await {
                Ok(conn) => return Ok(conn),
                Err(ProbeError::Timeout(_)) => return Err(ProbeError::Timeout(connect_timeout)),
                Err(e) if tries < retries => {
                    tries += 1;
                    debug!(host, port, error = %e, tries, "Connect failed, retrying");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    sleep(RETRY_BACKOFF.min(remaining)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn wrap(&self, stream: TcpStream) -> Result<Connection, ProbeError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Connection {
            stream,
            peer,
            _guard: self.tracker.as_ref().map(ConnectionTracker::guard),
        })
    }
}

/// Fold a close outcome into an attempt outcome.
///
/// An earlier error always wins; a failed close only surfaces when the
/// attempt had otherwise succeeded.
pub fn settle<T>(outcome: Result<T, ProbeError>, closed: io::Result<()>) -> Result<T, ProbeError> {
    match (outcome, closed) {
        (Ok(_), Err(e)) => Err(ProbeError::connection(format!("close failed: {}", e))),
        (outcome, _) => outcome,
    }
}
