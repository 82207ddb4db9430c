//! Transport primitive (spec §2, §3, §4.1): a `Socket` capability plus the
//! delegated TLS upgrade. Buffers live in `common::buffer`; this module only
//! owns the byte-stream abstraction over TCP (and TCP+TLS).

pub mod http3;
pub mod sse;
pub mod websocket;

use crate::common::error::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Lifecycle state of a single `Socket` (distinct from a pooled or registered
/// connection's broader state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
    Error = 3,
}

impl From<u8> for SocketState {
    fn from(v: u8) -> Self {
        match v {
            0 => SocketState::Connecting,
            1 => SocketState::Open,
            2 => SocketState::Closed,
            _ => SocketState::Error,
        }
    }
}

/// Point-in-time counters for a socket. `last_active_at` only ever advances
/// (see `Counters::touch`), guaranteeing monotonicity without requiring
/// exact wall-clock fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub opened_at: u64,
    pub last_active_at: u64,
}

#[derive(Default)]
struct Counters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    opened_at: AtomicU64,
    last_active_at: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        let now = now_ms();
        Counters {
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            opened_at: AtomicU64::new(now),
            last_active_at: AtomicU64::new(now),
        }
    }

    /// Advances `last_active_at` to `max(now, last_active_at + 1)`.
    fn touch(&self) {
        let now = now_ms();
        let mut prev = self.last_active_at.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self.last_active_at.compare_exchange_weak(
                prev,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(cur) => prev = cur,
            }
        }
    }

    fn snapshot(&self) -> SocketStats {
        SocketStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            opened_at: self.opened_at.load(Ordering::Relaxed),
            last_active_at: self.last_active_at.load(Ordering::Relaxed),
        }
    }
}

/// A connected byte stream with address/stat introspection, boxed as
/// `Box<dyn Socket>` by pool and proxy-chain code so transport kind (plain
/// TCP vs TLS) is invisible above this layer.
#[async_trait]
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin {
    fn local_addr(&self) -> Option<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
    fn state(&self) -> SocketState;
    fn stats(&self) -> SocketStats;
    async fn close(&mut self) -> Result<()>;
}

/// Wraps any `AsyncRead + AsyncWrite` stream with stats tracking and a
/// state flag, implementing `Socket`. Used for both plain TCP and
/// TLS-wrapped connections (`TcpSocket` / `TlsSocket` below).
pub struct TrackedSocket<S> {
    inner: S,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    counters: Arc<Counters>,
    state: Arc<AtomicU8>,
}

impl<S> TrackedSocket<S> {
    fn new(inner: S, local_addr: Option<SocketAddr>, remote_addr: Option<SocketAddr>) -> Self {
        TrackedSocket {
            inner,
            local_addr,
            remote_addr,
            counters: Arc::new(Counters::new()),
            state: Arc::new(AtomicU8::new(SocketState::Open as u8)),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedSocket<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let counters = self.counters.clone();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &res {
            let n = buf.filled().len() - before;
            if n > 0 {
                counters.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                counters.touch();
            }
        }
        res
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedSocket<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let counters = self.counters.clone();
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &res {
            counters.bytes_written.fetch_add(*n as u64, Ordering::Relaxed);
            counters.touch();
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + Unpin> Socket for TrackedSocket<S> {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn state(&self) -> SocketState {
        SocketState::from(self.state.load(Ordering::Relaxed))
    }

    fn stats(&self) -> SocketStats {
        self.counters.snapshot()
    }

    async fn close(&mut self) -> Result<()> {
        self.state.store(SocketState::Closed as u8, Ordering::Relaxed);
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl AsyncRead for Box<dyn Socket> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_read(cx, buf)
    }
}

impl AsyncWrite for Box<dyn Socket> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut **self).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_shutdown(cx)
    }
}

pub type TcpSocket = TrackedSocket<TcpStream>;
pub type TlsSocket = TrackedSocket<tokio_rustls::client::TlsStream<TcpStream>>;

/// Dials `host:port` over plain TCP and wraps it as a `TcpSocket`.
pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpSocket> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::connection(format!("connect to {}:{} failed: {}", host, port, e)))?;
    crate::common::net::configure_tcp_stream(&stream);
    let local = stream.local_addr().ok();
    let remote = stream.peer_addr().ok();
    Ok(TrackedSocket::new(stream, local, remote))
}

fn root_cert_store() -> rustls::RootCertStore {
    let mut store = rustls::RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

static CRYPTO_PROVIDER_INSTALLED: std::sync::Once = std::sync::Once::new();

/// Installs aws-lc-rs as the process-wide rustls `CryptoProvider`, once.
/// A library has no `main()` to do this up front, so `start_tls` does it
/// lazily on first use; `install_default` is idempotent-safe to ignore if
/// some other part of the process already installed a provider.
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INSTALLED.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Delegated TLS upgrade primitive (spec §1, §5): terminates TLS on `conn`
/// using the platform trust store, verifying against `hostname`. This is
/// the network layer's only TLS surface — it does not implement or audit
/// the handshake itself.
pub async fn start_tls(conn: TcpSocket, hostname: &str) -> Result<TlsSocket> {
    use rustls::pki_types::ServerName;
    use tokio_rustls::TlsConnector;

    ensure_crypto_provider();

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_cert_store())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name: ServerName<'static> = hostname
        .to_string()
        .try_into()
        .map_err(|_| Error::tls(format!("invalid server name: {}", hostname)))?;

    let local_addr = conn.local_addr();
    let remote_addr = conn.remote_addr();
    let counters = conn.counters.clone();

    let tls_stream = connector
        .connect(server_name, conn.inner)
        .await
        .map_err(|e| Error::tls(format!("TLS handshake with {} failed: {}", hostname, e)))?;

    Ok(TrackedSocket {
        inner: tls_stream,
        local_addr,
        remote_addr,
        counters,
        state: Arc::new(AtomicU8::new(SocketState::Open as u8)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tracked_socket_records_bytes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            s.write_all(b"hello").await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        let mut sock = TrackedSocket::new(stream, local, remote);

        let mut buf = [0u8; 5];
        sock.read_exact(&mut buf).await.unwrap();
        server.await.unwrap();

        assert_eq!(&buf, b"hello");
        assert_eq!(sock.stats().bytes_read, 5);
        assert_eq!(sock.state(), SocketState::Open);
    }

    #[test]
    fn test_socket_state_roundtrip() {
        assert_eq!(SocketState::from(1), SocketState::Open);
        assert_eq!(SocketState::from(2), SocketState::Closed);
    }
}
