//! The FTP *data* channel: active and passive connection setup, optional
//! TLS wrapping, and the throttled streaming copy used by all transfers.

use crate::server::tls;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Copy buffer size for transfers.
pub const COPY_BUF_LEN: usize = 64 * 1024;
/// How long a passive listener waits for the client to connect.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long an active dial may take.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
/// Data-channel TLS handshake deadline.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors establishing or using a data connection. Most map to `425`.
#[derive(Debug, Error)]
pub enum DataChanError {
    /// The channel cannot do what was asked: typically the configured
    /// passive range had no bindable port left.
    #[error("invalid data channel state: {0}")]
    InvalidState(&'static str),
    /// Accept/dial/handshake took too long.
    #[error("data connection timed out")]
    Timeout,
    /// TLS wrap failed.
    #[error("data TLS handshake failed: {0}")]
    Tls(#[source] io::Error),
    /// Socket level failure.
    #[error("data connection error: {0}")]
    Io(#[from] io::Error),
}

/// A data stream, possibly TLS wrapped. Server-mode TLS for passive
/// connections, client-mode for active ones.
#[derive(Debug)]
pub enum DataStream {
    /// Plaintext data connection.
    Plain(TcpStream),
    /// PROT P passive connection.
    TlsServer(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    /// PROT P active connection.
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl DataStream {
    /// Whether the stream is TLS protected.
    pub fn is_tls(&self) -> bool {
        !matches!(self, DataStream::Plain(_))
    }

    /// Flush and half-close the write side, signalling end of data.
    pub async fn finish(&mut self) -> io::Result<()> {
        match self {
            DataStream::Plain(s) => {
                s.flush().await?;
                s.shutdown().await
            }
            DataStream::TlsServer(s) => {
                s.flush().await?;
                s.shutdown().await
            }
            DataStream::TlsClient(s) => {
                s.flush().await?;
                s.shutdown().await
            }
        }
    }
}

impl AsyncRead for DataStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>, buf: &mut ReadBuf<'_>) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::TlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            DataStream::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>, buf: &[u8]) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::TlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            DataStream::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DataStream::TlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
            DataStream::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::TlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            DataStream::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

enum DataChanState {
    PassiveListening { listener: TcpListener, port: u16 },
    ActiveConnected { stream: TcpStream, peer: SocketAddr },
}

impl std::fmt::Debug for DataChanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataChanState::PassiveListening { port, .. } => write!(f, "PassiveListening({})", port),
            DataChanState::ActiveConnected { peer, .. } => write!(f, "ActiveConnected({})", peer),
        }
    }
}

/// An announced data channel: a passive listener awaiting its client, or an
/// already-dialed active connection. Each channel carries exactly one
/// transfer or listing.
#[derive(Debug)]
pub struct DataChannel {
    state: DataChanState,
}

impl DataChannel {
    /// Bind a passive listener. The configured range is walked in order;
    /// the first successful bind wins.
    pub async fn start_passive(bind_ip: IpAddr, ports: RangeInclusive<u16>) -> Result<DataChannel, DataChanError> {
        for port in ports {
            match TcpListener::bind(SocketAddr::new(bind_ip, port)).await {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    return Ok(DataChannel {
                        state: DataChanState::PassiveListening { listener, port },
                    });
                }
                Err(_) => continue,
            }
        }
        Err(DataChanError::InvalidState("no free passive port in range"))
    }

    /// Dial the PORT/EPRT target.
    pub async fn set_active(remote: SocketAddr) -> Result<DataChannel, DataChanError> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(remote))
            .await
            .map_err(|_| DataChanError::Timeout)??;
        Ok(DataChannel {
            state: DataChanState::ActiveConnected { stream, peer: remote },
        })
    }

    /// The bound passive port, if listening.
    pub fn passive_port(&self) -> Option<u16> {
        match &self.state {
            DataChanState::PassiveListening { port, .. } => Some(*port),
            _ => None,
        }
    }

    /// Whether this channel came from PORT/EPRT.
    pub fn is_active_mode(&self) -> bool {
        matches!(self.state, DataChanState::ActiveConnected { .. })
    }

    /// Produce the connected stream, accepting first when passive, and wrap
    /// it in TLS when `protect` carries the server's TLS material. Returns
    /// the stream and the peer address (the FXP classification input).
    pub async fn ensure_connected(self, protect: Option<&DataTls>) -> Result<(DataStream, SocketAddr), DataChanError> {
        match self.state {
            DataChanState::PassiveListening { listener, .. } => {
                let (stream, peer) = tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept())
                    .await
                    .map_err(|_| DataChanError::Timeout)??;
                let stream = match protect {
                    Some(data_tls) => {
                        let acceptor = TlsAcceptor::from(Arc::clone(&data_tls.server_config));
                        let tls = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream))
                            .await
                            .map_err(|_| DataChanError::Timeout)?
                            .map_err(DataChanError::Tls)?;
                        DataStream::TlsServer(Box::new(tls))
                    }
                    None => DataStream::Plain(stream),
                };
                Ok((stream, peer))
            }
            DataChanState::ActiveConnected { stream, peer } => {
                let stream = match protect {
                    Some(data_tls) => {
                        let connector = TlsConnector::from(tls::data_client_config());
                        let name = tls::data_server_name(peer.ip());
                        let tls = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, connector.connect(name, stream))
                            .await
                            .map_err(|_| DataChanError::Timeout)?
                            .map_err(DataChanError::Tls)?;
                        DataStream::TlsClient(Box::new(tls))
                    }
                    None => DataStream::Plain(stream),
                };
                Ok((stream, peer))
            }
        }
    }
}

/// TLS material for protecting data connections.
#[derive(Debug, Clone)]
pub struct DataTls {
    /// The server-side rustls config (same certificate as the control
    /// channel).
    pub server_config: Arc<rustls::ServerConfig>,
}

/// Copy `reader` to `writer` with a 64 KiB buffer, honoring a KB/s cap.
///
/// The throttle keeps a one-second token window: once the bytes written in
/// the current window exceed `max_kbps * 1024`, the copy sleeps out the
/// remainder of the window before continuing. A `max_kbps` of 0 copies
/// unthrottled. Returns the number of bytes copied.
pub async fn throttled_copy<R, W>(reader: &mut R, writer: &mut W, max_kbps: u32) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUF_LEN];
    let mut total: u64 = 0;
    let budget_per_window: u64 = max_kbps as u64 * 1024;
    let mut window_start = tokio::time::Instant::now();
    let mut window_bytes: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;

        if budget_per_window > 0 {
            window_bytes += n as u64;
            if window_bytes >= budget_per_window {
                let elapsed = window_start.elapsed();
                if elapsed < Duration::from_millis(1000) {
                    tokio::time::sleep(Duration::from_millis(1000) - elapsed).await;
                }
                window_start = tokio::time::Instant::now();
                window_bytes = 0;
            } else if window_start.elapsed() >= Duration::from_millis(1000) {
                window_start = tokio::time::Instant::now();
                window_bytes = 0;
            }
        }
    }
    writer.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn passive_bind_walks_the_range() {
        // Occupy the first port of the range, the channel must take the next.
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let first = blocker.local_addr().unwrap().port();
        if first == u16::MAX {
            return; // cannot form a two-port range
        }
        let chan = DataChannel::start_passive("127.0.0.1".parse().unwrap(), first..=first + 1)
            .await
            .unwrap();
        assert_eq!(chan.passive_port(), Some(first + 1));
    }

    #[tokio::test]
    async fn exhausted_range_reports_no_free_port() {
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();
        let err = DataChannel::start_passive("127.0.0.1".parse().unwrap(), port..=port)
            .await
            .unwrap_err();
        assert!(matches!(err, DataChanError::InvalidState(_)));
    }

    #[tokio::test]
    async fn passive_accept_hands_back_peer() {
        let chan = DataChannel::start_passive("127.0.0.1".parse().unwrap(), 0..=0).await;
        // Port 0 asks the OS for an ephemeral port.
        let chan = match chan {
            Ok(chan) => chan,
            Err(_) => return,
        };
        let port = chan.passive_port().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(("127.0.0.1", port)).await });
        let (stream, peer) = chan.ensure_connected(None).await.unwrap();
        assert!(peer.ip().is_loopback());
        assert!(!stream.is_tls());
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unthrottled_copy_moves_all_bytes() {
        let data = vec![7u8; 200_000];
        let mut reader = std::io::Cursor::new(data.clone());
        let mut out: Vec<u8> = Vec::new();
        let n = throttled_copy(&mut reader, &mut out, 0).await.unwrap();
        assert_eq!(n, 200_000);
        assert_eq!(out, data);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_sleeps_out_the_window() {
        // 64 KiB/s cap with 128 KiB payload: the copy must span at least one
        // full window.
        let data = vec![0u8; 128 * 1024];
        let mut reader = std::io::Cursor::new(data);
        let mut out: Vec<u8> = Vec::new();
        let start = tokio::time::Instant::now();
        throttled_copy(&mut reader, &mut out, 64).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
