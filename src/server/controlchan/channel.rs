//! Ownership of the control stream: framing, the single outgoing buffer,
//! and the in-place TLS upgrade.

use super::codecs::FtpCodec;
use super::command::Command;
use super::error::{ControlChanError, ControlChanErrorKind};
use super::reply::Reply;

use futures_util::{SinkExt, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;

/// The control stream, plaintext or upgraded.
#[derive(Debug)]
pub enum ControlStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// After a successful AUTH TLS handshake.
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for ControlStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ControlStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ControlStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ControlStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ControlStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ControlStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ControlStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ControlStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ControlStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ControlStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// The framed control channel. All replies of a session funnel through the
/// one buffer in here, which is what keeps the 150/226 pair contiguous.
#[derive(Debug)]
pub struct ControlChannel {
    // Option so the TLS upgrade can take the framed stream apart; it is
    // `None` only within `upgrade_tls`.
    framed: Option<Framed<ControlStream, FtpCodec>>,
}

impl ControlChannel {
    /// Wrap a fresh TCP connection.
    pub fn new(stream: TcpStream) -> ControlChannel {
        ControlChannel {
            framed: Some(Framed::new(ControlStream::Plain(stream), FtpCodec::new())),
        }
    }

    fn framed_mut(&mut self) -> Result<&mut Framed<ControlStream, FtpCodec>, ControlChanError> {
        self.framed.as_mut().ok_or_else(|| ControlChanErrorKind::IllegalState.into())
    }

    /// Write one reply and flush it.
    pub async fn send(&mut self, reply: Reply) -> Result<(), ControlChanError> {
        if reply == Reply::None {
            return Ok(());
        }
        let framed = self.framed_mut()?;
        framed.send(reply).await
    }

    /// Next parsed command; `None` when the peer closed the connection.
    pub async fn next(&mut self) -> Option<Result<Command, ControlChanError>> {
        match self.framed.as_mut() {
            Some(framed) => framed.next().await,
            None => None,
        }
    }

    /// Replace the plaintext stream with a TLS one. The `234` reply must
    /// already have been sent; nothing may be written between that reply
    /// and the handshake.
    pub async fn upgrade_tls(&mut self, acceptor: TlsAcceptor, handshake_timeout: Duration) -> Result<(), ControlChanError> {
        let framed = self.framed.take().ok_or(ControlChanErrorKind::IllegalState)?;
        let stream = framed.into_inner();
        let tcp = match stream {
            ControlStream::Plain(tcp) => tcp,
            ControlStream::Tls(_) => return Err(ControlChanErrorKind::IllegalState.into()),
        };
        let handshake = tokio::time::timeout(handshake_timeout, acceptor.accept(tcp)).await;
        match handshake {
            Ok(Ok(tls)) => {
                self.framed = Some(Framed::new(ControlStream::Tls(Box::new(tls)), FtpCodec::new()));
                Ok(())
            }
            Ok(Err(err)) => Err(ControlChanError::with_source(ControlChanErrorKind::TlsHandshake, err)),
            Err(_) => Err(ControlChanErrorKind::TlsHandshake.into()),
        }
    }

    /// Flush and close the stream.
    pub async fn shutdown(&mut self) {
        if let Some(framed) = self.framed.as_mut() {
            let _ = framed.flush().await;
            let _ = framed.close().await;
        }
    }
}
