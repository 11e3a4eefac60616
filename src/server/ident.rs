//! Async RFC 1413 ident lookup.
//!
//! The query runs against the client's machine on port 113 with a hard
//! timeout; failures are reported as `None` and are non-fatal unless the
//! account demands an ident match.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const IDENT_PORT: u16 = 113;

/// Default deadline for the whole query.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Query the identd on the client host for the user owning the control
/// connection. `peer` is the client side of the connection, `local` ours.
pub async fn query(peer: SocketAddr, local: SocketAddr, timeout: Duration) -> Option<String> {
    tokio::time::timeout(timeout, query_inner(peer, local)).await.ok().flatten()
}

async fn query_inner(peer: SocketAddr, local: SocketAddr) -> Option<String> {
    let mut stream = TcpStream::connect(SocketAddr::new(peer.ip(), IDENT_PORT)).await.ok()?;
    // The request names the port pair as seen from the ident server's side:
    // its local port (the client's) first, then the remote (ours).
    let request = format!("{}, {}\r\n", peer.port(), local.port());
    stream.write_all(request.as_bytes()).await.ok()?;

    let mut response = Vec::with_capacity(256);
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.contains(&b'\n') || response.len() > 1024 {
            break;
        }
    }
    parse_response(std::str::from_utf8(&response).ok()?)
}

// "port, port : USERID : <ostype> : <user id>"
fn parse_response(response: &str) -> Option<String> {
    let line = response.lines().next()?;
    let mut fields = line.splitn(4, ':');
    let _ports = fields.next()?;
    let kind = fields.next()?.trim();
    if !kind.eq_ignore_ascii_case("USERID") {
        return None;
    }
    let _os = fields.next()?;
    let user = fields.next()?.trim();
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_userid_responses() {
        assert_eq!(
            parse_response("49152, 21 : USERID : UNIX : joe\r\n"),
            Some("joe".to_string())
        );
        assert_eq!(parse_response("49152, 21 : ERROR : NO-USER\r\n"), None);
        assert_eq!(parse_response("garbage"), None);
        assert_eq!(parse_response("1, 2 : USERID : UNIX : \r\n"), None);
    }

    #[tokio::test]
    async fn query_answers_against_a_local_identd() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ident_addr = listener.local_addr().unwrap();

        // A miniature identd: read the request line, answer with a fixed
        // user.
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 128];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(b"0, 0 : USERID : UNIX : tester\r\n").await;
            }
        });

        // `query` dials port 113 on the peer IP, which we cannot bind in a
        // test; exercise the inner protocol against the ephemeral port via
        // the response parser instead, and the timeout path for real.
        let mut stream = TcpStream::connect(ident_addr).await.unwrap();
        stream.write_all(b"1, 2\r\n").await.unwrap();
        let mut response = String::new();
        let mut buf = [0u8; 128];
        let n = stream.read(&mut buf).await.unwrap();
        response.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        assert_eq!(parse_response(&response), Some("tester".to_string()));
    }

    #[tokio::test]
    async fn query_times_out_quietly() {
        // 192.0.2.0/24 is TEST-NET; nothing answers there.
        let peer: SocketAddr = "192.0.2.1:50000".parse().unwrap();
        let local: SocketAddr = "192.0.2.2:21".parse().unwrap();
        let answer = query(peer, local, Duration::from_millis(50)).await;
        assert_eq!(answer, None);
    }
}
