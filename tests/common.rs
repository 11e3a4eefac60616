#![allow(dead_code)]

//! Shared plumbing for the protocol tests: a server launcher and a tiny
//! line-oriented FTP test client.

use amftpd::race::RaceEngine;
use amftpd::server::ServerBuilder;
use amftpd::users::crypto::hash_password;
use amftpd::users::store::StoreConfig;
use amftpd::users::{Account, UserStore};
use amftpd::vfs::Vfs;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct TestSite {
    pub root: PathBuf,
    pub store: Arc<UserStore>,
    pub race: Arc<RaceEngine>,
    pub addr: String,
    pub nukes_log: PathBuf,
    // Keeps the temp dirs alive for the duration of the test.
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

/// Start a server on `port` with sane test defaults. Extra configuration
/// goes through the `customize` closure.
pub async fn start_site<F>(port: u16, passive: RangeInclusive<u16>, customize: F) -> TestSite
where
    F: FnOnce(ServerBuilder) -> ServerBuilder,
{
    let site_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    let store = UserStore::open(
        StoreConfig {
            path: db_dir.path().join("users.db"),
            secret: "test".to_string(),
            wal_compact_bytes: 5 * 1024 * 1024,
        },
        discard_logger(),
    )
    .unwrap();

    let mut uploader = Account::new("uploader", &hash_password("up"));
    uploader.credits_kb = 0;
    store.try_add(uploader).await.unwrap();

    let race = Arc::new(RaceEngine::new(100));
    let nukes_log = db_dir.path().join("nukes.log");
    let vfs = Vfs::new(site_dir.path()).unwrap();
    let root = vfs.root().to_path_buf();

    let builder = ServerBuilder::new(Arc::clone(&store), vfs)
        .greeting("amftpd test site")
        .passive_ports(passive)
        .race_engine(Arc::clone(&race))
        .nukes_log(nukes_log.clone())
        .logger(discard_logger());
    let server = customize(builder).build();

    let addr = format!("127.0.0.1:{}", port);
    let listen_addr = addr.clone();
    tokio::spawn(async move {
        let _ = server.listen(&listen_addr).await;
    });
    // Give the accept loop a moment to bind.
    tokio::time::sleep(Duration::from_millis(100)).await;

    TestSite {
        root,
        store,
        race,
        addr,
        nukes_log,
        _dirs: (site_dir, db_dir),
    }
}

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect and consume the 220 banner.
    pub async fn connect(addr: &str) -> TestClient {
        let mut last_err = None;
        for _ in 0..20 {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let (read, write) = stream.into_split();
                    let mut client = TestClient {
                        reader: BufReader::new(read),
                        writer: write,
                    };
                    let banner = client.read_reply().await;
                    assert!(banner.starts_with("220 "), "unexpected banner: {banner}");
                    return client;
                }
                Err(err) => {
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        panic!("could not connect to {}: {:?}", addr, last_err);
    }

    /// Read one full reply; multi-line replies are joined with `\n`.
    pub async fn read_reply(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end().to_string();
        if line.len() >= 4 && line.as_bytes()[3] == b'-' {
            let code = &line[..3].to_string();
            let terminator = format!("{} ", code);
            let mut lines = vec![line];
            loop {
                let mut next = String::new();
                self.reader.read_line(&mut next).await.unwrap();
                let next = next.trim_end().to_string();
                let done = next.starts_with(&terminator);
                lines.push(next);
                if done {
                    break;
                }
            }
            lines.join("\n")
        } else {
            line
        }
    }

    /// Send a command line and read its reply.
    pub async fn cmd(&mut self, line: &str) -> String {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
        self.read_reply().await
    }

    /// Send a command and assert the reply code.
    pub async fn cmd_expect(&mut self, line: &str, code: &str) -> String {
        let reply = self.cmd(line).await;
        assert!(
            reply.starts_with(code),
            "command {:?}: expected {}, got {:?}",
            line,
            code,
            reply
        );
        reply
    }

    /// Log in with USER/PASS.
    pub async fn login(&mut self, user: &str, pass: &str) {
        self.cmd_expect(&format!("USER {}", user), "331").await;
        self.cmd_expect(&format!("PASS {}", pass), "230").await;
    }

    /// Issue PASV and dial the announced port.
    pub async fn open_passive(&mut self) -> TcpStream {
        let reply = self.cmd_expect("PASV", "227").await;
        let addr = parse_pasv_reply(&reply);
        TcpStream::connect(addr).await.unwrap()
    }

    /// Send raw bytes without awaiting a reply (for PASS on quirky flows).
    pub async fn send_line(&mut self, line: &str) {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
    }
}

/// Extract the socket address from a `227 Entering Passive Mode (...)`
/// reply.
pub fn parse_pasv_reply(reply: &str) -> SocketAddr {
    let open = reply.find('(').expect("no paren in PASV reply");
    let close = reply.find(')').expect("no closing paren in PASV reply");
    let parts: Vec<u16> = reply[open + 1..close].split(',').map(|p| p.parse().unwrap()).collect();
    assert_eq!(parts.len(), 6, "bad PASV tuple: {reply}");
    let port = parts[4] * 256 + parts[5];
    format!("{}.{}.{}.{}:{}", parts[0], parts[1], parts[2], parts[3], port)
        .parse()
        .unwrap()
}

/// Drain a data connection to a byte vector.
pub async fn read_all(mut stream: TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

/// Write bytes to a data connection and close it.
pub async fn write_all_and_close(mut stream: TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();
}
