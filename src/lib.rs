#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

//! amftpd is a managed FTP(S) daemon for ratio-accounted file
//! distribution sites.
//!
//! It speaks RFC 959/2228/2389/3659 with explicit TLS (AUTH TLS +
//! PBSZ/PROT), classifies and polices FXP (site-to-site) transfers, maps
//! virtual paths onto per-directory access rules and policy sections,
//! charges and awards transfer credits, tracks upload races per release,
//! exposes an extensible SITE command surface, and keeps its users in an
//! encrypted snapshot with a write-ahead log.
//!
//! The library is organized around [`server::ServerBuilder`]: hand it a
//! [`users::UserStore`] and a [`vfs::Vfs`], wire in policy and hooks, and
//! call [`server::Server::listen`]. The `amftpd` binary does exactly that
//! from a JSON configuration file.
//!
//! ```no_run
//! use amftpd::server::ServerBuilder;
//! use amftpd::users::{store::StoreConfig, UserStore};
//! use amftpd::vfs::Vfs;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let logger = slog::Logger::root(slog::Discard, slog::o!());
//!     let store = UserStore::open(
//!         StoreConfig {
//!             path: "amftpd.db".into(),
//!             secret: "change-me".into(),
//!             wal_compact_bytes: 5 * 1024 * 1024,
//!         },
//!         logger,
//!     )
//!     .unwrap();
//!     let vfs = Vfs::new("./site").unwrap();
//!     let server = ServerBuilder::new(store, vfs).greeting("my site").build();
//!     server.listen("127.0.0.1:2121").await.unwrap();
//! }
//! ```

pub mod config;
pub mod notification;
pub mod policy;
pub mod race;
pub mod rules;
pub mod server;
pub mod users;
pub mod vfs;
