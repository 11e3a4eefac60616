//! Hook points for external collaborators: the event bus, the zipscript
//! post-processor and the dupe store. The daemon only defines the seams;
//! consumers live outside this crate. A no-op implementation backs every
//! seam by default.

/// No-op implementations of the notification seams.
pub mod nop;

pub use nop::{NopDupeStore, NopListener, NopZipscript};

use async_trait::async_trait;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::path::Path;

/// Events published on the daemon's bus.
#[derive(Debug, Clone)]
pub enum FtpEvent {
    /// A user completed the PASS pipeline.
    Login {
        /// User name.
        user: String,
        /// Control-connection peer.
        peer: SocketAddr,
    },
    /// A session ended.
    Logout {
        /// User name, if the session was authenticated.
        user: Option<String>,
        /// Control-connection peer.
        peer: SocketAddr,
    },
    /// A STOR/APPE completed.
    Upload {
        /// Uploading user.
        user: String,
        /// Normalized virtual path.
        virtual_path: String,
        /// Bytes written.
        bytes: u64,
        /// Section name.
        section: String,
    },
    /// A RETR completed.
    Download {
        /// Downloading user.
        user: String,
        /// Normalized virtual path.
        virtual_path: String,
        /// Bytes sent.
        bytes: u64,
        /// Section name.
        section: String,
    },
    /// A release was nuked.
    Nuke {
        /// Issuing operator.
        issuer: String,
        /// Normalized release path.
        release: String,
        /// Reason text.
        reason: String,
        /// Applied multiplier.
        multiplier: f64,
    },
    /// A race was closed out (nuke or wipe).
    RaceComplete {
        /// Normalized release path.
        release: String,
    },
}

/// Consumer of [`FtpEvent`]s.
#[async_trait]
pub trait EventListener: Send + Sync + Debug {
    /// Receive one event. Implementations must not block the caller for
    /// long; the router publishes inline.
    async fn receive(&self, event: FtpEvent);
}

/// The zipscript post-processing hook, fired after uploads, deletes and
/// renames. Failures are logged and never fail the triggering command.
#[async_trait]
pub trait Zipscript: Send + Sync + Debug {
    /// A file finished uploading.
    async fn on_upload(&self, virtual_path: &str, physical_path: &Path);
    /// A file was removed (or renamed away).
    async fn on_delete(&self, virtual_path: &str);
}

/// The dupe-store hook, fed every completed upload.
#[async_trait]
pub trait DupeStore: Send + Sync + Debug {
    /// Record an uploaded file.
    async fn record(&self, virtual_path: &str, bytes: u64);
}

/// Synthetic listing entries injected on top of real directories.
#[derive(Debug, Clone)]
pub struct VirtualEntry {
    /// Entry name as listed.
    pub name: String,
    /// Whether it renders as a directory.
    pub is_dir: bool,
    /// Advertised size.
    pub size: u64,
}

/// Overlay supplying synthetic entries for a listed directory.
pub trait VirtualFileOverlay: Send + Sync + Debug {
    /// Extra entries for the directory at `virtual_path`.
    fn entries_for(&self, virtual_path: &str) -> Vec<VirtualEntry>;
}

/// An overlay that injects nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopOverlay;

impl VirtualFileOverlay for NopOverlay {
    fn entries_for(&self, _virtual_path: &str) -> Vec<VirtualEntry> {
        Vec::new()
    }
}
