use crate::notification::{DupeStore, EventListener, FtpEvent, Zipscript};

use async_trait::async_trait;
use std::path::Path;

/// An event listener that does nothing. Used as the default Null Object in
/// [`ServerBuilder`](crate::server::ServerBuilder).
#[derive(Debug, Clone, Copy, Default)]
pub struct NopListener;

#[async_trait]
impl EventListener for NopListener {
    async fn receive(&self, _: FtpEvent) {}
}

/// A zipscript hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopZipscript;

#[async_trait]
impl Zipscript for NopZipscript {
    async fn on_upload(&self, _: &str, _: &Path) {}

    async fn on_delete(&self, _: &str) {}
}

/// A dupe store that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopDupeStore;

#[async_trait]
impl DupeStore for NopDupeStore {
    async fn record(&self, _: &str, _: u64) {}
}
