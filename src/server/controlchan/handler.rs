//! Common interface for all command handlers.

use super::channel::ControlChannel;
use super::command::Command;
use super::error::ControlChanError;
use super::reply::Reply;
use crate::server::session::Session;
use crate::server::ServerContext;

use async_trait::async_trait;
use std::fmt::Debug;
use std::net::SocketAddr;

/// Arguments passed to a [`CommandHandler`]. Everything lives on the one
/// session task, so handlers get plain mutable borrows; transfer handlers
/// write their preliminary `150` straight into the channel.
pub struct CommandContext<'a> {
    /// The parsed command being handled.
    pub command: Command,
    /// The session's mutable state.
    pub session: &'a mut Session,
    /// The control channel, for mid-command replies and ABOR polling.
    pub chan: &'a mut ControlChannel,
    /// Shared server-wide services.
    pub server: &'a ServerContext,
    /// Per-session logger.
    pub logger: &'a slog::Logger,
    /// Local address of the control connection (PASV binds here).
    pub local_addr: SocketAddr,
}

impl Debug for CommandContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("command", &self.command)
            .field("session", &self.session.id)
            .finish()
    }
}

/// Implemented once per FTP verb.
#[async_trait]
pub trait CommandHandler: Send + Sync + Debug {
    /// Handle the command and produce the final reply. Handlers that drive
    /// a data transfer send intermediate replies through
    /// [`CommandContext::chan`] themselves.
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError>;
}
