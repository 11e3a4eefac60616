//! The RFC 3659 `MLSD` command: machine-readable directory listing.

use super::list::{collect_entries, resolve_listing_target, stream_lines};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::Reply;
use crate::vfs;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Mlsd {
    path: Option<String>,
}

impl Mlsd {
    pub fn new(path: Option<String>) -> Mlsd {
        Mlsd { path }
    }
}

#[async_trait]
impl CommandHandler for Mlsd {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = match resolve_listing_target(args, &self.path) {
            Ok(target) => target,
            Err(reply) => return Ok(reply),
        };
        let lines = match collect_entries(args, &target).await {
            Ok(entries) => entries.iter().map(vfs::mlsd_fact_line).collect(),
            Err(reply) => return Ok(reply),
        };
        stream_lines(args, &target, lines).await
    }
}
