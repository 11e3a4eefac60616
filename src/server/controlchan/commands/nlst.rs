//! The RFC 959 `NLST` command: bare names only.

use super::list::{collect_entries, resolve_listing_target, stream_lines};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::Reply;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Nlst {
    path: Option<String>,
}

impl Nlst {
    pub fn new(path: Option<String>) -> Nlst {
        Nlst { path }
    }
}

#[async_trait]
impl CommandHandler for Nlst {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = match resolve_listing_target(args, &self.path) {
            Ok(target) => target,
            Err(reply) => return Ok(reply),
        };
        let lines = match collect_entries(args, &target).await {
            Ok(entries) => entries.into_iter().map(|e| e.name).collect(),
            Err(reply) => return Ok(reply),
        };
        stream_lines(args, &target, lines).await
    }
}
