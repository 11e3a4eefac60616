//! The RFC 2228 `PBSZ` command. Stream protection buffers are meaningless
//! over TLS, so any value is accepted and answered with 0.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Pbsz;

#[async_trait]
impl CommandHandler for Pbsz {
    async fn handle(&self, _args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::CommandOkay, "PBSZ=0 OK."))
    }
}
