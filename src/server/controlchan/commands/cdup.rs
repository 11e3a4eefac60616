//! The RFC 959 `CDUP` command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Cdup;

#[async_trait]
impl CommandHandler for Cdup {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = path::parent(&args.session.cwd).to_string();
        if !args.server.access.evaluate(&target).can_list {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        args.session.cwd = target;
        Ok(Reply::new(ReplyCode::FileActionOkay, "Directory successfully changed."))
    }
}
