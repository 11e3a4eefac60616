//! The RFC 3659 `SIZE` command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Size {
    path: String,
}

impl Size {
    pub fn new(path: String) -> Size {
        Size { path }
    }
}

#[async_trait]
impl CommandHandler for Size {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = path::normalize(&args.session.cwd, &self.path);
        if !args.server.access.evaluate(&target).can_list {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        match args.server.vfs.size(&target).await {
            Ok(size) => Ok(Reply::new_with_string(ReplyCode::FileStatus, size.to_string())),
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}
