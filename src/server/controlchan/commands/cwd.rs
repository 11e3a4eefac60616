//! The RFC 959 `CWD` command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Cwd {
    path: String,
}

impl Cwd {
    pub fn new(path: String) -> Cwd {
        Cwd { path }
    }
}

#[async_trait]
impl CommandHandler for Cwd {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = path::normalize(&args.session.cwd, &self.path);
        if !args.server.access.evaluate(&target).can_list {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        match args.server.vfs.metadata(&target).await {
            Ok(md) if md.is_dir() => {
                args.session.cwd = target;
                Ok(Reply::new(ReplyCode::FileActionOkay, "Directory successfully changed."))
            }
            Ok(_) => Ok(Reply::new(ReplyCode::FileError, "Not a directory.")),
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}
