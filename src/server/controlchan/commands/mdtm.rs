//! The RFC 3659 `MDTM` command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug)]
pub struct Mdtm {
    path: String,
}

impl Mdtm {
    pub fn new(path: String) -> Mdtm {
        Mdtm { path }
    }
}

#[async_trait]
impl CommandHandler for Mdtm {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = path::normalize(&args.session.cwd, &self.path);
        if !args.server.access.evaluate(&target).can_list {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        match args.server.vfs.modified(&target).await {
            Ok(modified) => {
                let utc: DateTime<Utc> = modified.into();
                Ok(Reply::new_with_string(ReplyCode::FileStatus, utc.format("%Y%m%d%H%M%S").to_string()))
            }
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}
