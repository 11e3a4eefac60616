//! The RFC 959 `RMD` command.

use crate::rules::RuleEvent;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Rmd {
    path: String,
}

impl Rmd {
    pub fn new(path: String) -> Rmd {
        Rmd { path }
    }
}

#[async_trait]
impl CommandHandler for Rmd {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = path::normalize(&args.session.cwd, &self.path);
        if let Some(reply) = super::deny_by_user_rule(args, &target, RuleEvent::Delete).await {
            return Ok(reply);
        }
        let parent = path::parent(&target).to_string();
        if !args.server.access.evaluate(&parent).can_upload {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        match args.server.vfs.remove_dir(&target).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "Directory removed.")),
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}
