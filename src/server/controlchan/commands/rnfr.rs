//! The RFC 959 `RNFR` command: first half of a rename.

use crate::rules::RuleEvent;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Rnfr {
    path: String,
}

impl Rnfr {
    pub fn new(path: String) -> Rnfr {
        Rnfr { path }
    }
}

#[async_trait]
impl CommandHandler for Rnfr {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let source = path::normalize(&args.session.cwd, &self.path);
        if let Some(reply) = super::deny_by_user_rule(args, &source, RuleEvent::Rename).await {
            return Ok(reply);
        }
        // Renaming away is a write on the source's directory.
        let parent = path::parent(&source).to_string();
        if !args.server.access.evaluate(&parent).can_upload {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        if !args.server.vfs.exists(&source).await {
            return Ok(Reply::new(ReplyCode::FileError, "File not found."));
        }
        args.session.rename_from = Some(source);
        Ok(Reply::new(ReplyCode::FileActionPending, "File exists, ready for destination name."))
    }
}
