//! The RFC 959 `MKD` command.

use crate::rules::RuleEvent;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Mkd {
    path: String,
}

impl Mkd {
    pub fn new(path: String) -> Mkd {
        Mkd { path }
    }
}

#[async_trait]
impl CommandHandler for Mkd {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = path::normalize(&args.session.cwd, &self.path);
        if let Some(reply) = super::deny_by_user_rule(args, &target, RuleEvent::Stor).await {
            return Ok(reply);
        }
        let parent = path::parent(&target).to_string();
        if !args.server.access.evaluate(&parent).can_upload {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        match args.server.vfs.make_dirs(&target).await {
            Ok(_) => Ok(Reply::new_with_string(ReplyCode::PathCreated, format!("\"{}\"", target))),
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}
