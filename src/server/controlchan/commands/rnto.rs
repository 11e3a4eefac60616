//! The RFC 959 `RNTO` command: completes a rename started by RNFR.
//!
//! The rename also tells the zipscript the old path vanished and the new
//! one appeared; either notification failing does not fail the rename.

use crate::rules::RuleEvent;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Rnto {
    path: String,
}

impl Rnto {
    pub fn new(path: String) -> Rnto {
        Rnto { path }
    }
}

#[async_trait]
impl CommandHandler for Rnto {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let Some(source) = args.session.rename_from.take() else {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Send RNFR first."));
        };
        let dest = path::normalize(&args.session.cwd, &self.path);
        if let Some(reply) = super::deny_by_user_rule(args, &dest, RuleEvent::Rename).await {
            return Ok(reply);
        }
        let parent = path::parent(&dest).to_string();
        if !args.server.access.evaluate(&parent).can_upload {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        if args.server.vfs.exists(&dest).await {
            return Ok(Reply::new(ReplyCode::FileError, "Destination already exists."));
        }
        match args.server.vfs.rename(&source, &dest).await {
            Ok(()) => {
                args.server.zipscript.on_delete(&source).await;
                if let Ok(physical) = args.server.vfs.to_physical(&dest) {
                    args.server.zipscript.on_upload(&dest, &physical).await;
                }
                Ok(Reply::new(ReplyCode::FileActionOkay, "Requested file action okay, completed."))
            }
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}
