//! The RFC 3659 `MLST` command: facts for a single target, over the
//! control channel.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::{self, path};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Mlst {
    path: Option<String>,
}

impl Mlst {
    pub fn new(path: Option<String>) -> Mlst {
        Mlst { path }
    }
}

#[async_trait]
impl CommandHandler for Mlst {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = match &self.path {
            Some(raw) => path::normalize(&args.session.cwd, raw),
            None => args.session.cwd.clone(),
        };
        if !args.server.access.evaluate(&target).can_list {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        match args.server.vfs.stat_entry(&target).await {
            Ok(entry) => {
                let lines = vec![
                    format!("Listing {}", target),
                    format!(" {}", vfs::mlsd_fact_line(&entry)),
                    "End".to_string(),
                ];
                Ok(Reply::new_multiline(ReplyCode::FileActionOkay, lines))
            }
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}
