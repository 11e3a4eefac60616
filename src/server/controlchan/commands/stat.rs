//! The RFC 959 `STAT` command: server status, or a listing over the
//! control channel when given a path.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::{self, path};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Stat {
    path: Option<String>,
}

impl Stat {
    pub fn new(path: Option<String>) -> Stat {
        Stat { path }
    }
}

#[async_trait]
impl CommandHandler for Stat {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        match &self.path {
            None => {
                let lines = vec![
                    "amftpd status:".to_string(),
                    format!(" Connected from {}", args.session.peer),
                    format!(
                        " Logged in as {}",
                        args.session.user_name().unwrap_or("(not logged in)")
                    ),
                    format!(" TLS: {}", if args.session.tls_active { "on" } else { "off" }),
                    format!(" Sessions online: {}", args.server.registry.len()),
                    "End of status".to_string(),
                ];
                Ok(Reply::new_multiline(ReplyCode::SystemStatus, lines))
            }
            Some(raw) => {
                let target = path::normalize(&args.session.cwd, raw);
                if !args.server.access.evaluate(&target).can_list {
                    return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
                }
                match args.server.vfs.list_dir(&target).await {
                    Ok(entries) => {
                        let mut lines = vec![format!("Status of {}:", target)];
                        lines.extend(entries.iter().map(vfs::unix_list_line));
                        lines.push("End of status".to_string());
                        Ok(Reply::new_multiline(ReplyCode::FileStatus, lines))
                    }
                    Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
                }
            }
        }
    }
}
