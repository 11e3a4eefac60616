//! The RFC 2389 `FEAT` command: advertises the extension set.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Feat;

#[async_trait]
impl CommandHandler for Feat {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let mut lines = vec!["Extensions supported:".to_string()];
        for feature in [
            "UTF8",
            "EPSV",
            "EPRT",
            "PASV",
            "PBSZ",
            "PROT",
            "SIZE",
            "MDTM",
            "REST STREAM",
            "MLSD",
            "MLST type*;size*;modify*;perm*;",
        ] {
            lines.push(format!(" {}", feature));
        }
        if args.server.tls_config.is_some() {
            lines.push(" AUTH TLS".to_string());
        }
        lines.push("End".to_string());
        Ok(Reply::new_multiline(ReplyCode::SystemStatus, lines))
    }
}
