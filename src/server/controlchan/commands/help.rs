//! The RFC 959 `HELP` command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn handle(&self, _args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let lines = vec![
            "The following commands are recognized:".to_string(),
            " USER PASS AUTH PBSZ PROT SYST FEAT OPTS NOOP HELP QUIT".to_string(),
            " TYPE STRU MODE PWD  CWD  CDUP PASV EPSV PORT EPRT REST".to_string(),
            " RETR STOR APPE ABOR LIST NLST MLSD MLST STAT ALLO DELE".to_string(),
            " MKD  RMD  RNFR RNTO SIZE MDTM SITE".to_string(),
            "Use SITE HELP for site commands.".to_string(),
        ];
        Ok(Reply::new_multiline(ReplyCode::HelpMessage, lines))
    }
}
