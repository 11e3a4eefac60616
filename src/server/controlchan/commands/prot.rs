//! The RFC 2228 `PROT` command: selects the data-channel protection
//! level. `P` needs an already-secured control channel and a configured
//! certificate.

use crate::server::controlchan::command::ProtParam;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Prot {
    param: ProtParam,
}

impl Prot {
    pub fn new(param: ProtParam) -> Prot {
        Prot { param }
    }
}

#[async_trait]
impl CommandHandler for Prot {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        match self.param {
            ProtParam::Clear => {
                args.session.prot = ProtParam::Clear;
                Ok(Reply::new(ReplyCode::CommandOkay, "Protection level set to C."))
            }
            ProtParam::Private => {
                if !args.session.tls_active {
                    return Ok(Reply::new(ReplyCode::BadCommandSequence, "PROT P requires a secured control channel."));
                }
                if args.server.tls_config.is_none() {
                    return Ok(Reply::new(ReplyCode::BadCommandSequence, "No server certificate configured."));
                }
                args.session.prot = ProtParam::Private;
                Ok(Reply::new(ReplyCode::CommandOkay, "Protection level set to P."))
            }
        }
    }
}
