//! The RFC 2389 `OPTS` command. Only the UTF8 switch is recognized; the
//! daemon always talks UTF-8 anyway.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Opts {
    option: String,
}

impl Opts {
    pub fn new(option: String) -> Opts {
        Opts { option }
    }
}

#[async_trait]
impl CommandHandler for Opts {
    async fn handle(&self, _args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        match self.option.to_uppercase().as_str() {
            "UTF8 ON" | "UTF8 OFF" | "UTF8" => Ok(Reply::new(ReplyCode::CommandOkay, "Always in UTF8 mode.")),
            _ => Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Option not understood.")),
        }
    }
}
