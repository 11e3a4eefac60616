//! The RFC 959 `TYPE` command. Transfers are binary no matter what; A and
//! I are acknowledged, anything else refused. No content translation ever
//! happens.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Type {
    spec: String,
}

impl Type {
    pub fn new(spec: String) -> Type {
        Type { spec }
    }
}

#[async_trait]
impl CommandHandler for Type {
    async fn handle(&self, _args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        match self.spec.as_str() {
            "I" | "L8" => Ok(Reply::new(ReplyCode::CommandOkay, "Type set to I.")),
            "A" | "A N" => Ok(Reply::new(ReplyCode::CommandOkay, "Type set to A.")),
            _ => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only types A and I are supported.")),
        }
    }
}
