//! The RFC 959 `MODE` command; only stream mode is supported.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Mode {
    mode: char,
}

impl Mode {
    pub fn new(mode: char) -> Mode {
        Mode { mode }
    }
}

#[async_trait]
impl CommandHandler for Mode {
    async fn handle(&self, _args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        match self.mode {
            'S' => Ok(Reply::new(ReplyCode::CommandOkay, "Mode set to S.")),
            _ => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only stream mode is supported.")),
        }
    }
}
