//! The RFC 959 `STRU` command; only file structure is supported.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Stru {
    structure: char,
}

impl Stru {
    pub fn new(structure: char) -> Stru {
        Stru { structure }
    }
}

#[async_trait]
impl CommandHandler for Stru {
    async fn handle(&self, _args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        match self.structure {
            'F' => Ok(Reply::new(ReplyCode::CommandOkay, "Structure set to F.")),
            _ => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only structure F is supported.")),
        }
    }
}
