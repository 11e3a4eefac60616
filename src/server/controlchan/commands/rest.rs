//! The RFC 3659 `REST` command: stores the resume offset for the next
//! RETR or STOR. APPE clears it.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Rest {
    offset: u64,
}

impl Rest {
    pub fn new(offset: u64) -> Rest {
        Rest { offset }
    }
}

#[async_trait]
impl CommandHandler for Rest {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        args.session.rest_offset = Some(self.offset);
        Ok(Reply::new_with_string(
            ReplyCode::FileActionPending,
            format!("Restarting at {}. Send STORE or RETRIEVE.", self.offset),
        ))
    }
}
