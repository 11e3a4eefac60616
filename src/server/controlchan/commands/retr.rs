//! The RFC 959 `RETR` command. The heavy lifting lives in the shared
//! transfer core.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::transfer;
use crate::server::controlchan::Reply;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Retr {
    path: String,
}

impl Retr {
    pub fn new(path: String) -> Retr {
        Retr { path }
    }
}

#[async_trait]
impl CommandHandler for Retr {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        transfer::execute_retr(args, &self.path).await
    }
}
