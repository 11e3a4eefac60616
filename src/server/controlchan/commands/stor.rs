//! The RFC 959 `STOR` command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::transfer::{self, TransferKind};
use crate::server::controlchan::Reply;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Stor {
    path: String,
}

impl Stor {
    pub fn new(path: String) -> Stor {
        Stor { path }
    }
}

#[async_trait]
impl CommandHandler for Stor {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        transfer::execute_store(args, &self.path, TransferKind::Store).await
    }
}
