//! The RFC 959 `APPE` command: like STOR but appending, and REST never
//! applies.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::transfer::{self, TransferKind};
use crate::server::controlchan::Reply;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Appe {
    path: String,
}

impl Appe {
    pub fn new(path: String) -> Appe {
        Appe { path }
    }
}

#[async_trait]
impl CommandHandler for Appe {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        transfer::execute_store(args, &self.path, TransferKind::Append).await
    }
}
