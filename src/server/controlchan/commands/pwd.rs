//! The RFC 959 `PWD` command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Pwd;

#[async_trait]
impl CommandHandler for Pwd {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        Ok(Reply::new_with_string(ReplyCode::PathCreated, format!("\"{}\"", args.session.cwd)))
    }
}
