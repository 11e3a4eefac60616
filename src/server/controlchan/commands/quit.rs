//! The RFC 959 `QUIT` command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::server::session::SessionState;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Quit;

#[async_trait]
impl CommandHandler for Quit {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        args.session.quit_requested = true;
        args.session.state = SessionState::Quitting;
        Ok(Reply::new(ReplyCode::ClosingControlConnection, "Goodbye."))
    }
}
