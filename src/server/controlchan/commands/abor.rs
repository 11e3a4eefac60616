//! The RFC 959 `ABOR` command outside a transfer: drops any announced
//! data channel. Mid-transfer aborts are caught inside the transfer loop.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Abor;

#[async_trait]
impl CommandHandler for Abor {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        if args.session.data.is_some() {
            args.session.reset_data_channel();
            args.session.note_abort();
        }
        Ok(Reply::new(ReplyCode::ClosingDataConnection, "Abort command successful; transfer cancelled."))
    }
}
