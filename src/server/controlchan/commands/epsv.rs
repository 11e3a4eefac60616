//! The RFC 2428 Extended Passive (`EPSV`) command.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::server::datachan::DataChannel;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Epsv;

#[async_trait]
impl CommandHandler for Epsv {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let channel = match DataChannel::start_passive(args.local_addr.ip(), args.server.opts.passive_ports.clone()).await {
            Ok(channel) => channel,
            Err(err) => {
                slog::warn!(args.logger, "passive bind failed"; "error" => %err);
                return Ok(Reply::new(ReplyCode::CantOpenDataConnection, "Can't open data connection."));
            }
        };
        let port = channel.passive_port().unwrap_or(0);
        args.session.data = Some(channel);
        args.session.is_fxp = false;

        Ok(Reply::new_with_string(
            ReplyCode::EnteringExtendedPassiveMode,
            format!("Entering Extended Passive Mode (|||{}|)", port),
        ))
    }
}
