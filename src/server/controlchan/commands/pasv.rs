//! The RFC 959 Passive (`PASV`) command: bind a listener on the
//! control-side address and tell the client where to connect.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::server::datachan::DataChannel;
use async_trait::async_trait;
use std::net::IpAddr;

#[derive(Debug)]
pub struct Pasv;

#[async_trait]
impl CommandHandler for Pasv {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let IpAddr::V4(ip) = args.local_addr.ip() else {
            return Ok(Reply::new(ReplyCode::CommandNotImplemented, "PASV requires IPv4; use EPSV."));
        };

        let channel = match DataChannel::start_passive(IpAddr::V4(ip), args.server.opts.passive_ports.clone()).await {
            Ok(channel) => channel,
            Err(err) => {
                slog::warn!(args.logger, "passive bind failed"; "error" => %err);
                return Ok(Reply::new(ReplyCode::CantOpenDataConnection, "Can't open data connection."));
            }
        };
        let port = channel.passive_port().unwrap_or(0);
        args.session.data = Some(channel);
        args.session.is_fxp = false;

        let octets = ip.octets();
        let (p1, p2) = (port >> 8, port & 0xff);
        Ok(Reply::new_with_string(
            ReplyCode::EnteringPassiveMode,
            format!(
                "Entering Passive Mode ({},{},{},{},{},{}).",
                octets[0], octets[1], octets[2], octets[3], p1, p2
            ),
        ))
    }
}
