//! The RFC 2228 `AUTH TLS` command: upgrades the control channel.
//!
//! The `234` goes out in plaintext, then the handshake runs; nothing else
//! may be written in between, and a failed handshake closes the
//! connection.

use crate::server::controlchan::error::{ControlChanError, ControlChanErrorKind};
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::TlsAcceptor;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Auth;

#[async_trait]
impl CommandHandler for Auth {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let Some(config) = args.server.tls_config.as_ref() else {
            return Ok(Reply::new(ReplyCode::CommandNotImplemented, "TLS not configured."));
        };
        if args.session.tls_active {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Control channel already secure."));
        }

        args.chan
            .send(Reply::new(ReplyCode::AuthOkayNoDataNeeded, "AUTH TLS successful."))
            .await?;

        let acceptor = TlsAcceptor::from(Arc::clone(config));
        match args.chan.upgrade_tls(acceptor, HANDSHAKE_TIMEOUT).await {
            Ok(()) => {
                args.session.tls_active = true;
                slog::info!(args.logger, "control channel upgraded to TLS");
                Ok(Reply::none())
            }
            Err(err) => {
                slog::warn!(args.logger, "TLS handshake failed, closing connection"; "error" => %err);
                Err(ControlChanErrorKind::TlsHandshake.into())
            }
        }
    }
}
