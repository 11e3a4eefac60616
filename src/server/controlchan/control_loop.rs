//! The per-connection event loop: reads commands, applies the gating
//! rules, dispatches handlers and owns the session's lifecycle.

use super::channel::ControlChannel;
use super::command::Command;
use super::commands;
use super::error::{ControlChanError, ControlChanErrorKind};
use super::handler::CommandContext;
use super::reply::{Reply, ReplyCode};
use crate::notification::FtpEvent;
use crate::rules::{RuleAction, RuleContext, RuleEvent};
use crate::server::session::Session;
use crate::server::{shutdown, ServerContext};
use crate::users::AccountFlags;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Run one control connection to completion.
pub(crate) async fn run(
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    peer: SocketAddr,
    session_id: u32,
    kill: CancellationToken,
    mut shutdown_signal: shutdown::ShutdownSignal,
) {
    let local_addr = match stream.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            slog::warn!(ctx.logger, "no local address on accepted socket"; "error" => %err);
            ctx.registry.unregister(session_id);
            return;
        }
    };
    let logger = ctx.logger.new(slog::o!("session" => session_id, "peer" => peer.to_string()));
    slog::info!(logger, "session started");

    let mut chan = ControlChannel::new(stream);
    let mut session = Session::new(session_id, peer);

    if chan
        .send(Reply::new(ReplyCode::ServiceReady, &ctx.opts.greeting))
        .await
        .is_err()
    {
        teardown(&ctx, &mut session, &logger).await;
        return;
    }

    loop {
        let idle = session.idle_timeout(ctx.opts.idle_timeout);
        tokio::select! {
            incoming = chan.next() => {
                match incoming {
                    None => {
                        slog::info!(logger, "client closed control connection");
                        break;
                    }
                    Some(Err(err)) => {
                        match error_reply(&err) {
                            Some(reply) => {
                                if chan.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            // Control-read I/O errors end the session
                            // silently.
                            None => {
                                slog::info!(logger, "control channel error, closing"; "error" => %err);
                                break;
                            }
                        }
                    }
                    Some(Ok(cmd)) => {
                        session.touch();
                        slog::debug!(logger, "command"; "verb" => cmd.verb());
                        match service_command(&ctx, &mut session, &mut chan, &logger, local_addr, cmd).await {
                            Ok(()) => {}
                            Err(err) => {
                                slog::info!(logger, "session ending"; "error" => %err);
                                break;
                            }
                        }
                        if session.quit_requested {
                            break;
                        }
                    }
                }
            }
            _ = tokio::time::sleep(idle) => {
                let _ = chan.send(Reply::new(ReplyCode::ServiceNotAvailable, "Idle timeout, closing control connection.")).await;
                break;
            }
            _ = kill.cancelled() => {
                let _ = chan.send(Reply::new(ReplyCode::ServiceNotAvailable, "Session terminated by operator.")).await;
                break;
            }
            _ = shutdown_signal.wait() => {
                let _ = chan.send(Reply::new(ReplyCode::ServiceNotAvailable, "Service not available, server shutting down.")).await;
                break;
            }
        }
    }

    chan.shutdown().await;
    teardown(&ctx, &mut session, &logger).await;
}

async fn service_command(
    ctx: &Arc<ServerContext>,
    session: &mut Session,
    chan: &mut ControlChannel,
    logger: &slog::Logger,
    local_addr: SocketAddr,
    cmd: Command,
) -> Result<(), ControlChanError> {
    let reply = match gate(ctx, session, &cmd).await {
        Some(refusal) => refusal,
        None => {
            let handler = commands::handler_for(&cmd);
            let mut args = CommandContext {
                command: cmd,
                session,
                chan,
                server: ctx.as_ref(),
                logger,
                local_addr,
            };
            match handler.handle(&mut args).await {
                Ok(reply) => reply,
                Err(err) => match err.kind() {
                    // Fatal kinds propagate and close the session.
                    ControlChanErrorKind::IoError | ControlChanErrorKind::TlsHandshake | ControlChanErrorKind::IllegalState => {
                        return Err(err);
                    }
                    _ => {
                        slog::warn!(logger, "command failed"; "error" => %err);
                        Reply::new(ReplyCode::LocalError, "Requested action aborted. Local error.")
                    }
                },
            }
        }
    };
    chan.send(reply).await?;
    Ok(())
}

// The pre-dispatch gates of the router: login, group script, static
// account flags. `None` means the command may proceed.
async fn gate(ctx: &Arc<ServerContext>, session: &mut Session, cmd: &Command) -> Option<Reply> {
    if !session.is_authenticated() && !cmd.allowed_before_login() {
        return Some(Reply::new(ReplyCode::NotLoggedIn, "Please login with USER and PASS."));
    }

    if let (Some(account), Some(event)) = (session.account.as_ref(), rule_event_for(cmd)) {
        let mut rule_ctx = RuleContext::bare(&account.name, &account.primary_group, event);
        rule_ctx.virtual_path = session.cwd.clone();
        let outcome = ctx.rules.evaluate_group(&rule_ctx).await;
        if outcome.action == RuleAction::Deny {
            let reason = outcome.deny_reason.unwrap_or_else(|| "Denied by group rule.".to_string());
            return Some(Reply::script_denied(ReplyCode::FileError, &reason));
        }
    }

    if let Some(account) = session.account.as_ref() {
        let missing = match cmd {
            Command::Stor { .. } | Command::Appe { .. } => {
                (!account.flags.contains(AccountFlags::ALLOW_UPLOAD)).then_some("Upload permission denied.")
            }
            Command::Retr { .. } => {
                (!account.flags.contains(AccountFlags::ALLOW_DOWNLOAD)).then_some("Download permission denied.")
            }
            Command::Port { .. } | Command::Eprt { .. } => {
                (!account.flags.contains(AccountFlags::ALLOW_ACTIVE)).then_some("Active mode not permitted.")
            }
            _ => None,
        };
        if let Some(message) = missing {
            return Some(Reply::new(ReplyCode::FileError, message));
        }
    }

    None
}

fn rule_event_for(cmd: &Command) -> Option<RuleEvent> {
    match cmd {
        Command::Retr { .. } => Some(RuleEvent::Retr),
        Command::Stor { .. } => Some(RuleEvent::Stor),
        Command::Appe { .. } => Some(RuleEvent::Appe),
        Command::List { .. } | Command::Nlst { .. } | Command::Mlsd { .. } | Command::Mlst { .. } => Some(RuleEvent::List),
        Command::Dele { .. } | Command::Rmd { .. } => Some(RuleEvent::Delete),
        Command::Rnfr { .. } | Command::Rnto { .. } => Some(RuleEvent::Rename),
        Command::Site { .. } => Some(RuleEvent::Site),
        _ => None,
    }
}

// Errors the client can be told about map to replies; `None` means the
// connection is beyond repair.
fn error_reply(err: &ControlChanError) -> Option<Reply> {
    match err.kind() {
        ControlChanErrorKind::UnknownCommand { command } => Some(Reply::new_with_string(
            ReplyCode::CommandNotImplemented,
            format!("Command '{}' not implemented.", command),
        )),
        ControlChanErrorKind::InvalidCommand => Some(Reply::new(ReplyCode::ParameterSyntaxError, "Invalid command parameters.")),
        ControlChanErrorKind::Utf8Error => Some(Reply::new(ReplyCode::CommandSyntaxError, "Invalid UTF-8 in command.")),
        ControlChanErrorKind::LineTooLong => Some(Reply::new(ReplyCode::CommandSyntaxError, "Command line too long.")),
        _ => None,
    }
}

async fn teardown(ctx: &Arc<ServerContext>, session: &mut Session, logger: &slog::Logger) {
    if let Some(account) = session.account.take() {
        ctx.store.on_logout(&account.name);
        ctx.events
            .receive(FtpEvent::Logout {
                user: Some(account.name),
                peer: session.peer,
            })
            .await;
    } else {
        ctx.events
            .receive(FtpEvent::Logout {
                user: None,
                peer: session.peer,
            })
            .await;
    }
    ctx.registry.unregister(session.id);
    slog::info!(logger, "session ended");
}
