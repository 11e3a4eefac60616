//! The RFC 959 `PORT` and RFC 2428 `EPRT` commands: active-mode data
//! connections, with FXP classification before the dial.
//!
//! A target address that differs from the control peer marks the session
//! FXP; the active-mode rule hook and the FXP policy both get a veto
//! before any connection is attempted.

use crate::rules::{RuleAction, RuleContext, RuleEvent};
use crate::server::controlchan::command::ProtParam;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::server::datachan::DataChannel;
use crate::users::AccountFlags;
use crate::policy::{FxpDirection, FxpRequest};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

#[derive(Debug)]
pub struct Port {
    addr: String,
}

impl Port {
    pub fn new(addr: String) -> Port {
        Port { addr }
    }
}

#[derive(Debug)]
pub struct Eprt {
    addr: String,
}

impl Eprt {
    pub fn new(addr: String) -> Eprt {
        Eprt { addr }
    }
}

/// Parse `h1,h2,h3,h4,p1,p2`.
pub fn parse_port_argument(arg: &str) -> Option<SocketAddr> {
    let parts: Vec<u8> = arg.split(',').map(|p| p.trim().parse::<u8>()).collect::<Result<_, _>>().ok()?;
    if parts.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = (u16::from(parts[4]) << 8) | u16::from(parts[5]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Parse `|1|h.h.h.h|port|` / `|2|h::h|port|` with any delimiter byte.
pub fn parse_eprt_argument(arg: &str) -> Option<SocketAddr> {
    let delim = arg.chars().next()?;
    let mut fields = arg.split(delim);
    let _empty = fields.next()?;
    let proto = fields.next()?;
    let host = fields.next()?;
    let port = fields.next()?.parse::<u16>().ok()?;
    let ip = match proto {
        "1" => IpAddr::V4(host.parse::<Ipv4Addr>().ok()?),
        "2" => IpAddr::V6(host.parse::<Ipv6Addr>().ok()?),
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

async fn open_active(args: &mut CommandContext<'_>, target: SocketAddr) -> Result<Reply, ControlChanError> {
    let account = match args.session.account.as_ref() {
        Some(account) => account.clone(),
        None => return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please login with USER and PASS.")),
    };

    let is_fxp = target.ip() != args.session.peer.ip();
    args.session.is_fxp = is_fxp;

    if is_fxp {
        let mut ctx = RuleContext::bare(&account.name, &account.primary_group, RuleEvent::ActiveOpen);
        ctx.is_fxp = true;
        ctx.virtual_path = args.session.cwd.clone();
        let outcome = args.server.rules.evaluate_user(&ctx).await;
        if outcome.action == RuleAction::Deny {
            let reason = outcome.deny_reason.unwrap_or_else(|| "Active connection denied by rule.".to_string());
            return Ok(Reply::script_denied(ReplyCode::CommandNotImplementedForParameter, &reason));
        }

        let section = args.server.sections.resolve(&args.session.cwd);
        let decision = args.server.fxp.evaluate(
            &FxpRequest {
                user: &account.name,
                is_admin: account.is_admin(),
                section: &section.name,
                virtual_path: &args.session.cwd,
                direction: FxpDirection::Outgoing,
                remote_ip: target.ip(),
                control_tls: args.session.tls_active,
                data_tls: args.session.prot == ProtParam::Private,
            },
            account.flags.contains(AccountFlags::ALLOW_FXP),
        );
        if !decision.allowed {
            let reason = decision.deny_reason.unwrap_or_else(|| "FXP not allowed.".to_string());
            return Ok(Reply::new_with_string(ReplyCode::CommandNotImplementedForParameter, reason));
        }
    }

    match DataChannel::set_active(target).await {
        Ok(channel) => {
            args.session.data = Some(channel);
            Ok(Reply::new(ReplyCode::CommandOkay, "PORT command successful."))
        }
        Err(err) => {
            slog::warn!(args.logger, "active dial failed"; "target" => %target, "error" => %err);
            Ok(Reply::new(ReplyCode::CantOpenDataConnection, "Can't open data connection."))
        }
    }
}

#[async_trait]
impl CommandHandler for Port {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let Some(target) = parse_port_argument(&self.addr) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Bad PORT argument."));
        };
        open_active(args, target).await
    }
}

#[async_trait]
impl CommandHandler for Eprt {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let Some(target) = parse_eprt_argument(&self.addr) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Bad EPRT argument."));
        };
        open_active(args, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn port_argument_parses() {
        assert_eq!(
            parse_port_argument("203,0,113,5,10,20"),
            Some("203.0.113.5:2580".parse().unwrap())
        );
        assert_eq!(parse_port_argument("1,2,3"), None);
        assert_eq!(parse_port_argument("256,0,0,1,0,1"), None);
    }

    #[test]
    fn eprt_argument_parses_both_families() {
        assert_eq!(
            parse_eprt_argument("|1|203.0.113.5|2580|"),
            Some("203.0.113.5:2580".parse().unwrap())
        );
        assert_eq!(
            parse_eprt_argument("|2|2001:db8::1|2580|"),
            Some("[2001:db8::1]:2580".parse().unwrap())
        );
        assert_eq!(parse_eprt_argument("|3|x|1|"), None);
        assert_eq!(parse_eprt_argument(""), None);
    }
}
