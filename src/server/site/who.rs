//! SITE session-inspection handlers: WHO, KILL, SECURITY.

use super::{text_reply, SiteHandler};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::CommandContext;
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;
use chrono::{DateTime, Local};

/// `SITE WHO` — list live sessions.
pub struct Who;

#[async_trait]
impl SiteHandler for Who {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "list connected sessions"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, _arg: &str) -> Result<Reply, ControlChanError> {
        let mut lines = vec!["Connected sessions:".to_string()];
        for info in args.server.registry.list() {
            let connected: DateTime<Local> = info.connected_at.into();
            lines.push(format!(
                " #{:<5} {:<16} {:<21} since {}",
                info.id,
                info.user.as_deref().unwrap_or("(login)"),
                info.peer,
                connected.format("%H:%M:%S"),
            ));
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}

/// `SITE KILL <session-id|user>` — disconnect sessions.
pub struct Kill;

#[async_trait]
impl SiteHandler for Kill {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "KILL <session-id|user>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let target = arg.trim();
        if target.is_empty() {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Usage: SITE KILL <session-id|user>"));
        }
        let killed = match target.parse::<u32>() {
            Ok(id) => usize::from(args.server.registry.kill_id(id)),
            Err(_) => args.server.registry.kill_user(target),
        };
        if killed == 0 {
            Ok(Reply::new(ReplyCode::FileError, "No matching session."))
        } else {
            Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("Killed {} session(s).", killed)))
        }
    }
}

/// `SITE SECURITY` — session and server security summary.
pub struct Security;

#[async_trait]
impl SiteHandler for Security {
    fn help(&self) -> &'static str {
        "show security state"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, _arg: &str) -> Result<Reply, ControlChanError> {
        let session = &args.session;
        let mut lines = vec![
            "Security:".to_string(),
            format!(" Control TLS: {}", if session.tls_active { "on" } else { "off" }),
            format!(" Data protection: {}", session.prot),
            format!(" Reputation: {:?}", session.reputation),
            format!(
                " Counters: {} failed logins, {} aborts, {} cmds/min, {} total",
                session.counters.failed_logins,
                session.counters.aborted_transfers,
                session.counters.commands_this_minute,
                session.counters.total_commands,
            ),
            format!(" Ident: {}", session.ident_user.as_deref().unwrap_or("-")),
        ];
        if session.account.as_ref().map(|a| a.is_siteop()).unwrap_or(false) {
            let bans = args.server.banlist.list();
            lines.push(format!(" Active bans: {}", bans.len()));
            for ban in bans.iter().take(20) {
                let expiry = ban
                    .expires_in
                    .map(|d| format!("{}s left", d.as_secs()))
                    .unwrap_or_else(|| "permanent".to_string());
                lines.push(format!("  {} ({}) - {}", ban.target, expiry, ban.reason));
            }
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}
