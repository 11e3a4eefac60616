//! The programmable SITE command surface.
//!
//! Every subcommand is a handler with its own authorization flags,
//! registered in a dispatch table. A global site-script hook runs before
//! dispatch and may deny, supply its own output, or short-circuit with
//! `SITE_OVERRIDE`.

mod credits;
mod nuke;
mod race;
mod sections;
mod users;
mod who;

use crate::rules::{RuleAction, RuleContext, RuleEvent};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::CommandContext;
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;
use std::collections::HashMap;

/// One SITE subcommand.
#[async_trait]
pub trait SiteHandler: Send + Sync {
    /// Only admins may run this.
    fn requires_admin(&self) -> bool {
        false
    }

    /// Siteops (and admins) may run this.
    fn requires_siteop(&self) -> bool {
        false
    }

    /// One-line usage shown by SITE HELP.
    fn help(&self) -> &'static str;

    /// Run the subcommand.
    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError>;
}

/// The registry of SITE subcommands and their aliases.
pub struct SiteRegistry {
    handlers: HashMap<&'static str, Box<dyn SiteHandler>>,
    aliases: HashMap<&'static str, &'static str>,
}

impl std::fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteRegistry").field("commands", &self.handlers.len()).finish()
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        SiteRegistry::new()
    }
}

impl SiteRegistry {
    /// Build the full registry of mandated handlers.
    pub fn new() -> SiteRegistry {
        let mut handlers: HashMap<&'static str, Box<dyn SiteHandler>> = HashMap::new();
        handlers.insert("WHO", Box::new(who::Who));
        handlers.insert("KILL", Box::new(who::Kill));
        handlers.insert("SECURITY", Box::new(who::Security));
        handlers.insert("USERS", Box::new(users::Users));
        handlers.insert("GROUPS", Box::new(users::Groups));
        handlers.insert("ADDUSER", Box::new(users::AddUser));
        handlers.insert("GADDUSER", Box::new(users::GAddUser));
        handlers.insert("CHGRP", Box::new(users::ChGrp));
        handlers.insert("CHPASS", Box::new(users::ChPass));
        handlers.insert("SETLIMITS", Box::new(users::SetLimits));
        handlers.insert("SETFLAGS", Box::new(users::SetFlags));
        handlers.insert("ADDIP", Box::new(users::AddIp));
        handlers.insert("DELIP", Box::new(users::DelIp));
        handlers.insert("IDENT", Box::new(users::Ident));
        handlers.insert("REQIDENT", Box::new(users::ReqIdent));
        handlers.insert("SHOWUSER", Box::new(users::ShowUser));
        handlers.insert("CREDITS", Box::new(credits::Credits));
        handlers.insert("GIVECRED", Box::new(credits::GiveCred));
        handlers.insert("TAKECRED", Box::new(credits::TakeCred));
        handlers.insert("SECTIONS", Box::new(sections::Sections));
        handlers.insert("DIRFLAGS", Box::new(sections::DirFlags));
        handlers.insert("RACE", Box::new(race::Race));
        handlers.insert("RACESTATS", Box::new(race::RaceStats));
        handlers.insert("LASTRACES", Box::new(race::LastRaces));
        handlers.insert("RACELOG", Box::new(race::RaceLog));
        handlers.insert("NUKE", Box::new(nuke::Nuke));
        handlers.insert("WIPE", Box::new(nuke::Wipe));
        handlers.insert("MOVE", Box::new(nuke::Move));
        handlers.insert("CHMOD", Box::new(nuke::Chmod));

        // Compatibility spellings seen in the wild.
        let mut aliases: HashMap<&'static str, &'static str> = HashMap::new();
        aliases.insert("PASSWD", "CHPASS");
        aliases.insert("USER", "SHOWUSER");
        aliases.insert("UINFO", "SHOWUSER");
        aliases.insert("NUKES", "RACELOG");
        aliases.insert("RANKS", "RACESTATS");
        aliases.insert("NEW", "LASTRACES");

        SiteRegistry { handlers, aliases }
    }

    fn resolve(&self, verb: &str) -> Option<&dyn SiteHandler> {
        let upper = verb.to_uppercase();
        let canonical = self.aliases.get(upper.as_str()).copied().unwrap_or(upper.as_str());
        self.handlers.get(canonical).map(|h| h.as_ref())
    }

    fn help_lines(&self) -> Vec<String> {
        let mut names: Vec<&&str> = self.handlers.keys().collect();
        names.sort();
        names
            .iter()
            .filter_map(|name| self.handlers.get(**name).map(|h| format!(" {:<10} {}", name, h.help())))
            .collect()
    }
}

/// Dispatch `SITE <verb> <arg>` per the protocol rules.
pub async fn dispatch(args: &mut CommandContext<'_>, verb: &str, arg: &str) -> Result<Reply, ControlChanError> {
    if verb.is_empty() {
        return Ok(Reply::new(ReplyCode::CommandSyntaxError, "SITE requires a subcommand."));
    }
    // Detach the server reference so handler borrows don't pin `args`.
    let server: &crate::server::ServerContext = args.server;

    // The global site-script hook sees every SITE command first.
    if let Some(account) = args.session.account.as_ref() {
        let mut ctx = RuleContext::bare(&account.name, &account.primary_group, RuleEvent::Site);
        ctx.virtual_path = format!("{} {}", verb.to_uppercase(), arg);
        let outcome = server.rules.evaluate_site(&ctx).await;
        if outcome.action == RuleAction::Deny {
            let reason = outcome.deny_reason.unwrap_or_else(|| "SITE command denied by rule.".to_string());
            return Ok(Reply::script_denied(ReplyCode::FileError, &reason));
        }
        if outcome.is_site_override() {
            return Ok(Reply::new(ReplyCode::CommandOkay, "OK"));
        }
        if let Some(output) = outcome.site_output {
            let lines: Vec<String> = output.lines().map(str::to_string).collect();
            return Ok(if lines.len() > 1 {
                Reply::new_multiline(ReplyCode::CommandOkay, lines)
            } else {
                Reply::new_with_string(ReplyCode::CommandOkay, output.trim_end().to_string())
            });
        }
    }

    if verb.eq_ignore_ascii_case("HELP") {
        let mut lines = vec!["SITE commands:".to_string()];
        lines.extend(server.site.help_lines());
        lines.push("End".to_string());
        return Ok(Reply::new_multiline(ReplyCode::CommandOkay, lines));
    }

    let Some(handler) = server.site.resolve(verb) else {
        return Ok(Reply::new_with_string(
            ReplyCode::CommandNotImplemented,
            format!("Unknown SITE command '{}'.", verb),
        ));
    };

    let account = args.session.account.as_ref();
    let is_admin = account.map(|a| a.is_admin()).unwrap_or(false);
    let is_siteop = account.map(|a| a.is_siteop()).unwrap_or(false);
    if handler.requires_admin() && !is_admin {
        return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
    }
    if handler.requires_siteop() && !is_siteop {
        return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
    }

    handler.execute(args, arg).await
}

// Shared output helper: a single line or a multi-line 200 block.
pub(crate) fn text_reply(lines: Vec<String>) -> Reply {
    if lines.len() == 1 {
        Reply::new_with_string(ReplyCode::CommandOkay, lines.into_iter().next().unwrap_or_default())
    } else {
        Reply::new_multiline(ReplyCode::CommandOkay, lines)
    }
}

// Format a KB count for humans.
pub(crate) fn fmt_kb(kb: u64) -> String {
    if kb >= 1024 * 1024 {
        format!("{:.1}GB", kb as f64 / (1024.0 * 1024.0))
    } else if kb >= 1024 {
        format!("{:.1}MB", kb as f64 / 1024.0)
    } else {
        format!("{}KB", kb)
    }
}
