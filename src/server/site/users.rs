//! SITE user-management handlers.

use super::{fmt_kb, text_reply, SiteHandler};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::CommandContext;
use crate::server::controlchan::{Reply, ReplyCode};
use crate::users::{crypto, Account, AccountFlags, IdentPolicy};
use async_trait::async_trait;

fn usage(text: &'static str) -> Reply {
    Reply::new(ReplyCode::ParameterSyntaxError, text)
}

fn not_found(name: &str) -> Reply {
    Reply::new_with_string(ReplyCode::FileError, format!("No such user '{}'.", name))
}

fn store_failed(err: impl std::fmt::Display) -> Reply {
    Reply::new_with_string(ReplyCode::LocalError, format!("User store error: {}", err))
}

/// Map raw flag characters to capability flags. Unknown characters are
/// kept in the raw string but grant nothing.
pub(super) fn flags_from_chars(raw: &str) -> AccountFlags {
    let mut flags = AccountFlags::empty();
    for c in raw.chars() {
        match c.to_ascii_uppercase() {
            'A' => flags |= AccountFlags::ADMIN,
            'O' => flags |= AccountFlags::SITEOP,
            'F' => flags |= AccountFlags::ALLOW_FXP,
            'U' => flags |= AccountFlags::ALLOW_UPLOAD,
            'D' => flags |= AccountFlags::ALLOW_DOWNLOAD,
            'P' => flags |= AccountFlags::ALLOW_ACTIVE,
            _ => {}
        }
    }
    flags
}

fn flags_to_chars(account: &Account) -> String {
    let mut out = String::new();
    let pairs = [
        (AccountFlags::ADMIN, 'A'),
        (AccountFlags::SITEOP, 'O'),
        (AccountFlags::ALLOW_FXP, 'F'),
        (AccountFlags::ALLOW_UPLOAD, 'U'),
        (AccountFlags::ALLOW_DOWNLOAD, 'D'),
        (AccountFlags::ALLOW_ACTIVE, 'P'),
    ];
    for (flag, c) in pairs {
        if account.flags.contains(flag) {
            out.push(c);
        }
    }
    out
}

/// `SITE USERS` — list all accounts.
pub struct Users;

#[async_trait]
impl SiteHandler for Users {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "list all users"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, _arg: &str) -> Result<Reply, ControlChanError> {
        let mut lines = vec!["Users:".to_string()];
        for account in args.server.store.all() {
            lines.push(format!(
                " {:<16} {:<10} {:>10} [{}]",
                account.name,
                account.primary_group,
                fmt_kb(account.credits_kb),
                flags_to_chars(&account),
            ));
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}

/// `SITE GROUPS` — list all groups and member counts.
pub struct Groups;

#[async_trait]
impl SiteHandler for Groups {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "list all groups"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, _arg: &str) -> Result<Reply, ControlChanError> {
        let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
        for account in args.server.store.all() {
            *counts.entry(account.primary_group.clone()).or_insert(0) += 1;
            for group in &account.groups {
                *counts.entry(group.clone()).or_insert(0) += 1;
            }
        }
        let mut lines = vec!["Groups:".to_string()];
        for (group, members) in counts {
            lines.push(format!(" {:<16} {} member(s)", group, members));
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}

/// `SITE ADDUSER <name> <password> [home]`.
pub struct AddUser;

#[async_trait]
impl SiteHandler for AddUser {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "ADDUSER <name> <password> [home]"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(name), Some(password)) = (parts.next(), parts.next()) else {
            return Ok(usage("Usage: SITE ADDUSER <name> <password> [home]"));
        };
        let mut account = Account::new(name, &crypto::hash_password(password));
        if let Some(home) = parts.next() {
            account.home = crate::vfs::path::normalize("/", home);
        }
        match args.server.store.try_add(account).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("User '{}' added.", name))),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE GADDUSER <group> <name> <password>`.
pub struct GAddUser;

#[async_trait]
impl SiteHandler for GAddUser {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "GADDUSER <group> <name> <password>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(group), Some(name), Some(password)) = (parts.next(), parts.next(), parts.next()) else {
            return Ok(usage("Usage: SITE GADDUSER <group> <name> <password>"));
        };
        let mut account = Account::new(name, &crypto::hash_password(password));
        account.primary_group = group.to_string();
        match args.server.store.try_add(account).await {
            Ok(()) => Ok(Reply::new_with_string(
                ReplyCode::CommandOkay,
                format!("User '{}' added to group '{}'.", name, group),
            )),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE CHGRP <name> <group>` — toggle secondary group membership.
pub struct ChGrp;

#[async_trait]
impl SiteHandler for ChGrp {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "CHGRP <name> <group>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(name), Some(group)) = (parts.next(), parts.next()) else {
            return Ok(usage("Usage: SITE CHGRP <name> <group>"));
        };
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let updated = account.with_group_toggled(group);
        let now_member = updated.groups.contains(group);
        match args.server.store.try_update(updated).await {
            Ok(()) => Ok(Reply::new_with_string(
                ReplyCode::CommandOkay,
                format!(
                    "User '{}' {} group '{}'.",
                    name,
                    if now_member { "added to" } else { "removed from" },
                    group
                ),
            )),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE CHPASS <name> <password>`.
pub struct ChPass;

#[async_trait]
impl SiteHandler for ChPass {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "CHPASS <name> <password>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(name), Some(password)) = (parts.next(), parts.next()) else {
            return Ok(usage("Usage: SITE CHPASS <name> <password>"));
        };
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let updated = account.with_password(&crypto::hash_password(password));
        match args.server.store.try_update(updated).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("Password changed for '{}'.", name))),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE SETLIMITS <name> <max_logins> <up_kbps> <down_kbps> [idle_secs]`.
pub struct SetLimits;

#[async_trait]
impl SiteHandler for SetLimits {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "SETLIMITS <name> <logins> <up_kbps> <down_kbps> [idle]"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(name), Some(logins), Some(up), Some(down)) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Ok(usage("Usage: SITE SETLIMITS <name> <logins> <up_kbps> <down_kbps> [idle]"));
        };
        let (Ok(logins), Ok(up), Ok(down)) = (logins.parse::<u32>(), up.parse::<u32>(), down.parse::<u32>()) else {
            return Ok(usage("Limits must be unsigned integers."));
        };
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let idle = parts
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(account.idle_timeout_secs);
        let updated = account.with_limits(logins, up, down, idle);
        match args.server.store.try_update(updated).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("Limits updated for '{}'.", name))),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE SETFLAGS <name> <flags>` — A admin, O siteop, F fxp, U upload,
/// D download, P active, X disabled.
pub struct SetFlags;

#[async_trait]
impl SiteHandler for SetFlags {
    fn requires_admin(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "SETFLAGS <name> <flags>  (A O F U D P X)"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(name), Some(raw)) = (parts.next(), parts.next()) else {
            return Ok(usage("Usage: SITE SETFLAGS <name> <flags>"));
        };
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let updated = account.with_flags(flags_from_chars(raw)).with_raw_flags(raw);
        match args.server.store.try_update(updated).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("Flags for '{}' set to '{}'.", name, raw))),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE ADDIP <name> <mask>`.
pub struct AddIp;

#[async_trait]
impl SiteHandler for AddIp {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "ADDIP <name> <ip-or-cidr>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(name), Some(mask)) = (parts.next(), parts.next()) else {
            return Ok(usage("Usage: SITE ADDIP <name> <ip-or-cidr>"));
        };
        if mask.parse::<ipnet::IpNet>().is_err() && mask.parse::<std::net::IpAddr>().is_err() {
            return Ok(usage("Mask must be an IP or CIDR range."));
        }
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let updated = account.with_allowed_mask(Some(mask.to_string()));
        match args.server.store.try_update(updated).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("IP mask set for '{}'.", name))),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE DELIP <name>`.
pub struct DelIp;

#[async_trait]
impl SiteHandler for DelIp {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "DELIP <name>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let name = arg.trim();
        if name.is_empty() {
            return Ok(usage("Usage: SITE DELIP <name>"));
        }
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let updated = account.with_allowed_mask(None);
        match args.server.store.try_update(updated).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("IP mask cleared for '{}'.", name))),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE IDENT <name> <identstr>` — pin the required ident answer.
pub struct Ident;

#[async_trait]
impl SiteHandler for Ident {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "IDENT <name> <identstr>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(name), Some(ident)) = (parts.next(), parts.next()) else {
            return Ok(usage("Usage: SITE IDENT <name> <identstr>"));
        };
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let policy = IdentPolicy {
            require_match: account.ident.require_match,
            required_ident: Some(ident.to_string()),
        };
        match args.server.store.try_update(account.with_ident(policy)).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("Ident for '{}' set to '{}'.", name, ident))),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE REQIDENT <name> on|off`.
pub struct ReqIdent;

#[async_trait]
impl SiteHandler for ReqIdent {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "REQIDENT <name> on|off"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(name), Some(setting)) = (parts.next(), parts.next()) else {
            return Ok(usage("Usage: SITE REQIDENT <name> on|off"));
        };
        let require = match setting.to_lowercase().as_str() {
            "on" | "1" | "true" => true,
            "off" | "0" | "false" => false,
            _ => return Ok(usage("Setting must be on or off.")),
        };
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let policy = IdentPolicy {
            require_match: require,
            required_ident: account.ident.required_ident.clone(),
        };
        match args.server.store.try_update(account.with_ident(policy)).await {
            Ok(()) => Ok(Reply::new_with_string(
                ReplyCode::CommandOkay,
                format!("Ident requirement for '{}' {}.", name, if require { "enabled" } else { "disabled" }),
            )),
            Err(err) => Ok(store_failed(err)),
        }
    }
}

/// `SITE SHOWUSER <name>`.
pub struct ShowUser;

#[async_trait]
impl SiteHandler for ShowUser {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "SHOWUSER <name>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let name = arg.trim();
        if name.is_empty() {
            return Ok(usage("Usage: SITE SHOWUSER <name>"));
        }
        let Some(account) = args.server.store.find(name) else {
            return Ok(not_found(name));
        };
        let groups: Vec<&str> = account.groups.iter().map(String::as_str).collect();
        let lines = vec![
            format!("User: {}", account.name),
            format!(" Home: {}", account.home),
            format!(" Group: {} (also: {})", account.primary_group, if groups.is_empty() { "-".to_string() } else { groups.join(",") }),
            format!(" Flags: [{}] raw '{}'", flags_to_chars(&account), account.raw_flags),
            format!(" Credits: {}", fmt_kb(account.credits_kb)),
            format!(
                " Limits: {} logins, up {} KB/s, down {} KB/s, idle {}s",
                account.max_logins, account.max_upload_kbps, account.max_download_kbps, account.idle_timeout_secs
            ),
            format!(" Mask: {}", account.allowed_mask.as_deref().unwrap_or("-")),
            format!(
                " Ident: {} (required: {})",
                account.ident.required_ident.as_deref().unwrap_or("-"),
                if account.ident.require_match { "yes" } else { "no" }
            ),
            format!(" Online: {} session(s)", args.server.store.active_logins(&account.name)),
            "End".to_string(),
        ];
        Ok(text_reply(lines))
    }
}
