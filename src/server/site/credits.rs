//! SITE credit handlers.

use super::{fmt_kb, SiteHandler};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::CommandContext;
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

/// `SITE CREDITS [name]` — show a balance; plain users see their own.
pub struct Credits;

#[async_trait]
impl SiteHandler for Credits {
    fn help(&self) -> &'static str {
        "CREDITS [name]"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let own = args.session.account.clone();
        let target = arg.trim();
        let account = if target.is_empty() {
            own.clone()
        } else {
            let allowed = own.as_ref().map(|a| a.is_siteop() || a.name.eq_ignore_ascii_case(target)).unwrap_or(false);
            if !allowed {
                return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
            }
            args.server.store.find(target)
        };
        match account {
            Some(account) => Ok(Reply::new_with_string(
                ReplyCode::CommandOkay,
                format!("Credits for {}: {} ({} KB)", account.name, fmt_kb(account.credits_kb), account.credits_kb),
            )),
            None => Ok(Reply::new(ReplyCode::FileError, "No such user.")),
        }
    }
}

async fn adjust(args: &mut CommandContext<'_>, arg: &str, give: bool) -> Result<Reply, ControlChanError> {
    let mut parts = arg.split_whitespace();
    let (Some(name), Some(amount)) = (parts.next(), parts.next()) else {
        return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Usage: SITE GIVECRED|TAKECRED <name> <kb>"));
    };
    let Ok(kb) = amount.parse::<u64>() else {
        return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Amount must be a KB count."));
    };
    let Some(account) = args.server.store.find(name) else {
        return Ok(Reply::new_with_string(ReplyCode::FileError, format!("No such user '{}'.", name)));
    };
    let updated = if give {
        account.with_credits_added(kb)
    } else {
        account.with_credits_taken(kb)
    };
    let balance = updated.credits_kb;
    match args.server.store.try_update(updated).await {
        Ok(()) => Ok(Reply::new_with_string(
            ReplyCode::CommandOkay,
            format!(
                "{} {} {} '{}'; balance now {}.",
                if give { "Gave" } else { "Took" },
                fmt_kb(kb),
                if give { "to" } else { "from" },
                name,
                fmt_kb(balance)
            ),
        )),
        Err(err) => Ok(Reply::new_with_string(ReplyCode::LocalError, format!("User store error: {}", err))),
    }
}

/// `SITE GIVECRED <name> <kb>`.
pub struct GiveCred;

#[async_trait]
impl SiteHandler for GiveCred {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "GIVECRED <name> <kb>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        adjust(args, arg, true).await
    }
}

/// `SITE TAKECRED <name> <kb>` — clamps at zero.
pub struct TakeCred;

#[async_trait]
impl SiteHandler for TakeCred {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "TAKECRED <name> <kb>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        adjust(args, arg, false).await
    }
}
