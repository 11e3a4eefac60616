//! The RFC 959 `DELE` command. Deletion is a write: it needs upload
//! access at the parent directory.

use crate::rules::{RuleAction, RuleContext, RuleEvent};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Dele {
    path: String,
}

impl Dele {
    pub fn new(path: String) -> Dele {
        Dele { path }
    }
}

#[async_trait]
impl CommandHandler for Dele {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = path::normalize(&args.session.cwd, &self.path);
        if let Some(reply) = super::deny_by_user_rule(args, &target, RuleEvent::Delete).await {
            return Ok(reply);
        }
        let parent = path::parent(&target).to_string();
        if !args.server.access.evaluate(&parent).can_upload {
            return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
        }
        match args.server.vfs.remove_file(&target).await {
            Ok(()) => {
                args.server.zipscript.on_delete(&target).await;
                Ok(Reply::new(ReplyCode::FileActionOkay, "File deleted."))
            }
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}

// Shared by the fs-op handlers: ask the user rule hook for a veto.
pub(super) async fn deny_by_user_rule_impl(
    args: &mut CommandContext<'_>,
    target: &str,
    event: RuleEvent,
) -> Option<Reply> {
    let account = args.session.account.as_ref()?;
    let mut ctx = RuleContext::bare(&account.name, &account.primary_group, event);
    ctx.virtual_path = target.to_string();
    ctx.section = args.server.sections.resolve(target).name.clone();
    let outcome = args.server.rules.evaluate_user(&ctx).await;
    if outcome.action == RuleAction::Deny {
        let reason = outcome.deny_reason.unwrap_or_else(|| "Denied by rule.".to_string());
        Some(Reply::script_denied(ReplyCode::FileError, &reason))
    } else {
        None
    }
}
