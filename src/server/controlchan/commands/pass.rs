//! The RFC 959 `PASS` command and the login pipeline hanging off it.
//!
//! After the password verifies, the checks run in a fixed order: account
//! disabled, allowed-IP mask, ident, group rule hook, user rule hook,
//! ratio login rule. Any of them may refuse the login with its own 530.

use crate::notification::FtpEvent;
use crate::policy::credits;
use crate::rules::{RuleAction, RuleContext, RuleEvent};
use crate::server::controlchan::commands::user::User;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::server::ident;
use crate::server::session::SessionState;
use crate::users::{Account, AccountFlags, AuthError};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Pass {
    password: String,
}

impl Pass {
    pub fn new(password: String) -> Pass {
        Pass { password }
    }
}

#[async_trait]
impl CommandHandler for Pass {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        if args.session.is_authenticated() {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Already logged in."));
        }
        let Some(pending) = args.session.pending_user.take() else {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Send USER first."));
        };

        if User::is_anonymous(&pending) {
            return finish_login(args, anonymous_account(), true).await;
        }

        let account = match args.server.store.try_authenticate(&pending, &self.password) {
            Ok(account) => account,
            Err(err) => {
                args.session.counters.failed_logins += 1;
                args.session.state = SessionState::Unauthenticated;
                if let Some(reason) = args.server.banlist.note_failed_login(args.session.peer.ip()) {
                    slog::info!(args.logger, "auto-banned address"; "peer" => %args.session.peer, "reason" => %reason);
                }
                let message = match err {
                    AuthError::ExceedsConcurrentLimit => "Too many concurrent logins.",
                    AuthError::UnknownUser | AuthError::BadPassword => "Login incorrect.",
                };
                return Ok(Reply::new(ReplyCode::NotLoggedIn, message));
            }
        };

        // From here on every refusal must release the claimed login slot.
        match run_login_pipeline(args, &account).await {
            Ok(account) => finish_login(args, account, false).await,
            Err(reply) => {
                args.server.store.on_logout(&account.name);
                args.session.state = SessionState::Unauthenticated;
                Ok(reply)
            }
        }
    }
}

// The post-verification checks, in spec order. Returns the (possibly
// limit-adjusted) account on success.
async fn run_login_pipeline(args: &mut CommandContext<'_>, account: &Account) -> Result<Account, Reply> {
    if account.is_disabled() {
        return Err(Reply::new(ReplyCode::NotLoggedIn, "Account disabled."));
    }

    if let Some(mask) = &account.allowed_mask {
        let allowed = mask
            .parse::<ipnet::IpNet>()
            .map(|net| net.contains(&args.session.peer.ip()))
            .or_else(|_| mask.parse::<std::net::IpAddr>().map(|ip| ip == args.session.peer.ip()))
            .unwrap_or(false);
        if !allowed {
            return Err(Reply::new(ReplyCode::NotLoggedIn, "Login not allowed from your address."));
        }
    }

    // Ident: failures are non-fatal unless the account requires a match.
    if args.server.opts.ident_enabled || account.ident.require_match {
        let local = args.local_addr;
        args.session.ident_user = ident::query(args.session.peer, local, args.server.opts.ident_timeout).await;
        if account.ident.require_match {
            let answer = args.session.ident_user.as_deref();
            let ok = match (&account.ident.required_ident, answer) {
                (Some(required), Some(answer)) => required == answer,
                (None, Some(_)) => true,
                (_, None) => false,
            };
            if !ok {
                return Err(Reply::new(ReplyCode::NotLoggedIn, "Ident check failed."));
            }
        }
    }

    let ctx = RuleContext::bare(&account.name, &account.primary_group, RuleEvent::Login);
    let group_outcome = args.server.rules.evaluate_group(&ctx).await;
    if group_outcome.action == RuleAction::Deny {
        let reason = group_outcome.deny_reason.unwrap_or_else(|| "Login denied by group rule.".to_string());
        return Err(Reply::script_denied(ReplyCode::NotLoggedIn, &reason));
    }
    let user_outcome = args.server.rules.evaluate_user(&ctx).await;
    if user_outcome.action == RuleAction::Deny {
        let reason = user_outcome.deny_reason.unwrap_or_else(|| "Login denied by user rule.".to_string());
        return Err(Reply::script_denied(ReplyCode::NotLoggedIn, &reason));
    }

    // The ratio login rule: leech-capable accounts with an empty balance
    // can be kept out until they upload elsewhere.
    if args.server.opts.deny_broke_logins
        && account.credits_kb == 0
        && account.flags.contains(AccountFlags::ALLOW_DOWNLOAD)
        && !account.is_siteop()
    {
        return Err(Reply::new(ReplyCode::NotLoggedIn, "No credits left; login refused."));
    }

    // Rule outcomes may tighten the session throughput caps.
    if let Some(limit) = user_outcome.new_upload_limit {
        args.session.max_upload_kbps = limit;
    }
    if let Some(limit) = user_outcome.new_download_limit {
        args.session.max_download_kbps = limit;
    }

    // A login-time credit delta (bonus or penalty) is persisted right
    // away; a store failure keeps the old balance rather than failing the
    // login.
    let mut account = account.clone();
    if let Some(delta) = user_outcome.credit_delta {
        if delta != 0 {
            let adjusted = account.clone().with_credits(credits::apply_delta(account.credits_kb, delta));
            match args.server.store.try_update(adjusted.clone()).await {
                Ok(()) => account = adjusted,
                Err(err) => {
                    slog::warn!(args.logger, "failed to persist login credit delta"; "user" => %account.name, "error" => %err);
                }
            }
        }
    }

    Ok(account)
}

async fn finish_login(args: &mut CommandContext<'_>, account: Account, anonymous: bool) -> Result<Reply, ControlChanError> {
    args.session.cwd = account.home.clone();
    args.session.state = SessionState::Authenticated;
    args.server.registry.set_user(args.session.id, &account.name);
    args.server.banlist.note_successful_login(args.session.peer.ip());
    let name = account.name.clone();
    args.session.account = Some(account);
    if !anonymous {
        slog::info!(args.logger, "login"; "user" => %name);
    } else {
        slog::info!(args.logger, "anonymous login");
    }
    args.server
        .events
        .receive(FtpEvent::Login {
            user: name,
            peer: args.session.peer,
        })
        .await;
    Ok(Reply::new(ReplyCode::UserLoggedIn, "Login successful."))
}

// The synthesized anonymous account: download only, no credits, never
// stored.
fn anonymous_account() -> Account {
    let mut account = Account::new("anonymous", "");
    account.flags = AccountFlags::ALLOW_DOWNLOAD | AccountFlags::ALLOW_ACTIVE;
    account
}
