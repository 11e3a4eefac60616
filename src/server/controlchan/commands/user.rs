//! The RFC 959 `USER` command: opens the login sequence.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::server::session::SessionState;
use async_trait::async_trait;

const ANONYMOUS_NAMES: [&str; 2] = ["anonymous", "ftp"];

#[derive(Debug)]
pub struct User {
    username: String,
}

impl User {
    pub fn new(username: String) -> User {
        User { username }
    }

    pub fn is_anonymous(name: &str) -> bool {
        ANONYMOUS_NAMES.iter().any(|n| name.eq_ignore_ascii_case(n))
    }
}

#[async_trait]
impl CommandHandler for User {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        if args.server.opts.require_tls_for_auth && !args.session.tls_active {
            return Ok(Reply::new(ReplyCode::FtpsRequired, "Policy requires TLS before authentication; send AUTH TLS first."));
        }
        if args.session.is_authenticated() {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Already logged in."));
        }

        args.session.pending_user = Some(self.username.clone());
        args.session.state = SessionState::AwaitingPass;

        if Self::is_anonymous(&self.username) {
            if !args.server.opts.allow_anonymous {
                args.session.pending_user = None;
                args.session.state = SessionState::Unauthenticated;
                return Ok(Reply::new(ReplyCode::NotLoggedIn, "Anonymous logins are disabled."));
            }
            return Ok(Reply::new(ReplyCode::NeedPassword, "Anonymous login ok, send your email as password."));
        }
        Ok(Reply::new_with_string(ReplyCode::NeedPassword, format!("Password required for {}.", self.username)))
    }
}
