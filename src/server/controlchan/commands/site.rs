//! The `SITE` command: hands off to the site-command registry.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::Reply;
use crate::server::site;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Site {
    verb: String,
    args: String,
}

impl Site {
    pub fn new(verb: String, args: String) -> Site {
        Site { verb, args }
    }
}

#[async_trait]
impl CommandHandler for Site {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        site::dispatch(args, &self.verb, &self.args).await
    }
}
