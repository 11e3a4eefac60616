//! SITE section and directory-rule inspection handlers.

use super::{text_reply, SiteHandler};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::CommandContext;
use crate::server::controlchan::Reply;
use crate::vfs::path;
use async_trait::async_trait;

/// `SITE SECTIONS` — list configured sections.
pub struct Sections;

#[async_trait]
impl SiteHandler for Sections {
    fn help(&self) -> &'static str {
        "list sections"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, _arg: &str) -> Result<Reply, ControlChanError> {
        let mut lines = vec!["Sections:".to_string()];
        for section in args.server.sections.all() {
            lines.push(format!(
                " {:<14} {:<20} ratio {}:{}{}{}",
                section.name,
                section.virtual_root,
                section.ratio_ul_unit,
                section.ratio_dl_unit,
                if section.free_leech { " [free]" } else { "" },
                section
                    .nuke_multiplier
                    .map(|m| format!(" nuke x{}", m))
                    .unwrap_or_default(),
            ));
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}

/// `SITE DIRFLAGS [path]` — show the effective access decision and the
/// matched rule for a path.
pub struct DirFlags;

#[async_trait]
impl SiteHandler for DirFlags {
    fn help(&self) -> &'static str {
        "DIRFLAGS [path]"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let target = if arg.trim().is_empty() {
            args.session.cwd.clone()
        } else {
            path::normalize(&args.session.cwd, arg.trim())
        };
        let access = args.server.access.evaluate(&target);
        let section = args.server.sections.resolve(&target);
        let mut lines = vec![
            format!("Flags for {}:", target),
            format!(
                " list={} upload={} download={}",
                access.can_list, access.can_upload, access.can_download
            ),
            format!(" section={} free_leech={}", section.name, section.free_leech),
        ];
        if let Some(rule) = args.server.access.rule_for(&target) {
            lines.push(format!(
                " rule: free={:?} multiply_cost={:?} upload_bonus={:?} ratio={:?}",
                rule.is_free, rule.multiply_cost, rule.upload_bonus, rule.ratio
            ));
        } else {
            lines.push(" rule: none (defaults)".to_string());
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}
