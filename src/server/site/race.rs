//! SITE race-inspection handlers.

use super::{fmt_kb, text_reply, SiteHandler};
use crate::race::RaceSnapshot;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::CommandContext;
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;
use chrono::{DateTime, Local};

fn race_lines(snapshot: &RaceSnapshot) -> Vec<String> {
    let updated: DateTime<Local> = snapshot.updated_at.into();
    let mut lines = vec![format!(
        "{} [{}] {} in {} file(s), last activity {}",
        snapshot.release,
        snapshot.section,
        fmt_kb(snapshot.total_bytes / 1024),
        snapshot.file_count,
        updated.format("%Y-%m-%d %H:%M:%S"),
    )];
    for (position, (user, bytes)) in snapshot.standings().into_iter().enumerate() {
        lines.push(format!(" {:>2}. {:<16} {}", position + 1, user, fmt_kb(bytes / 1024)));
    }
    lines
}

/// `SITE RACE <release>` — one race in detail.
pub struct Race;

#[async_trait]
impl SiteHandler for Race {
    fn help(&self) -> &'static str {
        "RACE <release>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let release = arg.trim();
        if release.is_empty() {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Usage: SITE RACE <release>"));
        }
        match args.server.race.get(release) {
            Some(snapshot) => {
                let mut lines = race_lines(&snapshot);
                lines.push("End".to_string());
                Ok(text_reply(lines))
            }
            None => Ok(Reply::new(ReplyCode::FileError, "No race tracked for that release.")),
        }
    }
}

/// `SITE RACESTATS` — aggregate totals.
pub struct RaceStats;

#[async_trait]
impl SiteHandler for RaceStats {
    fn help(&self) -> &'static str {
        "aggregate race statistics"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, _arg: &str) -> Result<Reply, ControlChanError> {
        let recent = args.server.race.recent(usize::MAX);
        let races = args.server.race.len();
        let total_bytes: u64 = recent.iter().map(|r| r.total_bytes).sum();
        let total_files: u64 = recent.iter().map(|r| r.file_count).sum();

        let mut per_user: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for race in &recent {
            for (user, bytes) in &race.user_bytes {
                *per_user.entry(user.clone()).or_insert(0) += bytes;
            }
        }
        let mut standings: Vec<(String, u64)> = per_user.into_iter().collect();
        standings.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut lines = vec![format!(
            "Race stats: {} tracked race(s), {} in {} file(s)",
            races,
            fmt_kb(total_bytes / 1024),
            total_files
        )];
        for (position, (user, bytes)) in standings.into_iter().take(10).enumerate() {
            lines.push(format!(" {:>2}. {:<16} {}", position + 1, user, fmt_kb(bytes / 1024)));
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}

/// `SITE LASTRACES [n]` — most recently touched releases.
pub struct LastRaces;

#[async_trait]
impl SiteHandler for LastRaces {
    fn help(&self) -> &'static str {
        "LASTRACES [count]"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let max = arg.trim().parse::<usize>().unwrap_or(10);
        let mut lines = vec!["Recent races:".to_string()];
        for snapshot in args.server.race.recent(max) {
            lines.push(format!(
                " {} [{}] {} by {} uploader(s)",
                snapshot.release,
                snapshot.section,
                fmt_kb(snapshot.total_bytes / 1024),
                snapshot.user_bytes.len(),
            ));
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}

/// `SITE RACELOG [n]` — tail of the nuke/race audit log.
pub struct RaceLog;

#[async_trait]
impl SiteHandler for RaceLog {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "RACELOG [count]"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let count = arg.trim().parse::<usize>().unwrap_or(10).min(100);
        let content = tokio::fs::read_to_string(&args.server.opts.nukes_log).await.unwrap_or_default();
        let mut lines = vec!["Race log:".to_string()];
        let tail: Vec<&str> = content.lines().rev().take(count).collect();
        for line in tail.iter().rev() {
            lines.push(format!(" {}", line));
        }
        if lines.len() == 1 {
            lines.push(" (empty)".to_string());
        }
        lines.push("End".to_string());
        Ok(text_reply(lines))
    }
}
