//! SITE filesystem-operator handlers: NUKE, WIPE, MOVE, CHMOD.

use super::SiteHandler;
use crate::notification::FtpEvent;
use crate::policy::credits::{ratio_round, scale_round};
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::CommandContext;
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::path;
use async_trait::async_trait;
use chrono::Local;
use std::io::Write;

/// `SITE NUKE <path> [multiplier] <reason...>`.
///
/// The release directory is renamed to `<path>.NUKED`, every racer is
/// charged `round(earned_kb * multiplier)` (clamped at zero), an audit
/// line is appended to the nuke log, and the nuke/race-complete hooks
/// fire.
pub struct Nuke;

#[async_trait]
impl SiteHandler for Nuke {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "NUKE <path> [multiplier] <reason>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let Some(raw_path) = parts.next() else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Usage: SITE NUKE <path> [multiplier] <reason>"));
        };
        let rest: Vec<&str> = parts.collect();
        let release = path::normalize(&args.session.cwd, raw_path);
        let section = args.server.sections.resolve(&release).clone();

        // An explicit numeric multiplier wins over the section's.
        let (multiplier, reason) = match rest.first().and_then(|v| v.parse::<f64>().ok()) {
            Some(m) if m > 0.0 => (m, rest[1..].join(" ")),
            _ => (section.nuke_multiplier.unwrap_or(1.0), rest.join(" ")),
        };
        let reason = if reason.is_empty() { "no reason given".to_string() } else { reason };

        if !args.server.vfs.exists(&release).await {
            return Ok(Reply::new(ReplyCode::FileError, "No such release."));
        }

        // Rename first; a nuke that cannot mark the directory must not
        // charge anyone.
        let mut nuked_path = format!("{}.NUKED", release);
        if args.server.vfs.exists(&nuked_path).await {
            nuked_path = format!("{}.NUKED-{}", release, Local::now().format("%Y%m%d%H%M%S"));
        }
        if let Err(err) = args.server.vfs.rename(&release, &nuked_path).await {
            return Ok(Reply::new_with_string(ReplyCode::FileError, format!("Nuke rename failed: {}", err)));
        }

        // Penalties per racer: what they earned, times the multiplier.
        let race = args.server.race.remove(&release);
        let (ul, dl) = (section.ratio_ul_unit as u64, section.ratio_dl_unit as u64);
        let mut penalties: Vec<String> = Vec::new();
        let mut charged = 0usize;
        if let Some(race) = &race {
            for (user, bytes) in &race.user_bytes {
                let earned_kb = ratio_round(bytes / 1024, dl, ul);
                let penalty_kb = scale_round(earned_kb, multiplier);
                let Some(account) = args.server.store.find(user) else {
                    continue;
                };
                let updated = account.with_credits_taken(penalty_kb);
                let new_balance = updated.credits_kb;
                if let Err(err) = args.server.store.try_update(updated).await {
                    slog::warn!(args.logger, "nuke penalty failed to persist"; "user" => %user, "error" => %err);
                    continue;
                }
                charged += 1;
                penalties.push(format!("{}:{}:-{}=>{}", user, bytes, penalty_kb, new_balance));
            }
        }

        let issuer = args.session.user_name().unwrap_or("?").to_string();
        let (total_bytes, files) = race.as_ref().map(|r| (r.total_bytes, r.file_count)).unwrap_or((0, 0));
        let line = format!(
            "{} | NUKE | {} | {} | {} | {} | {} | {} | penalties={}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            release,
            issuer,
            reason,
            multiplier,
            total_bytes,
            files,
            penalties.join(";"),
        );
        if let Err(err) = append_log(&args.server.opts.nukes_log, &line) {
            slog::warn!(args.logger, "failed to append nuke log"; "error" => %err);
        }

        args.server
            .events
            .receive(FtpEvent::Nuke {
                issuer,
                release: release.clone(),
                reason,
                multiplier,
            })
            .await;
        args.server.events.receive(FtpEvent::RaceComplete { release: release.clone() }).await;

        Ok(Reply::new_with_string(
            ReplyCode::CommandOkay,
            format!("Nuked {} (x{}), {} user(s) penalized.", release, multiplier, charged),
        ))
    }
}

fn append_log(log_path: &std::path::Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    writeln!(file, "{}", line)
}

/// `SITE WIPE <path>` — delete a release without penalties.
pub struct Wipe;

#[async_trait]
impl SiteHandler for Wipe {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "WIPE <path>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let target = arg.trim();
        if target.is_empty() {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Usage: SITE WIPE <path>"));
        }
        let target = path::normalize(&args.session.cwd, target);
        let result = match args.server.vfs.metadata(&target).await {
            Ok(md) if md.is_dir() => args.server.vfs.remove_dir_all(&target).await,
            Ok(_) => args.server.vfs.remove_file(&target).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                if args.server.race.remove(&target).is_some() {
                    args.server.events.receive(FtpEvent::RaceComplete { release: target.clone() }).await;
                }
                Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("Wiped {}.", target)))
            }
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}

/// `SITE MOVE <src> <dst>` — relocate a release between sections.
pub struct Move;

#[async_trait]
impl SiteHandler for Move {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "MOVE <src> <dst>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(src), Some(dst)) = (parts.next(), parts.next()) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Usage: SITE MOVE <src> <dst>"));
        };
        let src = path::normalize(&args.session.cwd, src);
        let dst = path::normalize(&args.session.cwd, dst);
        if args.server.vfs.exists(&dst).await {
            return Ok(Reply::new(ReplyCode::FileError, "Destination already exists."));
        }
        let dst_parent = path::parent(&dst).to_string();
        if let Err(err) = args.server.vfs.make_dirs(&dst_parent).await {
            return Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string()));
        }
        match args.server.vfs.rename(&src, &dst).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("Moved {} to {}.", src, dst))),
            Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        }
    }
}

/// `SITE CHMOD <octal> <path>`.
pub struct Chmod;

#[async_trait]
impl SiteHandler for Chmod {
    fn requires_siteop(&self) -> bool {
        true
    }

    fn help(&self) -> &'static str {
        "CHMOD <octal> <path>"
    }

    async fn execute(&self, args: &mut CommandContext<'_>, arg: &str) -> Result<Reply, ControlChanError> {
        let mut parts = arg.split_whitespace();
        let (Some(mode), Some(raw_path)) = (parts.next(), parts.next()) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Usage: SITE CHMOD <octal> <path>"));
        };
        let Ok(mode) = u32::from_str_radix(mode, 8) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Mode must be octal."));
        };
        let target = path::normalize(&args.session.cwd, raw_path);
        let physical = match args.server.vfs.to_physical(&target) {
            Ok(physical) => physical,
            Err(err) => return Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            match tokio::fs::set_permissions(&physical, std::fs::Permissions::from_mode(mode)).await {
                Ok(()) => Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("Mode of {} set to {:o}.", target, mode))),
                Err(err) => Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (physical, mode);
            Ok(Reply::new(ReplyCode::CommandNotImplemented, "CHMOD is only supported on UNIX hosts."))
        }
    }
}
