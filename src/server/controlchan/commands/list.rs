//! The RFC 959 `LIST` command, plus the line-streaming helper shared by
//! NLST and MLSD.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::transfer::{connect_data_channel, copy_with_abort, CopyEnd, TransferAbort};
use crate::server::controlchan::{Reply, ReplyCode};
use crate::vfs::{self, path};
use async_trait::async_trait;

#[derive(Debug)]
pub struct List {
    path: Option<String>,
}

impl List {
    pub fn new(path: Option<String>) -> List {
        List { path }
    }
}

/// Resolve the listing target: access check plus normalization. Returns an
/// error reply on refusal.
pub(super) fn resolve_listing_target(args: &CommandContext<'_>, raw: &Option<String>) -> Result<String, Reply> {
    let target = match raw {
        Some(raw) => path::normalize(&args.session.cwd, raw),
        None => args.session.cwd.clone(),
    };
    if !args.server.access.evaluate(&target).can_list {
        return Err(Reply::new(ReplyCode::FileError, "Permission denied."));
    }
    Ok(target)
}

/// Open the data channel, send `lines` (UTF-8, CRLF terminated), close and
/// produce the `226`. Shared by all listing commands.
pub(super) async fn stream_lines(
    args: &mut CommandContext<'_>,
    target: &str,
    lines: Vec<String>,
) -> Result<Reply, ControlChanError> {
    let section = args.server.sections.resolve(target).name.clone();
    if args.session.data.is_none() {
        return Ok(Reply::new(ReplyCode::CantOpenDataConnection, "Use PORT, EPRT, PASV or EPSV first."));
    }
    args.chan
        .send(Reply::new(ReplyCode::FileStatusOkay, "File status okay; about to open data connection."))
        .await?;

    let mut stream = match connect_data_channel(args, &section, target).await {
        Ok(stream) => stream,
        Err(reply) => {
            args.session.reset_data_channel();
            return Ok(reply);
        }
    };

    let payload = {
        let mut out = String::new();
        for line in &lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.into_bytes()
    };

    let mut reader = std::io::Cursor::new(payload);
    let end = copy_with_abort(args, &mut reader, &mut stream, 0).await?;
    match end {
        CopyEnd::Done(_) => {
            let _ = stream.finish().await;
            Ok(Reply::new(ReplyCode::ClosingDataConnection, "Closing data connection."))
        }
        CopyEnd::Aborted(TransferAbort::ClientAbort) => {
            Ok(Reply::new(ReplyCode::ClosingDataConnection, "Abort command successful; transfer cancelled."))
        }
        CopyEnd::Aborted(TransferAbort::Failed(err)) => {
            slog::warn!(args.logger, "listing copy failed"; "error" => %err);
            Ok(Reply::new(ReplyCode::ConnectionClosed, "Transfer aborted; data connection closed."))
        }
    }
}

/// Real entries plus any synthetic overlay entries for `target`.
pub(super) async fn collect_entries(args: &CommandContext<'_>, target: &str) -> Result<Vec<vfs::DirEntry>, Reply> {
    let mut entries = match args.server.vfs.list_dir(target).await {
        Ok(entries) => entries,
        Err(err) => return Err(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
    };
    for synthetic in args.server.overlay.entries_for(target) {
        entries.push(vfs::DirEntry {
            name: synthetic.name,
            is_dir: synthetic.is_dir,
            size: synthetic.size,
            modified: std::time::SystemTime::UNIX_EPOCH,
        });
    }
    Ok(entries)
}

#[async_trait]
impl CommandHandler for List {
    async fn handle(&self, args: &mut CommandContext<'_>) -> Result<Reply, ControlChanError> {
        let target = match resolve_listing_target(args, &self.path) {
            Ok(target) => target,
            Err(reply) => return Ok(reply),
        };
        // Synthetic overlay entries render with fixed permission strings.
        let mut lines: Vec<String> = match args.server.vfs.list_dir(&target).await {
            Ok(entries) => entries.iter().map(vfs::unix_list_line).collect(),
            Err(err) => return Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
        };
        for synthetic in args.server.overlay.entries_for(&target) {
            lines.push(vfs::synthetic_list_line(&synthetic.name, synthetic.is_dir, synthetic.size));
        }
        stream_lines(args, &target, lines).await
    }
}
