//! The transfer core shared by RETR, STOR and APPE: data-channel
//! establishment, FXP classification, the cancellable throttled copy, and
//! credit settlement.

use super::command::{Command, ProtParam};
use super::error::ControlChanError;
use super::handler::CommandContext;
use super::reply::{Reply, ReplyCode};
use crate::notification::FtpEvent;
use crate::policy::credits::{self, TransferFacts};
use crate::policy::{ChargeOutcome, FxpDirection, FxpRequest};
use crate::server::datachan::{self, DataStream, DataTls};
use crate::vfs::path;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Flavor of an inbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// STOR: client to server.
    Store,
    /// APPE: client to server, appending.
    Append,
}

/// Why a transfer ended without completing.
#[derive(Debug)]
pub enum TransferAbort {
    /// The client sent ABOR mid-copy.
    ClientAbort,
    /// The data connection failed.
    Failed(std::io::Error),
}

/// Resolve the announced data channel into a connected stream and apply
/// the FXP policy for passive connections. On policy deny the data
/// connection is dropped and an error reply is returned for the caller to
/// send.
pub async fn connect_data_channel(
    args: &mut CommandContext<'_>,
    section_name: &str,
    virtual_path: &str,
) -> Result<DataStream, Reply> {
    let Some(channel) = args.session.data.take() else {
        return Err(Reply::new(ReplyCode::CantOpenDataConnection, "Use PORT, EPRT, PASV or EPSV first."));
    };
    let was_active = channel.is_active_mode();

    let protect = match (args.session.prot, &args.server.tls_config) {
        (ProtParam::Private, Some(config)) => Some(DataTls {
            server_config: std::sync::Arc::clone(config),
        }),
        _ => None,
    };

    let (stream, peer) = match channel.ensure_connected(protect.as_ref()).await {
        Ok(pair) => pair,
        Err(err) => {
            slog::warn!(args.logger, "data connection failed"; "error" => %err);
            return Err(Reply::new(ReplyCode::CantOpenDataConnection, "Can't open data connection."));
        }
    };

    // FXP classification for passive mode: the connected data peer is
    // compared against the control peer. Active mode was classified (and
    // policy checked) at PORT/EPRT time, before dialing.
    if !was_active && peer.ip() != args.session.peer.ip() {
        args.session.is_fxp = true;
        let account = args.session.account.as_ref();
        let decision = args.server.fxp.evaluate(
            &FxpRequest {
                user: account.map(|a| a.name.as_str()).unwrap_or(""),
                is_admin: account.map(|a| a.is_admin()).unwrap_or(false),
                section: section_name,
                virtual_path,
                direction: FxpDirection::Incoming,
                remote_ip: peer.ip(),
                control_tls: args.session.tls_active,
                data_tls: args.session.prot == ProtParam::Private,
            },
            account
                .map(|a| a.flags.contains(crate::users::AccountFlags::ALLOW_FXP))
                .unwrap_or(false),
        );
        if !decision.allowed {
            let reason = decision.deny_reason.unwrap_or_else(|| "FXP not allowed.".to_string());
            return Err(Reply::new_with_string(ReplyCode::CommandNotImplementedForParameter, reason));
        }
    }

    Ok(stream)
}

/// Outcome of [`copy_with_abort`].
pub enum CopyEnd {
    /// Copy ran to completion with this many bytes.
    Done(u64),
    /// Copy was cut short.
    Aborted(TransferAbort),
}

/// Run the throttled copy while keeping one eye on the control channel.
/// An incoming ABOR cancels the copy; any other command is refused with
/// `503` and the copy continues.
pub async fn copy_with_abort<R, W>(
    args: &mut CommandContext<'_>,
    reader: &mut R,
    writer: &mut W,
    max_kbps: u32,
) -> Result<CopyEnd, ControlChanError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copy = datachan::throttled_copy(reader, writer, max_kbps);
    tokio::pin!(copy);
    loop {
        tokio::select! {
            // Drain pending data before reacting to control traffic, so an
            // ABOR cannot outrun bytes already on the wire.
            biased;
            result = &mut copy => {
                return Ok(match result {
                    Ok(bytes) => CopyEnd::Done(bytes),
                    Err(err) => CopyEnd::Aborted(TransferAbort::Failed(err)),
                });
            }
            line = args.chan.next() => {
                match line {
                    Some(Ok(Command::Abor)) => {
                        return Ok(CopyEnd::Aborted(TransferAbort::ClientAbort));
                    }
                    Some(Ok(_)) => {
                        args.chan
                            .send(Reply::new(ReplyCode::BadCommandSequence, "Transfer in progress."))
                            .await?;
                    }
                    Some(Err(_)) | None => {
                        // Control channel died; treat the transfer as lost.
                        return Ok(CopyEnd::Aborted(TransferAbort::Failed(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "control connection closed during transfer",
                        ))));
                    }
                }
            }
        }
    }
}

/// Everything RETR needs before the `150`: resolved paths, length to send
/// and the priced cost.
pub struct RetrPlan {
    /// Normalized virtual path.
    pub virtual_path: String,
    /// Physical file path.
    pub physical_path: PathBuf,
    /// REST offset to seek to.
    pub offset: u64,
    /// Bytes that will be sent.
    pub length: u64,
    /// KB to charge after completion.
    pub cost_kb: u64,
    /// Flat credit adjustment the rule hook asked for.
    pub credit_delta: i64,
    /// Section name used for accounting.
    pub section: String,
}

/// Run the full RETR flow. The preliminary and final replies are written
/// here so the 150/data/226 triple stays contiguous.
pub async fn execute_retr(args: &mut CommandContext<'_>, raw_path: &str) -> Result<Reply, ControlChanError> {
    let plan = match plan_retr(args, raw_path).await {
        Ok(plan) => plan,
        Err(reply) => return Ok(reply),
    };

    if args.session.data.is_none() {
        return Ok(Reply::new(ReplyCode::CantOpenDataConnection, "Use PORT, EPRT, PASV or EPSV first."));
    }
    args.chan
        .send(Reply::new(ReplyCode::FileStatusOkay, "File status okay; about to open data connection."))
        .await?;
    slog::debug!(args.logger, "sending file"; "path" => %plan.virtual_path, "bytes" => plan.length, "offset" => plan.offset);

    let mut stream = match connect_data_channel(args, &plan.section, &plan.virtual_path).await {
        Ok(stream) => stream,
        Err(reply) => {
            args.session.reset_data_channel();
            return Ok(reply);
        }
    };

    let mut file = match tokio::fs::File::open(&plan.physical_path).await {
        Ok(file) => file,
        Err(err) => {
            slog::warn!(args.logger, "RETR open failed"; "path" => %plan.physical_path.display(), "error" => %err);
            let _ = stream.finish().await;
            return Ok(Reply::new(ReplyCode::ConnectionClosed, "Transfer aborted; file unavailable."));
        }
    };
    if plan.offset > 0 {
        if let Err(err) = file.seek(SeekFrom::Start(plan.offset)).await {
            slog::warn!(args.logger, "RETR seek failed"; "error" => %err);
            let _ = stream.finish().await;
            return Ok(Reply::new(ReplyCode::ConnectionClosed, "Transfer aborted; seek failed."));
        }
    }

    let max_kbps = effective_down_kbps(args);
    let end = copy_with_abort(args, &mut file, &mut stream, max_kbps).await?;
    match end {
        CopyEnd::Done(bytes) => {
            let _ = stream.finish().await;
            settle_download(args, &plan, bytes).await;
            Ok(Reply::new(ReplyCode::ClosingDataConnection, "Closing data connection."))
        }
        CopyEnd::Aborted(TransferAbort::ClientAbort) => {
            args.session.note_abort();
            Ok(Reply::new(ReplyCode::ClosingDataConnection, "Abort command successful; transfer cancelled."))
        }
        CopyEnd::Aborted(TransferAbort::Failed(err)) => {
            slog::warn!(args.logger, "RETR data copy failed"; "error" => %err);
            args.session.note_abort();
            Ok(Reply::new(ReplyCode::ConnectionClosed, "Transfer aborted; data connection closed."))
        }
    }
}

async fn plan_retr(args: &mut CommandContext<'_>, raw_path: &str) -> Result<RetrPlan, Reply> {
    if args.session.reputation == crate::server::session::Reputation::Blocked {
        return Err(Reply::new(ReplyCode::FileError, "Session blocked; transfers refused."));
    }
    let virt = path::normalize(&args.session.cwd, raw_path);
    if !args.server.access.evaluate(&virt).can_download {
        return Err(Reply::new(ReplyCode::FileError, "Permission denied."));
    }
    let physical = match args.server.vfs.to_physical(&virt) {
        Ok(physical) => physical,
        Err(err) => return Err(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
    };
    let length = match args.server.vfs.size(&virt).await {
        Ok(length) => length,
        Err(err) => return Err(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
    };
    let offset = args.session.take_rest_offset();
    if offset > length {
        return Err(Reply::new(ReplyCode::FileError, "Restart offset beyond file size."));
    }
    let to_send = length - offset;

    // Balance checks run against the store's current state, so credits
    // granted or taken while the session is online count immediately.
    // Anonymous sessions are not in the store and keep their synthesized
    // record.
    let account = match args.session.account.as_ref() {
        Some(account) => args.server.store.find(&account.name).unwrap_or_else(|| account.clone()),
        None => return Err(Reply::new(ReplyCode::NotLoggedIn, "Please login with USER and PASS.")),
    };
    let mut section = args.server.sections.resolve(&virt).clone();
    let rule = args.server.access.rule_for(&virt);
    let physical_display = physical.to_string_lossy().into_owned();
    let facts = TransferFacts {
        account: &account,
        section: &section,
        rule,
        bytes: to_send,
        is_fxp: args.session.is_fxp,
        virtual_path: &virt,
        physical_path: &physical_display,
    };
    let priced = args.server.credits.price_download(&facts).await;
    if let Some(name) = &priced.section_override {
        if let Some(overridden) = args.server.sections.by_name(name) {
            section = overridden.clone();
        }
    }
    let cost_kb = match priced.outcome {
        ChargeOutcome::NoCharge => 0,
        ChargeOutcome::Charge(cost) => {
            if account.credits_kb < cost {
                return Err(Reply::new(ReplyCode::FileError, "Not enough credits for download."));
            }
            cost
        }
        ChargeOutcome::Denied(reason) => {
            return Err(Reply::script_denied(ReplyCode::FileError, &reason));
        }
    };

    Ok(RetrPlan {
        virtual_path: virt,
        physical_path: physical,
        offset,
        length: to_send,
        cost_kb,
        credit_delta: priced.credit_delta,
        section: section.name,
    })
}

async fn settle_download(args: &mut CommandContext<'_>, plan: &RetrPlan, bytes: u64) {
    let Some(account) = args.session.account.clone() else { return };
    if plan.cost_kb > 0 || plan.credit_delta != 0 {
        let fresh = args.server.store.find(&account.name).unwrap_or_else(|| account.clone());
        let balance = credits::apply_delta(fresh.credits_kb.saturating_sub(plan.cost_kb), plan.credit_delta);
        let updated = fresh.with_credits(balance);
        if let Err(err) = args.server.store.try_update(updated.clone()).await {
            slog::warn!(args.logger, "failed to persist download charge"; "user" => %account.name, "error" => %err);
        } else {
            args.session.account = Some(updated);
        }
    }
    args.server
        .events
        .receive(FtpEvent::Download {
            user: account.name.clone(),
            virtual_path: plan.virtual_path.clone(),
            bytes,
            section: plan.section.clone(),
        })
        .await;
}

/// Run the full STOR/APPE flow.
pub async fn execute_store(args: &mut CommandContext<'_>, raw_path: &str, kind: TransferKind) -> Result<Reply, ControlChanError> {
    if args.session.reputation == crate::server::session::Reputation::Blocked {
        return Ok(Reply::new(ReplyCode::FileError, "Session blocked; transfers refused."));
    }
    let virt = path::normalize(&args.session.cwd, raw_path);
    let parent = path::parent(&virt).to_string();
    if !args.server.access.evaluate(&parent).can_upload {
        return Ok(Reply::new(ReplyCode::FileError, "Permission denied."));
    }
    let physical = match args.server.vfs.to_physical(&virt) {
        Ok(physical) => physical,
        Err(err) => return Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string())),
    };
    // Destination directories are created as needed.
    if let Err(err) = args.server.vfs.make_dirs(&parent).await {
        return Ok(Reply::new_with_string(ReplyCode::FileError, err.to_string()));
    }

    // APPE always ignores (and clears) a pending REST.
    let offset = match kind {
        TransferKind::Append => {
            args.session.rest_offset = None;
            0
        }
        _ => args.session.take_rest_offset(),
    };

    let section = args.server.sections.resolve(&virt).clone();
    if args.session.data.is_none() {
        return Ok(Reply::new(ReplyCode::CantOpenDataConnection, "Use PORT, EPRT, PASV or EPSV first."));
    }

    let mut open_opts = tokio::fs::OpenOptions::new();
    match kind {
        TransferKind::Append => {
            open_opts.append(true).create(true);
        }
        TransferKind::Store if offset > 0 => {
            open_opts.write(true).create(true);
        }
        _ => {
            open_opts.write(true).create(true).truncate(true);
        }
    }
    let mut file = match open_opts.open(&physical).await {
        Ok(file) => file,
        Err(err) => {
            slog::warn!(args.logger, "STOR open failed"; "path" => %physical.display(), "error" => %err);
            args.session.reset_data_channel();
            return Ok(Reply::new(ReplyCode::FileError, "Could not open destination file."));
        }
    };
    if offset > 0 && kind == TransferKind::Store {
        if let Err(err) = file.seek(SeekFrom::Start(offset)).await {
            slog::warn!(args.logger, "STOR seek failed"; "error" => %err);
            args.session.reset_data_channel();
            return Ok(Reply::new(ReplyCode::FileError, "Could not seek to restart offset."));
        }
    }

    args.chan
        .send(Reply::new(ReplyCode::FileStatusOkay, "File status okay; about to open data connection."))
        .await?;

    let mut stream = match connect_data_channel(args, &section.name, &virt).await {
        Ok(stream) => stream,
        Err(reply) => {
            args.session.reset_data_channel();
            return Ok(reply);
        }
    };

    let max_kbps = effective_up_kbps(args);
    let end = copy_with_abort(args, &mut stream, &mut file, max_kbps).await?;
    match end {
        CopyEnd::Done(bytes) => {
            // Uploads are flushed to disk before the 226 goes out.
            if let Err(err) = file.sync_all().await {
                slog::warn!(args.logger, "upload fsync failed"; "error" => %err);
            }
            drop(file);
            settle_upload(args, &virt, &physical, &section.name, bytes).await;
            Ok(Reply::new(ReplyCode::ClosingDataConnection, "Closing data connection."))
        }
        CopyEnd::Aborted(TransferAbort::ClientAbort) => {
            // Bytes received so far stay on disk so the client can REST.
            let _ = file.flush().await;
            args.session.note_abort();
            Ok(Reply::new(ReplyCode::ClosingDataConnection, "Abort command successful; transfer cancelled."))
        }
        CopyEnd::Aborted(TransferAbort::Failed(err)) => {
            let _ = file.flush().await;
            slog::warn!(args.logger, "STOR data copy failed"; "error" => %err);
            args.session.note_abort();
            Ok(Reply::new(ReplyCode::ConnectionClosed, "Transfer aborted; data connection closed."))
        }
    }
}

async fn settle_upload(args: &mut CommandContext<'_>, virt: &str, physical: &std::path::Path, section_name: &str, bytes: u64) {
    let Some(account) = args.session.account.clone() else { return };
    let mut section = match args.server.sections.by_name(section_name) {
        Some(section) => section.clone(),
        None => args.server.sections.resolve(virt).clone(),
    };
    let rule = args.server.access.rule_for(virt);
    let physical_display = physical.to_string_lossy().into_owned();
    let facts = TransferFacts {
        account: &account,
        section: &section,
        rule,
        bytes,
        is_fxp: args.session.is_fxp,
        virtual_path: virt,
        physical_path: &physical_display,
    };
    let priced = args.server.credits.price_upload(&facts).await;
    if let Some(name) = &priced.section_override {
        if let Some(overridden) = args.server.sections.by_name(name) {
            section = overridden.clone();
        }
    }
    // The upload already happened, so a deny here only voids the award.
    let earned = match priced.outcome {
        ChargeOutcome::Charge(earned) => earned,
        ChargeOutcome::NoCharge | ChargeOutcome::Denied(_) => 0,
    };
    if earned > 0 || priced.credit_delta != 0 {
        let fresh = args.server.store.find(&account.name).unwrap_or_else(|| account.clone());
        let balance = credits::apply_delta(fresh.credits_kb.saturating_add(earned), priced.credit_delta);
        let updated = fresh.with_credits(balance);
        if let Err(err) = args.server.store.try_update(updated.clone()).await {
            slog::warn!(args.logger, "failed to persist upload award"; "user" => %account.name, "error" => %err);
        } else {
            args.session.account = Some(updated);
        }
    }

    // Post-upload hooks: zipscript, race tracking, dupe store, event bus.
    // All best-effort; the upload itself already succeeded.
    args.server.zipscript.on_upload(virt, physical).await;
    let release = path::parent(virt).to_string();
    if release != "/" {
        args.server.race.register_upload(&account.name, &release, &section.name, bytes);
    }
    args.server.dupes.record(virt, bytes).await;
    args.server
        .events
        .receive(FtpEvent::Upload {
            user: account.name.clone(),
            virtual_path: virt.to_string(),
            bytes,
            section: section.name.clone(),
        })
        .await;
}

fn effective_down_kbps(args: &CommandContext<'_>) -> u32 {
    if args.session.max_download_kbps > 0 {
        args.session.max_download_kbps
    } else {
        args.session.account.as_ref().map(|a| a.max_download_kbps).unwrap_or(0)
    }
}

fn effective_up_kbps(args: &CommandContext<'_>) -> u32 {
    if args.session.max_upload_kbps > 0 {
        args.session.max_upload_kbps
    } else {
        args.session.account.as_ref().map(|a| a.max_upload_kbps).unwrap_or(0)
    }
}
