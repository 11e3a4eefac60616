//! Per-connection session state.

use crate::server::datachan::DataChannel;
use crate::server::controlchan::command::ProtParam;
use crate::users::Account;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Control-channel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no USER seen yet.
    Unauthenticated,
    /// USER accepted, waiting for PASS.
    AwaitingPass,
    /// Logged in.
    Authenticated,
    /// QUIT received; the loop drains and closes.
    Quitting,
}

/// Session reputation, lowered by aborted transfers and command flooding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reputation {
    /// Nothing suspicious observed.
    Good,
    /// Repeated aborts or command bursts.
    Suspect,
    /// Transfers are refused for this session.
    Blocked,
}

// Aborts before the session becomes Suspect / Blocked.
const ABORTS_UNTIL_SUSPECT: u32 = 3;
const ABORTS_UNTIL_BLOCKED: u32 = 10;

/// Per-session behavioral counters.
#[derive(Debug, Clone, Default)]
pub struct SessionCounters {
    /// Failed PASS attempts on this connection.
    pub failed_logins: u32,
    /// Transfers cancelled by ABOR or data-channel loss.
    pub aborted_transfers: u32,
    /// Commands seen in the current one-minute window.
    pub commands_this_minute: u32,
    /// Total commands on this connection.
    pub total_commands: u64,
}

/// All mutable state of one control connection. A session lives on exactly
/// one task; nothing here is shared.
#[derive(Debug)]
pub struct Session {
    /// Monotonically assigned session id.
    pub id: u32,
    /// The authenticated account, `None` until PASS succeeds.
    pub account: Option<Account>,
    /// User name offered by USER, pending PASS.
    pub pending_user: Option<String>,
    /// Current virtual working directory.
    pub cwd: String,
    /// Whether the control channel was upgraded to TLS.
    pub tls_active: bool,
    /// Data-channel protection level (PROT).
    pub prot: ProtParam,
    /// Pending REST offset; consumed by the next RETR/STOR.
    pub rest_offset: Option<u64>,
    /// Pending RNFR source (normalized virtual path).
    pub rename_from: Option<String>,
    /// Set by QUIT.
    pub quit_requested: bool,
    /// Timestamp of the last control line.
    pub last_activity: Instant,
    /// Whether the current data connection is site-to-site.
    pub is_fxp: bool,
    /// Session reputation.
    pub reputation: Reputation,
    /// Behavioral counters.
    pub counters: SessionCounters,
    /// Control-connection peer.
    pub peer: SocketAddr,
    /// Answer of the ident query, if one was made.
    pub ident_user: Option<String>,
    /// The announced data channel, if any.
    pub data: Option<DataChannel>,
    /// Lifecycle state.
    pub state: SessionState,
    /// Effective upload cap in KB/s; rule hooks may override the account's.
    pub max_upload_kbps: u32,
    /// Effective download cap in KB/s.
    pub max_download_kbps: u32,

    minute_window_start: Instant,
}

impl Session {
    /// A fresh session for a connection from `peer`.
    pub fn new(id: u32, peer: SocketAddr) -> Session {
        Session {
            id,
            account: None,
            pending_user: None,
            cwd: "/".to_string(),
            tls_active: false,
            prot: ProtParam::Clear,
            rest_offset: None,
            rename_from: None,
            quit_requested: false,
            last_activity: Instant::now(),
            is_fxp: false,
            reputation: Reputation::Good,
            counters: SessionCounters::default(),
            peer,
            ident_user: None,
            data: None,
            state: SessionState::Unauthenticated,
            max_upload_kbps: 0,
            max_download_kbps: 0,
            minute_window_start: Instant::now(),
        }
    }

    /// Record control-channel activity: refreshes the idle clock and the
    /// per-minute command counter.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.counters.total_commands += 1;
        if self.minute_window_start.elapsed() >= Duration::from_secs(60) {
            self.minute_window_start = Instant::now();
            self.counters.commands_this_minute = 0;
        }
        self.counters.commands_this_minute += 1;
    }

    /// Whether PASS completed.
    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }

    /// The idle timeout for this session: the account's if logged in,
    /// otherwise `fallback`.
    pub fn idle_timeout(&self, fallback: Duration) -> Duration {
        match &self.account {
            Some(account) if account.idle_timeout_secs > 0 => Duration::from_secs(account.idle_timeout_secs),
            _ => fallback,
        }
    }

    /// Note an aborted transfer and lower the reputation past thresholds.
    pub fn note_abort(&mut self) {
        self.counters.aborted_transfers += 1;
        if self.counters.aborted_transfers >= ABORTS_UNTIL_BLOCKED {
            self.reputation = Reputation::Blocked;
        } else if self.counters.aborted_transfers >= ABORTS_UNTIL_SUSPECT {
            self.reputation = self.reputation.max(Reputation::Suspect);
        }
    }

    /// Take the pending REST offset; it is scoped to a single data command.
    pub fn take_rest_offset(&mut self) -> u64 {
        self.rest_offset.take().unwrap_or(0)
    }

    /// Tear down any announced data channel.
    pub fn reset_data_channel(&mut self) {
        self.data = None;
        self.is_fxp = false;
    }

    /// Name of the logged-in user, for logging.
    pub fn user_name(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(1, "127.0.0.1:50000".parse().unwrap())
    }

    #[test]
    fn aborts_degrade_reputation() {
        let mut s = session();
        assert_eq!(s.reputation, Reputation::Good);
        for _ in 0..3 {
            s.note_abort();
        }
        assert_eq!(s.reputation, Reputation::Suspect);
        for _ in 0..7 {
            s.note_abort();
        }
        assert_eq!(s.reputation, Reputation::Blocked);
    }

    #[test]
    fn rest_offset_is_single_shot() {
        let mut s = session();
        s.rest_offset = Some(512);
        assert_eq!(s.take_rest_offset(), 512);
        assert_eq!(s.take_rest_offset(), 0);
    }

    #[test]
    fn account_idle_timeout_wins() {
        let mut s = session();
        let fallback = Duration::from_secs(60);
        assert_eq!(s.idle_timeout(fallback), fallback);
        let mut account = crate::users::Account::new("a", "x");
        account.idle_timeout_secs = 5;
        s.account = Some(account);
        assert_eq!(s.idle_timeout(fallback), Duration::from_secs(5));
    }
}
