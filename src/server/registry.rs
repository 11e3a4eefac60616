//! The shared session registry backing `SITE WHO` and `SITE KILL`.
//!
//! Sessions register on accept and unregister on teardown; killing a
//! session cancels its token, which the session loop observes at its next
//! turn.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

/// A live view of one session, for SITE output.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id.
    pub id: u32,
    /// Logged-in user, if any.
    pub user: Option<String>,
    /// Control-connection peer.
    pub peer: SocketAddr,
    /// When the connection was accepted.
    pub connected_at: SystemTime,
}

#[derive(Debug)]
struct SessionEntry {
    peer: SocketAddr,
    connected_at: SystemTime,
    user: Mutex<Option<String>>,
    kill: CancellationToken,
}

/// The registry: a shared map of weak-ish session handles owned by the
/// server.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<u32, SessionEntry>,
    next_id: AtomicU32,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    /// Allocate the next session id.
    pub fn next_session_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Register a new session and hand back its kill token.
    pub fn register(&self, id: u32, peer: SocketAddr) -> CancellationToken {
        let token = CancellationToken::new();
        self.sessions.insert(
            id,
            SessionEntry {
                peer,
                connected_at: SystemTime::now(),
                user: Mutex::new(None),
                kill: token.clone(),
            },
        );
        token
    }

    /// Attach the user name after a successful login.
    pub fn set_user(&self, id: u32, user: &str) {
        if let Some(entry) = self.sessions.get(&id) {
            if let Ok(mut guard) = entry.user.lock() {
                *guard = Some(user.to_string());
            }
        }
    }

    /// Remove a finished session.
    pub fn unregister(&self, id: u32) {
        self.sessions.remove(&id);
    }

    /// Snapshot of all live sessions, ordered by id.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                id: *entry.key(),
                user: entry.user.lock().ok().and_then(|u| u.clone()),
                peer: entry.peer,
                connected_at: entry.connected_at,
            })
            .collect();
        out.sort_by_key(|info| info.id);
        out
    }

    /// Kill by session id. Returns whether a session was signalled.
    pub fn kill_id(&self, id: u32) -> bool {
        match self.sessions.get(&id) {
            Some(entry) => {
                entry.kill.cancel();
                true
            }
            None => false,
        }
    }

    /// Kill all sessions of `user` (case-insensitive). Returns the count.
    pub fn kill_user(&self, user: &str) -> usize {
        let mut killed = 0;
        for entry in self.sessions.iter() {
            let matches = entry
                .user
                .lock()
                .ok()
                .and_then(|u| u.clone())
                .is_some_and(|u| u.eq_ignore_ascii_case(user));
            if matches {
                entry.kill.cancel();
                killed += 1;
            }
        }
        killed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn register_list_unregister() {
        let registry = SessionRegistry::new();
        let id = registry.next_session_id();
        let _token = registry.register(id, peer());
        registry.set_user(id, "alice");

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user.as_deref(), Some("alice"));

        registry.unregister(id);
        assert!(registry.is_empty());
    }

    #[test]
    fn kill_by_user_cancels_tokens() {
        let registry = SessionRegistry::new();
        let id1 = registry.next_session_id();
        let id2 = registry.next_session_id();
        let t1 = registry.register(id1, peer());
        let t2 = registry.register(id2, peer());
        registry.set_user(id1, "alice");
        registry.set_user(id2, "bob");

        assert_eq!(registry.kill_user("ALICE"), 1);
        assert!(t1.is_cancelled());
        assert!(!t2.is_cancelled());

        assert!(registry.kill_id(id2));
        assert!(t2.is_cancelled());
        assert!(!registry.kill_id(999));
    }

    #[test]
    fn ids_are_monotonic() {
        let registry = SessionRegistry::new();
        let a = registry.next_session_id();
        let b = registry.next_session_id();
        assert!(b > a);
    }
}
