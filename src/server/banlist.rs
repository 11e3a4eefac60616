//! The server ban list: exact IPs and CIDR ranges, permanent or timed,
//! plus the failed-login tracker that feeds it.
//!
//! Expired entries are swept lazily on lookup and periodically by the
//! scheduler.

use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Ban policy knobs.
#[derive(Debug, Clone)]
pub struct BanPolicy {
    /// Failed PASS attempts from one address before it gets banned.
    pub max_failed_logins: u32,
    /// Window the attempts are counted over.
    pub failure_window: Duration,
    /// Duration of the automatic ban.
    pub auto_ban_duration: Duration,
}

impl Default for BanPolicy {
    fn default() -> Self {
        BanPolicy {
            max_failed_logins: 5,
            failure_window: Duration::from_secs(600),
            auto_ban_duration: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone)]
struct BanEntry {
    reason: String,
    expires_at: Option<Instant>,
}

impl BanEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct FailureEntry {
    attempts: u32,
    window_start: Instant,
}

#[derive(Debug, Default)]
struct BanInner {
    ips: HashMap<IpAddr, BanEntry>,
    nets: Vec<(IpNet, BanEntry)>,
    failures: HashMap<IpAddr, FailureEntry>,
}

/// The ban list. Cheap to share behind an `Arc`; internally one mutex.
#[derive(Debug)]
pub struct BanList {
    inner: Mutex<BanInner>,
    policy: BanPolicy,
}

/// A single ban, for SITE listings.
#[derive(Debug, Clone)]
pub struct BanInfo {
    /// The banned address or range, display form.
    pub target: String,
    /// Why it was banned.
    pub reason: String,
    /// Seconds until expiry; `None` for permanent bans.
    pub expires_in: Option<Duration>,
}

impl BanList {
    /// A ban list with the given policy.
    pub fn new(policy: BanPolicy) -> BanList {
        BanList { inner: Mutex::new(BanInner::default()), policy }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BanInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether `ip` is currently banned; returns the reason if so. Expired
    /// entries encountered along the way are dropped.
    pub fn is_banned(&self, ip: IpAddr) -> Option<String> {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(entry) = inner.ips.get(&ip) {
            if entry.expired(now) {
                inner.ips.remove(&ip);
            } else {
                return Some(entry.reason.clone());
            }
        }
        inner.nets.retain(|(_, entry)| !entry.expired(now));
        inner
            .nets
            .iter()
            .find(|(net, _)| net.contains(&ip))
            .map(|(_, entry)| entry.reason.clone())
    }

    /// Ban a single address. `duration` of `None` is permanent.
    pub fn ban_ip(&self, ip: IpAddr, duration: Option<Duration>, reason: &str) {
        let entry = BanEntry {
            reason: reason.to_string(),
            expires_at: duration.map(|d| Instant::now() + d),
        };
        self.lock().ips.insert(ip, entry);
    }

    /// Ban a CIDR range.
    pub fn ban_net(&self, net: IpNet, duration: Option<Duration>, reason: &str) {
        let entry = BanEntry {
            reason: reason.to_string(),
            expires_at: duration.map(|d| Instant::now() + d),
        };
        let mut inner = self.lock();
        inner.nets.retain(|(existing, _)| *existing != net);
        inner.nets.push((net, entry));
    }

    /// Remove a ban by display form (`ip` or `a.b.c.d/len`). Returns
    /// whether anything was removed.
    pub fn unban(&self, target: &str) -> bool {
        let mut inner = self.lock();
        if let Ok(ip) = target.parse::<IpAddr>() {
            return inner.ips.remove(&ip).is_some();
        }
        if let Ok(net) = target.parse::<IpNet>() {
            let before = inner.nets.len();
            inner.nets.retain(|(existing, _)| *existing != net);
            return inner.nets.len() != before;
        }
        false
    }

    /// Record a failed login from `ip`. When the policy threshold is hit,
    /// the address is auto-banned and the ban reason is returned.
    pub fn note_failed_login(&self, ip: IpAddr) -> Option<String> {
        let now = Instant::now();
        let policy = self.policy.clone();
        let mut inner = self.lock();
        let entry = inner.failures.entry(ip).or_insert(FailureEntry { attempts: 0, window_start: now });
        if now.duration_since(entry.window_start) > policy.failure_window {
            entry.attempts = 0;
            entry.window_start = now;
        }
        entry.attempts += 1;
        if entry.attempts >= policy.max_failed_logins {
            inner.failures.remove(&ip);
            let reason = "too many failed logins".to_string();
            inner.ips.insert(
                ip,
                BanEntry {
                    reason: reason.clone(),
                    expires_at: Some(now + policy.auto_ban_duration),
                },
            );
            Some(reason)
        } else {
            None
        }
    }

    /// Clear the failure counter after a successful login.
    pub fn note_successful_login(&self, ip: IpAddr) {
        self.lock().failures.remove(&ip);
    }

    /// Drop expired bans and stale failure windows. Returns how many ban
    /// entries were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.policy.failure_window;
        let mut inner = self.lock();
        let before = inner.ips.len() + inner.nets.len();
        inner.ips.retain(|_, entry| !entry.expired(now));
        inner.nets.retain(|(_, entry)| !entry.expired(now));
        inner.failures.retain(|_, f| now.duration_since(f.window_start) <= window);
        before - (inner.ips.len() + inner.nets.len())
    }

    /// All current bans, for SITE output.
    pub fn list(&self) -> Vec<BanInfo> {
        let now = Instant::now();
        let inner = self.lock();
        let mut out: Vec<BanInfo> = inner
            .ips
            .iter()
            .filter(|(_, e)| !e.expired(now))
            .map(|(ip, e)| BanInfo {
                target: ip.to_string(),
                reason: e.reason.clone(),
                expires_in: e.expires_at.map(|at| at.saturating_duration_since(now)),
            })
            .collect();
        out.extend(inner.nets.iter().filter(|(_, e)| !e.expired(now)).map(|(net, e)| BanInfo {
            target: net.to_string(),
            reason: e.reason.clone(),
            expires_in: e.expires_at.map(|at| at.saturating_duration_since(now)),
        }));
        out.sort_by(|a, b| a.target.cmp(&b.target));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn exact_and_cidr_bans_match() {
        let bans = BanList::new(BanPolicy::default());
        bans.ban_ip(ip("203.0.113.7"), None, "manual");
        bans.ban_net("198.51.100.0/24".parse().unwrap(), None, "range");
        assert_eq!(bans.is_banned(ip("203.0.113.7")).as_deref(), Some("manual"));
        assert_eq!(bans.is_banned(ip("198.51.100.200")).as_deref(), Some("range"));
        assert!(bans.is_banned(ip("192.0.2.1")).is_none());
    }

    #[test]
    fn timed_bans_expire() {
        let bans = BanList::new(BanPolicy::default());
        bans.ban_ip(ip("203.0.113.7"), Some(Duration::from_millis(0)), "blink");
        std::thread::sleep(Duration::from_millis(5));
        assert!(bans.is_banned(ip("203.0.113.7")).is_none());
        assert_eq!(bans.sweep(), 0);
    }

    #[test]
    fn failed_logins_trip_the_threshold() {
        let policy = BanPolicy { max_failed_logins: 3, ..BanPolicy::default() };
        let bans = BanList::new(policy);
        let addr = ip("203.0.113.9");
        assert!(bans.note_failed_login(addr).is_none());
        assert!(bans.note_failed_login(addr).is_none());
        assert!(bans.note_failed_login(addr).is_some());
        assert!(bans.is_banned(addr).is_some());
    }

    #[test]
    fn success_resets_the_counter() {
        let policy = BanPolicy { max_failed_logins: 2, ..BanPolicy::default() };
        let bans = BanList::new(policy);
        let addr = ip("203.0.113.9");
        assert!(bans.note_failed_login(addr).is_none());
        bans.note_successful_login(addr);
        assert!(bans.note_failed_login(addr).is_none());
    }

    #[test]
    fn unban_removes_both_kinds() {
        let bans = BanList::new(BanPolicy::default());
        bans.ban_ip(ip("203.0.113.7"), None, "x");
        bans.ban_net("198.51.100.0/24".parse().unwrap(), None, "y");
        assert!(bans.unban("203.0.113.7"));
        assert!(bans.unban("198.51.100.0/24"));
        assert!(!bans.unban("203.0.113.7"));
        assert!(bans.list().is_empty());
    }
}
