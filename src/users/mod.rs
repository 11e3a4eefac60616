//! User accounts and the encrypted, WAL-durable store that holds them.

pub mod crypto;
pub mod store;

pub use store::{AuthError, StoreError, UserStore};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

bitflags! {
    /// Administrative capability flags of an account.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AccountFlags: u32 {
        /// Full administrative rights, implies everything below.
        const ADMIN = 0b0000_0001;
        /// Site operator rights (user management, nukes).
        const SITEOP = 0b0000_0010;
        /// May take part in site-to-site (FXP) transfers.
        const ALLOW_FXP = 0b0000_0100;
        /// May upload.
        const ALLOW_UPLOAD = 0b0000_1000;
        /// May download.
        const ALLOW_DOWNLOAD = 0b0001_0000;
        /// May use active-mode (PORT/EPRT) data connections.
        const ALLOW_ACTIVE = 0b0010_0000;
    }
}

impl Default for AccountFlags {
    fn default() -> Self {
        AccountFlags::ALLOW_UPLOAD | AccountFlags::ALLOW_DOWNLOAD | AccountFlags::ALLOW_ACTIVE
    }
}

/// Ident (RFC 1413) requirements of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentPolicy {
    /// When true, login fails unless the ident answer matches.
    pub require_match: bool,
    /// The ident string that must be returned, if pinned.
    pub required_ident: Option<String>,
}

/// An immutable user record. Mutation happens by rebuilding the record with
/// the `with_*` helpers and writing the copy back through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Login name; unique case-insensitively.
    pub name: String,
    /// Opaque password envelope (`$pbkdf2-sha256$...`).
    pub password: String,
    /// Home directory as a virtual path.
    pub home: String,
    /// Capability flags.
    pub flags: AccountFlags,
    /// Primary group.
    pub primary_group: String,
    /// Secondary groups.
    pub groups: BTreeSet<String>,
    /// Maximum concurrent logins; 0 means unlimited.
    pub max_logins: u32,
    /// Idle timeout in seconds for this account's sessions.
    pub idle_timeout_secs: u64,
    /// Upload throughput cap in KB/s; 0 means unlimited.
    pub max_upload_kbps: u32,
    /// Download throughput cap in KB/s; 0 means unlimited.
    pub max_download_kbps: u32,
    /// Credit balance in KB. Never negative; decrements clamp at 0.
    pub credits_kb: u64,
    /// Optional CIDR mask logins must originate from.
    pub allowed_mask: Option<String>,
    /// Ident requirements.
    pub ident: IdentPolicy,
    /// Raw flag characters, kept verbatim for SITE tooling.
    pub raw_flags: String,
}

/// Default idle timeout: 30 minutes.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

// Raw flag character marking a disabled account.
const FLAG_DISABLED: char = 'X';

impl Account {
    /// A fresh account with the given name and password envelope and
    /// defaulted limits.
    pub fn new(name: &str, password_envelope: &str) -> Account {
        Account {
            name: name.to_string(),
            password: password_envelope.to_string(),
            home: "/".to_string(),
            flags: AccountFlags::default(),
            primary_group: "users".to_string(),
            groups: BTreeSet::new(),
            max_logins: 0,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            max_upload_kbps: 0,
            max_download_kbps: 0,
            credits_kb: 0,
            allowed_mask: None,
            ident: IdentPolicy::default(),
            raw_flags: String::new(),
        }
    }

    /// The `admin:admin` account synthesized for an empty store.
    pub fn default_admin() -> Account {
        let mut account = Account::new("admin", &crypto::hash_password("admin"));
        account.flags = AccountFlags::all();
        account.primary_group = "staff".to_string();
        account
    }

    /// Case-insensitive store key.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Whether this account has administrative rights.
    pub fn is_admin(&self) -> bool {
        self.flags.contains(AccountFlags::ADMIN)
    }

    /// Whether this account has site-operator rights (admins qualify).
    pub fn is_siteop(&self) -> bool {
        self.is_admin() || self.flags.contains(AccountFlags::SITEOP)
    }

    /// A disabled account authenticates but may not log in.
    pub fn is_disabled(&self) -> bool {
        self.raw_flags.contains(FLAG_DISABLED)
    }

    /// Copy with a new credit balance.
    pub fn with_credits(mut self, credits_kb: u64) -> Account {
        self.credits_kb = credits_kb;
        self
    }

    /// Copy with credits increased by `kb`.
    pub fn with_credits_added(self, kb: u64) -> Account {
        let credits = self.credits_kb.saturating_add(kb);
        self.with_credits(credits)
    }

    /// Copy with credits decreased by `kb`, clamped at 0.
    pub fn with_credits_taken(self, kb: u64) -> Account {
        let credits = self.credits_kb.saturating_sub(kb);
        self.with_credits(credits)
    }

    /// Copy with a new password envelope.
    pub fn with_password(mut self, envelope: &str) -> Account {
        self.password = envelope.to_string();
        self
    }

    /// Copy with new capability flags.
    pub fn with_flags(mut self, flags: AccountFlags) -> Account {
        self.flags = flags;
        self
    }

    /// Copy with new raw flag characters.
    pub fn with_raw_flags(mut self, raw: &str) -> Account {
        self.raw_flags = raw.to_string();
        self
    }

    /// Copy with new login/throughput limits.
    pub fn with_limits(mut self, max_logins: u32, up_kbps: u32, down_kbps: u32, idle_secs: u64) -> Account {
        self.max_logins = max_logins;
        self.max_upload_kbps = up_kbps;
        self.max_download_kbps = down_kbps;
        self.idle_timeout_secs = idle_secs;
        self
    }

    /// Copy with a new allowed-IP mask (`None` clears it).
    pub fn with_allowed_mask(mut self, mask: Option<String>) -> Account {
        self.allowed_mask = mask;
        self
    }

    /// Copy with a new ident policy.
    pub fn with_ident(mut self, ident: IdentPolicy) -> Account {
        self.ident = ident;
        self
    }

    /// Copy with membership in `group` toggled.
    pub fn with_group_toggled(mut self, group: &str) -> Account {
        let group = group.to_string();
        if !self.groups.remove(&group) {
            self.groups.insert(group);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn credits_never_underflow() {
        let account = Account::new("alice", "x").with_credits(100);
        let account = account.with_credits_taken(5000);
        assert_eq!(account.credits_kb, 0);
    }

    #[test]
    fn default_admin_has_all_rights() {
        let admin = Account::default_admin();
        assert!(admin.is_admin());
        assert!(admin.is_siteop());
        assert!(crypto::verify_password("admin", &admin.password));
    }

    #[test]
    fn disabled_comes_from_raw_flags() {
        let account = Account::new("bob", "x").with_raw_flags("X");
        assert!(account.is_disabled());
        assert!(!Account::new("bob", "x").is_disabled());
    }

    #[test]
    fn group_toggle_roundtrips() {
        let account = Account::new("carol", "x").with_group_toggled("rippers");
        assert!(account.groups.contains("rippers"));
        let account = account.with_group_toggled("rippers");
        assert!(account.groups.is_empty());
    }
}
