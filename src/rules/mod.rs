//! The rule-script host contract.
//!
//! The scripting runtime itself lives outside this crate; the daemon only
//! defines the context it hands to scripts, the outcome shape it expects
//! back, and the protocol-level tokens the router reacts to. Scripts are
//! side-effect-free toward protocol state except through their outcome.

pub mod nop;

pub use nop::NopRules;

use async_trait::async_trait;
use std::fmt::Debug;

/// Message token instructing the router to short-circuit a SITE command
/// with `200 OK`.
pub const SITE_OVERRIDE: &str = "SITE_OVERRIDE";
/// Message token prefix instructing the router to re-route accounting to
/// the named section.
pub const SECTION_OVERRIDE_PREFIX: &str = "SECTION_OVERRIDE::";

/// The protocol event a rule evaluation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEvent {
    /// Download (RETR).
    Retr,
    /// Upload (STOR).
    Stor,
    /// Append (APPE).
    Appe,
    /// Directory listing.
    List,
    /// File or directory removal.
    Delete,
    /// Rename.
    Rename,
    /// A SITE command.
    Site,
    /// Login (PASS pipeline).
    Login,
    /// An active-mode (PORT/EPRT) data connection being opened.
    ActiveOpen,
}

/// The structured context handed to every evaluation entry point.
#[derive(Debug, Clone)]
pub struct RuleContext {
    /// Whether the data connection is site-to-site.
    pub is_fxp: bool,
    /// Section name owning the target.
    pub section: String,
    /// Section free-leech flag.
    pub free_leech: bool,
    /// User name.
    pub user: String,
    /// Primary group of the user.
    pub group: String,
    /// Raw byte count of the transfer, 0 when not applicable.
    pub bytes: u64,
    /// `bytes / 1024`.
    pub kb: u64,
    /// Computed download cost in KB before the hook ran.
    pub cost: u64,
    /// Computed upload award in KB before the hook ran.
    pub earned: u64,
    /// Normalized virtual path.
    pub virtual_path: String,
    /// Mapped physical path.
    pub physical_path: String,
    /// The triggering event.
    pub event: RuleEvent,
}

impl RuleContext {
    /// A minimal context for events that carry no transfer payload.
    pub fn bare(user: &str, group: &str, event: RuleEvent) -> RuleContext {
        RuleContext {
            is_fxp: false,
            section: String::new(),
            free_leech: false,
            user: user.to_string(),
            group: group.to_string(),
            bytes: 0,
            kb: 0,
            cost: 0,
            earned: 0,
            virtual_path: String::new(),
            physical_path: String::new(),
            event,
        }
    }
}

/// Verdict of a rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleAction {
    /// Let the operation proceed.
    #[default]
    Allow,
    /// Refuse the operation.
    Deny,
}

/// Everything a rule may hand back to the router.
#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
    /// Allow or deny.
    pub action: RuleAction,
    /// Reason shown to the client on deny.
    pub deny_reason: Option<String>,
    /// Free-form message; `SITE_OVERRIDE` and `SECTION_OVERRIDE::<NAME>`
    /// are interpreted by the router.
    pub message: Option<String>,
    /// Replacement upload throughput limit in KB/s.
    pub new_upload_limit: Option<u32>,
    /// Replacement download throughput limit in KB/s.
    pub new_download_limit: Option<u32>,
    /// Credit adjustment in KB applied after the operation.
    pub credit_delta: Option<i64>,
    /// Replacement download cost in KB.
    pub cost_download: Option<u64>,
    /// Replacement upload award in KB.
    pub earned_upload: Option<u64>,
    /// Text emitted as the 200 body of a SITE command.
    pub site_output: Option<String>,
}

impl RuleOutcome {
    /// An outcome denying the operation with `reason`.
    pub fn deny(reason: &str) -> RuleOutcome {
        RuleOutcome {
            action: RuleAction::Deny,
            deny_reason: Some(reason.to_string()),
            ..RuleOutcome::default()
        }
    }

    /// Whether the outcome requests the SITE short-circuit.
    pub fn is_site_override(&self) -> bool {
        self.message.as_deref() == Some(SITE_OVERRIDE)
    }

    /// The section override target, if the message carries one.
    pub fn section_override(&self) -> Option<&str> {
        self.message.as_deref().and_then(|m| m.strip_prefix(SECTION_OVERRIDE_PREFIX))
    }
}

/// The opaque evaluation engine. Any scripting runtime (or a built-in rule
/// interpreter) can sit behind this.
#[async_trait]
pub trait RuleEngine: Send + Sync + Debug {
    /// Evaluate a download about to start.
    async fn evaluate_download(&self, ctx: &RuleContext) -> RuleOutcome;
    /// Evaluate an upload about to start.
    async fn evaluate_upload(&self, ctx: &RuleContext) -> RuleOutcome;
    /// Evaluate a per-user gate (login, command access).
    async fn evaluate_user(&self, ctx: &RuleContext) -> RuleOutcome;
    /// Evaluate a per-group gate.
    async fn evaluate_group(&self, ctx: &RuleContext) -> RuleOutcome;
    /// Evaluate a SITE command before dispatch.
    async fn evaluate_site(&self, ctx: &RuleContext) -> RuleOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_tokens_are_recognized() {
        let outcome = RuleOutcome { message: Some(SITE_OVERRIDE.to_string()), ..RuleOutcome::default() };
        assert!(outcome.is_site_override());
        assert!(outcome.section_override().is_none());

        let outcome = RuleOutcome {
            message: Some("SECTION_OVERRIDE::MP3".to_string()),
            ..RuleOutcome::default()
        };
        assert_eq!(outcome.section_override(), Some("MP3"));
        assert!(!outcome.is_site_override());
    }

    #[test]
    fn default_outcome_allows() {
        assert_eq!(RuleOutcome::default().action, RuleAction::Allow);
        assert_eq!(RuleOutcome::deny("nope").action, RuleAction::Deny);
    }
}
