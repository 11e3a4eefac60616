//! The credit engine: prices downloads and awards uploads using section
//! ratios, directory-rule overrides and the attached rule-script hook.
//!
//! All ratio arithmetic rounds half away from zero, in one place, including
//! nuke penalties.

use super::access::DirectoryRule;
use super::section::Section;
use crate::rules::{RuleAction, RuleContext, RuleEngine, RuleEvent};
use crate::users::Account;
use std::sync::Arc;

/// Outcome of pricing a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Nothing to charge or award (zero KB, or free-leech download).
    NoCharge,
    /// Charge (download) or award (upload) this many KB.
    Charge(u64),
    /// A rule denied the transfer; the reason surfaces verbatim to the
    /// client with a 550 prefix.
    Denied(String),
}

/// A priced transfer: the charge decision plus the side signals the rule
/// hook handed back for the router to act on.
#[derive(Debug, Clone, PartialEq)]
pub struct Priced {
    /// The charge (download) or award (upload) decision.
    pub outcome: ChargeOutcome,
    /// Target of a `SECTION_OVERRIDE::<NAME>` token, if the hook sent one.
    pub section_override: Option<String>,
    /// Flat credit adjustment in KB the hook asked for; applied when the
    /// transfer settles, clamping the balance at zero.
    pub credit_delta: i64,
}

impl Priced {
    fn plain(outcome: ChargeOutcome) -> Priced {
        Priced { outcome, section_override: None, credit_delta: 0 }
    }
}

/// Everything the engine needs to know about one transfer.
#[derive(Debug)]
pub struct TransferFacts<'a> {
    /// The transferring account.
    pub account: &'a Account,
    /// Section owning the target path.
    pub section: &'a Section,
    /// Directory rule matched for the target, if any.
    pub rule: Option<&'a DirectoryRule>,
    /// Planned (download) or actual (upload) byte count.
    pub bytes: u64,
    /// Whether the data connection was classified as FXP.
    pub is_fxp: bool,
    /// Normalized virtual path of the target.
    pub virtual_path: &'a str,
    /// Mapped physical path of the target.
    pub physical_path: &'a str,
}

/// Round `kb * num / den` half away from zero. All quantities are
/// non-negative, so this reduces to adding half the denominator before the
/// integer division.
pub fn ratio_round(kb: u64, num: u64, den: u64) -> u64 {
    if den == 0 {
        return 0;
    }
    (kb * num + den / 2) / den
}

/// Multiply a KB amount by a float factor, rounding half away from zero.
pub fn scale_round(kb: u64, factor: f64) -> u64 {
    if factor <= 0.0 {
        return 0;
    }
    (kb as f64 * factor).round() as u64
}

/// Apply a rule-supplied credit delta to a balance, clamping at zero.
pub fn apply_delta(credits_kb: u64, delta: i64) -> u64 {
    if delta >= 0 {
        credits_kb.saturating_add(delta as u64)
    } else {
        credits_kb.saturating_sub(delta.unsigned_abs())
    }
}

/// The credit engine.
#[derive(Debug, Clone)]
pub struct CreditEngine {
    rules: Arc<dyn RuleEngine>,
}

impl CreditEngine {
    /// Build an engine using `rules` as the pricing hook.
    pub fn new(rules: Arc<dyn RuleEngine>) -> CreditEngine {
        CreditEngine { rules }
    }

    fn context(&self, facts: &TransferFacts<'_>, event: RuleEvent, cost: u64, earned: u64) -> RuleContext {
        let kb = facts.bytes / 1024;
        RuleContext {
            is_fxp: facts.is_fxp,
            section: facts.section.name.clone(),
            free_leech: facts.section.free_leech,
            user: facts.account.name.clone(),
            group: facts.account.primary_group.clone(),
            bytes: facts.bytes,
            kb,
            cost,
            earned,
            virtual_path: facts.virtual_path.to_string(),
            physical_path: facts.physical_path.to_string(),
            event,
        }
    }

    fn is_free(facts: &TransferFacts<'_>) -> bool {
        facts.section.free_leech || facts.rule.and_then(|r| r.is_free).unwrap_or(false)
    }

    fn ratio(facts: &TransferFacts<'_>) -> (u64, u64) {
        let (ul, dl) = facts.rule.and_then(|r| r.ratio).unwrap_or_else(|| facts.section.ratio());
        (ul as u64, dl as u64)
    }

    /// Price a download of `facts.bytes`. Free-leech short-circuits before
    /// the rule hook; the hook may deny or revise the cost, ask for a flat
    /// credit delta, and its message may carry a `SECTION_OVERRIDE::<NAME>`
    /// token which is handed back for the router to re-route accounting.
    /// The caller is responsible for the balance check against the
    /// returned cost.
    pub async fn price_download(&self, facts: &TransferFacts<'_>) -> Priced {
        let kb = facts.bytes / 1024;
        if kb == 0 {
            return Priced::plain(ChargeOutcome::NoCharge);
        }
        if Self::is_free(facts) {
            return Priced::plain(ChargeOutcome::NoCharge);
        }
        let (ul, dl) = Self::ratio(facts);
        let mut cost = ratio_round(kb, dl, ul);
        if let Some(factor) = facts.rule.and_then(|r| r.multiply_cost) {
            cost = scale_round(cost, factor);
        }

        let ctx = self.context(facts, RuleEvent::Retr, cost, 0);
        let outcome = self.rules.evaluate_download(&ctx).await;
        let section_override = outcome.section_override().map(str::to_string);
        let credit_delta = outcome.credit_delta.unwrap_or(0);
        if outcome.action == RuleAction::Deny {
            let reason = outcome.deny_reason.unwrap_or_else(|| "Download denied by rule.".to_string());
            return Priced { outcome: ChargeOutcome::Denied(reason), section_override, credit_delta };
        }
        if let Some(revised) = outcome.cost_download {
            cost = revised;
        }
        let outcome = if cost == 0 { ChargeOutcome::NoCharge } else { ChargeOutcome::Charge(cost) };
        Priced { outcome, section_override, credit_delta }
    }

    /// Award for an upload of `facts.bytes`. Free-leech uploads earn 1:1 on
    /// the counted KB; the rule hook may deny or revise the award, ask for
    /// a credit delta, and hand back a section override like the download
    /// path.
    pub async fn price_upload(&self, facts: &TransferFacts<'_>) -> Priced {
        let kb = facts.bytes / 1024;
        if kb == 0 {
            return Priced::plain(ChargeOutcome::NoCharge);
        }
        let mut earned = if Self::is_free(facts) {
            kb
        } else {
            let (ul, dl) = Self::ratio(facts);
            ratio_round(kb, dl, ul)
        };
        if let Some(factor) = facts.rule.and_then(|r| r.upload_bonus) {
            earned = scale_round(earned, factor);
        }

        let ctx = self.context(facts, RuleEvent::Stor, 0, earned);
        let outcome = self.rules.evaluate_upload(&ctx).await;
        let section_override = outcome.section_override().map(str::to_string);
        let credit_delta = outcome.credit_delta.unwrap_or(0);
        if outcome.action == RuleAction::Deny {
            let reason = outcome.deny_reason.unwrap_or_else(|| "Upload denied by rule.".to_string());
            return Priced { outcome: ChargeOutcome::Denied(reason), section_override, credit_delta };
        }
        if let Some(revised) = outcome.earned_upload {
            earned = revised;
        }
        let outcome = if earned == 0 { ChargeOutcome::NoCharge } else { ChargeOutcome::Charge(earned) };
        Priced { outcome, section_override, credit_delta }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{NopRules, RuleOutcome};
    use crate::users::crypto::hash_password;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn section(free: bool, ul: u32, dl: u32) -> Section {
        Section {
            name: "ARCHIVE".to_string(),
            aliases: vec![],
            virtual_root: "/archive".to_string(),
            free_leech: free,
            ratio_ul_unit: ul,
            ratio_dl_unit: dl,
            nuke_multiplier: Some(3.0),
        }
    }

    fn account() -> Account {
        Account::new("alice", &hash_password("pw")).with_credits(10 * 1024)
    }

    fn facts<'a>(account: &'a Account, section: &'a Section, bytes: u64) -> TransferFacts<'a> {
        TransferFacts {
            account,
            section,
            rule: None,
            bytes,
            is_fxp: false,
            virtual_path: "/archive/file.bin",
            physical_path: "/srv/site/archive/file.bin",
        }
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(ratio_round(1, 1, 2), 1); // 0.5 -> 1
        assert_eq!(ratio_round(1, 1, 3), 0); // 0.33 -> 0
        assert_eq!(ratio_round(5, 3, 2), 8); // 7.5 -> 8
        assert_eq!(ratio_round(1024, 3, 1), 3072);
        assert_eq!(scale_round(4096, 3.0), 12288);
        assert_eq!(scale_round(3, 0.5), 2); // 1.5 -> 2
    }

    #[tokio::test]
    async fn one_to_three_download_costs_triple() {
        let engine = CreditEngine::new(Arc::new(NopRules));
        let section = section(false, 1, 3);
        let account = account();
        let priced = engine.price_download(&facts(&account, &section, 1024 * 1024)).await;
        assert_eq!(priced.outcome, ChargeOutcome::Charge(3072));
    }

    #[tokio::test]
    async fn free_leech_downloads_cost_nothing() {
        let engine = CreditEngine::new(Arc::new(NopRules));
        let section = section(true, 1, 3);
        let account = account();
        let priced = engine.price_download(&facts(&account, &section, 1024 * 1024)).await;
        assert_eq!(priced.outcome, ChargeOutcome::NoCharge);
    }

    #[tokio::test]
    async fn sub_kilobyte_transfers_are_free() {
        let engine = CreditEngine::new(Arc::new(NopRules));
        let section = section(false, 1, 3);
        let account = account();
        assert_eq!(engine.price_download(&facts(&account, &section, 1023)).await.outcome, ChargeOutcome::NoCharge);
        assert_eq!(engine.price_upload(&facts(&account, &section, 500)).await.outcome, ChargeOutcome::NoCharge);
    }

    #[tokio::test]
    async fn upload_award_uses_section_ratio() {
        let engine = CreditEngine::new(Arc::new(NopRules));
        let section = section(false, 1, 2);
        let account = account();
        let priced = engine.price_upload(&facts(&account, &section, 2 * 1024 * 1024)).await;
        assert_eq!(priced.outcome, ChargeOutcome::Charge(4096));
    }

    #[tokio::test]
    async fn free_leech_upload_earns_one_to_one() {
        let engine = CreditEngine::new(Arc::new(NopRules));
        let section = section(true, 1, 2);
        let account = account();
        let priced = engine.price_upload(&facts(&account, &section, 1024 * 1024)).await;
        assert_eq!(priced.outcome, ChargeOutcome::Charge(1024));
    }

    #[tokio::test]
    async fn directory_rule_overrides_ratio_and_multiplies_cost() {
        let engine = CreditEngine::new(Arc::new(NopRules));
        let section = section(false, 1, 3);
        let account = account();
        let rule = DirectoryRule {
            ratio: Some((1, 1)),
            multiply_cost: Some(2.0),
            ..DirectoryRule::default()
        };
        let mut f = facts(&account, &section, 1024 * 1024);
        f.rule = Some(&rule);
        assert_eq!(engine.price_download(&f).await.outcome, ChargeOutcome::Charge(2048));
    }

    #[derive(Debug)]
    struct DenyDownloads;

    #[async_trait]
    impl RuleEngine for DenyDownloads {
        async fn evaluate_download(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome::deny("no leeching today")
        }
        async fn evaluate_upload(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome::default()
        }
        async fn evaluate_user(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome::default()
        }
        async fn evaluate_group(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome::default()
        }
        async fn evaluate_site(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome::default()
        }
    }

    #[tokio::test]
    async fn rule_hook_can_deny() {
        let engine = CreditEngine::new(Arc::new(DenyDownloads));
        let section = section(false, 1, 1);
        let account = account();
        let priced = engine.price_download(&facts(&account, &section, 1024 * 1024)).await;
        assert_eq!(priced.outcome, ChargeOutcome::Denied("no leeching today".to_string()));
    }

    #[derive(Debug)]
    struct TaxEverything;

    #[async_trait]
    impl RuleEngine for TaxEverything {
        async fn evaluate_download(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome {
                credit_delta: Some(-512),
                ..RuleOutcome::default()
            }
        }
        async fn evaluate_upload(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome {
                credit_delta: Some(256),
                ..RuleOutcome::default()
            }
        }
        async fn evaluate_user(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome::default()
        }
        async fn evaluate_group(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome::default()
        }
        async fn evaluate_site(&self, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome::default()
        }
    }

    #[tokio::test]
    async fn rule_hook_credit_delta_is_surfaced() {
        let engine = CreditEngine::new(Arc::new(TaxEverything));
        let section = section(false, 1, 1);
        let account = account();

        let priced = engine.price_download(&facts(&account, &section, 1024 * 1024)).await;
        assert_eq!(priced.outcome, ChargeOutcome::Charge(1024));
        assert_eq!(priced.credit_delta, -512);

        let priced = engine.price_upload(&facts(&account, &section, 1024 * 1024)).await;
        assert_eq!(priced.outcome, ChargeOutcome::Charge(1024));
        assert_eq!(priced.credit_delta, 256);
    }

    #[test]
    fn credit_delta_application_clamps_at_zero() {
        assert_eq!(apply_delta(1000, 24), 1024);
        assert_eq!(apply_delta(1000, -200), 800);
        assert_eq!(apply_delta(100, -500), 0);
        assert_eq!(apply_delta(0, 0), 0);
    }
}
