//! A rule engine that allows everything; the default when no scripts are
//! configured.

use super::{RuleContext, RuleEngine, RuleOutcome};
use async_trait::async_trait;

/// Allows every operation unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopRules;

#[async_trait]
impl RuleEngine for NopRules {
    async fn evaluate_download(&self, _ctx: &RuleContext) -> RuleOutcome {
        RuleOutcome::default()
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
