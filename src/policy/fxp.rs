//! FXP (site-to-site transfer) policy.
//!
//! A data connection is classified as FXP when its peer address differs
//! from the control-connection peer. This module only decides whether such
//! a transfer is allowed; classification happens at the data channel.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Direction of the FXP data connection relative to this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FxpDirection {
    /// The remote site connects to us (PASV/EPSV).
    Incoming,
    /// We connect out to the remote site (PORT/EPRT).
    Outgoing,
}

/// The facts an FXP decision is made from.
#[derive(Debug, Clone)]
pub struct FxpRequest<'a> {
    /// Requesting user.
    pub user: &'a str,
    /// Whether the user has administrative rights.
    pub is_admin: bool,
    /// Section name owning the target path.
    pub section: &'a str,
    /// Normalized virtual target path.
    pub virtual_path: &'a str,
    /// Connection direction.
    pub direction: FxpDirection,
    /// The foreign data endpoint address.
    pub remote_ip: IpAddr,
    /// Control channel TLS state.
    pub control_tls: bool,
    /// Data channel protection (PROT P) state.
    pub data_tls: bool,
}

/// One configurable FXP rule; `None` fields match anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FxpRule {
    /// Match a specific section name.
    #[serde(default)]
    pub section: Option<String>,
    /// Match remote addresses inside any of these CIDR blocks.
    #[serde(default)]
    pub remote_nets: Option<Vec<ipnet::IpNet>>,
    /// Match only this direction.
    #[serde(default)]
    pub direction: Option<FxpDirection>,
    /// When set, the rule only matches if data-channel TLS is (not) active.
    #[serde(default)]
    pub require_tls: Option<bool>,
    /// The verdict when this rule matches.
    pub allow: bool,
    /// Reason reported on deny.
    #[serde(default)]
    pub reason: Option<String>,
}

impl FxpRule {
    fn matches(&self, req: &FxpRequest<'_>) -> bool {
        if let Some(section) = &self.section {
            if !section.eq_ignore_ascii_case(req.section) {
                return false;
            }
        }
        if let Some(nets) = &self.remote_nets {
            if !nets.iter().any(|net| net.contains(&req.remote_ip)) {
                return false;
            }
        }
        if let Some(direction) = self.direction {
            if direction != req.direction {
                return false;
            }
        }
        if let Some(require_tls) = self.require_tls {
            if req.data_tls != require_tls {
                return false;
            }
        }
        true
    }
}

/// The decision returned by [`FxpPolicy::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxpDecision {
    /// Whether the transfer may proceed.
    pub allowed: bool,
    /// Reason text on deny.
    pub deny_reason: Option<String>,
}

impl FxpDecision {
    fn allow() -> FxpDecision {
        FxpDecision { allowed: true, deny_reason: None }
    }

    fn deny(reason: String) -> FxpDecision {
        FxpDecision { allowed: false, deny_reason: Some(reason) }
    }
}

/// The FXP policy: an ordered rule list with an account-flag default.
#[derive(Debug, Clone, Default)]
pub struct FxpPolicy {
    rules: Vec<FxpRule>,
    exempt_admins: bool,
}

impl FxpPolicy {
    /// Build a policy; rules are evaluated in order, first match wins.
    pub fn new(rules: Vec<FxpRule>, exempt_admins: bool) -> FxpPolicy {
        FxpPolicy { rules, exempt_admins }
    }

    /// Evaluate a request. `account_allows_fxp` is the per-account default
    /// applied when no rule matches.
    pub fn evaluate(&self, req: &FxpRequest<'_>, account_allows_fxp: bool) -> FxpDecision {
        if self.exempt_admins && req.is_admin {
            return FxpDecision::allow();
        }
        for rule in &self.rules {
            if rule.matches(req) {
                return if rule.allow {
                    FxpDecision::allow()
                } else {
                    FxpDecision::deny(
                        rule.reason
                            .clone()
                            .unwrap_or_else(|| format!("FXP not allowed from {}", req.remote_ip)),
                    )
                };
            }
        }
        if account_allows_fxp {
            FxpDecision::allow()
        } else {
            FxpDecision::deny("FXP not allowed: IP mismatch.".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(direction: FxpDirection, ip: &str) -> FxpRequest<'static> {
        FxpRequest {
            user: "alice",
            is_admin: false,
            section: "ARCHIVE",
            virtual_path: "/archive/rel",
            direction,
            remote_ip: ip.parse().unwrap(),
            control_tls: false,
            data_tls: false,
        }
    }

    #[test]
    fn account_flag_is_the_default() {
        let policy = FxpPolicy::default();
        let req = request(FxpDirection::Outgoing, "203.0.113.5");
        assert!(policy.evaluate(&req, true).allowed);
        let denied = policy.evaluate(&req, false);
        assert!(!denied.allowed);
        assert_eq!(denied.deny_reason.as_deref(), Some("FXP not allowed: IP mismatch."));
    }

    #[test]
    fn first_matching_rule_wins() {
        let policy = FxpPolicy::new(
            vec![
                FxpRule {
                    remote_nets: Some(vec!["203.0.113.0/24".parse().unwrap()]),
                    allow: true,
                    ..FxpRule::default()
                },
                FxpRule { allow: false, reason: Some("no".to_string()), ..FxpRule::default() },
            ],
            false,
        );
        assert!(policy.evaluate(&request(FxpDirection::Outgoing, "203.0.113.9"), false).allowed);
        assert!(!policy.evaluate(&request(FxpDirection::Outgoing, "198.51.100.1"), true).allowed);
    }

    #[test]
    fn section_and_direction_filters() {
        let policy = FxpPolicy::new(
            vec![FxpRule {
                section: Some("archive".to_string()),
                direction: Some(FxpDirection::Incoming),
                allow: false,
                ..FxpRule::default()
            }],
            false,
        );
        assert!(!policy.evaluate(&request(FxpDirection::Incoming, "203.0.113.9"), true).allowed);
        assert!(policy.evaluate(&request(FxpDirection::Outgoing, "203.0.113.9"), true).allowed);
    }

    #[test]
    fn tls_requirement_filters() {
        let policy = FxpPolicy::new(
            vec![FxpRule { require_tls: Some(true), allow: true, ..FxpRule::default() }],
            false,
        );
        let mut req = request(FxpDirection::Incoming, "203.0.113.9");
        assert!(!policy.evaluate(&req, false).allowed);
        req.data_tls = true;
        assert!(policy.evaluate(&req, false).allowed);
    }

    #[test]
    fn admins_can_be_exempt() {
        let policy = FxpPolicy::new(vec![FxpRule { allow: false, ..FxpRule::default() }], true);
        let mut req = request(FxpDirection::Outgoing, "203.0.113.9");
        req.is_admin = true;
        assert!(policy.evaluate(&req, false).allowed);
    }
}
