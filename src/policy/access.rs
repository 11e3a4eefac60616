//! Per-directory access rules, selected by longest-prefix match.

use crate::vfs::path;
use serde::{Deserialize, Serialize};

/// A directory rule. The three access flags are tri-state: `Some(bool)` is
/// an explicit decision, `None` inherits the default (everything allowed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRule {
    /// Explicit listing permission.
    #[serde(default)]
    pub allow_list: Option<bool>,
    /// Explicit upload permission.
    #[serde(default)]
    pub allow_upload: Option<bool>,
    /// Explicit download permission.
    #[serde(default)]
    pub allow_download: Option<bool>,
    /// Downloads under this prefix are free of charge.
    #[serde(default)]
    pub is_free: Option<bool>,
    /// Multiplier applied to the download cost.
    #[serde(default)]
    pub multiply_cost: Option<f64>,
    /// Multiplier applied to the upload award.
    #[serde(default)]
    pub upload_bonus: Option<f64>,
    /// Ratio override `(upload_unit, download_unit)` replacing the section
    /// ratio for targets under this prefix.
    #[serde(default)]
    pub ratio: Option<(u32, u32)>,
}

/// Effective access for one target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// The target may be listed.
    pub can_list: bool,
    /// The target may be written (STOR/APPE/MKD/DELE/RNFR).
    pub can_upload: bool,
    /// The target may be read.
    pub can_download: bool,
}

impl Default for Access {
    fn default() -> Self {
        Access { can_list: true, can_upload: true, can_download: true }
    }
}

/// Evaluates directory rules keyed by normalized virtual-path prefixes.
#[derive(Debug, Default, Clone)]
pub struct AccessEvaluator {
    // Kept sorted by key length descending so the first prefix hit is the
    // longest match.
    rules: Vec<(String, DirectoryRule)>,
}

impl AccessEvaluator {
    /// Build an evaluator from `(prefix, rule)` pairs; prefixes are
    /// normalized before use.
    pub fn new<I>(rules: I) -> AccessEvaluator
    where
        I: IntoIterator<Item = (String, DirectoryRule)>,
    {
        let mut rules: Vec<(String, DirectoryRule)> = rules
            .into_iter()
            .map(|(key, rule)| (path::normalize("/", &key), rule))
            .collect();
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        AccessEvaluator { rules }
    }

    /// The rule whose normalized key is the longest prefix of `target`.
    pub fn rule_for(&self, target: &str) -> Option<&DirectoryRule> {
        let target = path::normalize("/", target);
        self.rules.iter().find(|(key, _)| target.starts_with(key.as_str())).map(|(_, rule)| rule)
    }

    /// Effective access for `target`; unmatched or inherited flags default
    /// to allowed.
    pub fn evaluate(&self, target: &str) -> Access {
        match self.rule_for(target) {
            Some(rule) => Access {
                can_list: rule.allow_list.unwrap_or(true),
                can_upload: rule.allow_upload.unwrap_or(true),
                can_download: rule.allow_download.unwrap_or(true),
            },
            None => Access::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn deny_upload() -> DirectoryRule {
        DirectoryRule { allow_upload: Some(false), ..DirectoryRule::default() }
    }

    fn allow_all_explicit() -> DirectoryRule {
        DirectoryRule {
            allow_list: Some(true),
            allow_upload: Some(true),
            allow_download: Some(true),
            ..DirectoryRule::default()
        }
    }

    #[test]
    fn unmatched_paths_default_to_allowed() {
        let eval = AccessEvaluator::new(vec![("/private".to_string(), deny_upload())]);
        assert_eq!(eval.evaluate("/public/file"), Access::default());
    }

    #[test]
    fn longest_prefix_wins() {
        let eval = AccessEvaluator::new(vec![
            ("/site".to_string(), deny_upload()),
            ("/site/incoming".to_string(), allow_all_explicit()),
        ]);
        assert!(!eval.evaluate("/site/archive/x").can_upload);
        assert!(eval.evaluate("/site/incoming/x").can_upload);
    }

    #[test]
    fn inherit_flags_fall_back_to_default() {
        let rule = DirectoryRule { allow_list: Some(false), ..DirectoryRule::default() };
        let eval = AccessEvaluator::new(vec![("/hidden".to_string(), rule)]);
        let access = eval.evaluate("/hidden/sub");
        assert!(!access.can_list);
        assert!(access.can_upload);
        assert!(access.can_download);
    }

    #[test]
    fn keys_are_normalized() {
        let eval = AccessEvaluator::new(vec![("\\odd\\style\\".to_string(), deny_upload())]);
        assert!(!eval.evaluate("/odd/style/x").can_upload);
    }
}
