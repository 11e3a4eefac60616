//! The policy and accounting layer: per-directory access rules, section
//! routing, credit charging and FXP decisions.

pub mod access;
pub mod credits;
pub mod fxp;
pub mod section;

pub use access::{Access, AccessEvaluator, DirectoryRule};
pub use credits::{apply_delta, ratio_round, ChargeOutcome, CreditEngine, Priced};
pub use fxp::{FxpDecision, FxpDirection, FxpPolicy, FxpRequest, FxpRule};
pub use section::{Section, SectionMap};
