//! Mirror selection and replacement
//!
//! A resource is eligible for replacement when its host's average load
//! time is at or above the configured threshold and the integrity index
//! knows another host serving the same digest. Replacement is attempted
//! through a [`ReplaceStrategy`]:
//! - [`DomSubstitution`] creates a new element pointing at the mirror
//! - [`RedirectSubstitution`] keeps the URL and redirects the request
//!
//! Failures leave the original element in place.

mod replacer;
mod rules;
mod selector;

#[cfg(test)]
mod tests;

pub use replacer::{
    strategy_for, DomSubstitution, MirrorReplacer, RedirectSubstitution, ReplaceError,
    ReplaceReport, ReplaceStrategy, ReplacementOutcome,
};
pub use rules::{
    InMemoryRuleEngine, RedirectRule, RedirectRules, RequestType, RuleArena, RuleError, RuleId,
    RuleLease,
};
pub use selector::{
    filter_candidates, MirrorLookup, MirrorSelector, Selection, SelectorError, SkipReason,
};
