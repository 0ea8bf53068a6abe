//! Network redirect rules
//!
//! The redirect strategy never touches the element's URL. Instead it
//! installs a rule telling the request layer to serve a matching request
//! from the mirror, re-requests the original URL and removes the rule once
//! the load settles.

use crate::models::ResourceKind;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub type RuleId = u64;

/// Request categories a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Script,
    Stylesheet,
    Image,
}

impl RequestType {
    /// Request types a redirect for `kind` must cover
    pub fn scope_for(kind: ResourceKind) -> Vec<RequestType> {
        match kind {
            ResourceKind::Script => vec![RequestType::Script],
            // Icons are fetched as images by some engines
            ResourceKind::Stylesheet | ResourceKind::Icon => {
                vec![RequestType::Stylesheet, RequestType::Image]
            }
        }
    }
}

/// Redirect `match_url` to `redirect_to` for requests of `resource_types`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectRule {
    pub id: RuleId,
    pub match_url: String,
    pub redirect_to: String,
    pub resource_types: Vec<RequestType>,
}

impl RedirectRule {
    pub fn applies_to(&self, url: &str, request: RequestType) -> bool {
        self.match_url == url && self.resource_types.contains(&request)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule {0} is already installed")]
    DuplicateId(RuleId),
    #[error("rule rejected: {0}")]
    Rejected(String),
}

/// Request-layer rule engine
#[async_trait]
pub trait RedirectRules: Send + Sync {
    async fn add_rule(&self, rule: RedirectRule) -> Result<(), RuleError>;

    /// Remove a rule; removing an unknown id is not an error
    async fn remove_rule(&self, id: RuleId) -> Result<(), RuleError>;

    async fn list_rules(&self) -> Vec<RedirectRule>;
}

/// Rule engine applying rules to requests in process
#[derive(Debug, Default)]
pub struct InMemoryRuleEngine {
    rules: DashMap<RuleId, RedirectRule>,
}

impl InMemoryRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL a request for `url` of type `request` is served from.
    ///
    /// When several rules match, the oldest (lowest id) wins.
    pub fn resolve(&self, url: &str, request: RequestType) -> String {
        self.rules
            .iter()
            .filter(|r| r.applies_to(url, request))
            .min_by_key(|r| r.id)
            .map(|r| r.redirect_to.clone())
            .unwrap_or_else(|| url.to_string())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl RedirectRules for InMemoryRuleEngine {
    async fn add_rule(&self, rule: RedirectRule) -> Result<(), RuleError> {
        if rule.match_url.is_empty() || rule.redirect_to.is_empty() {
            return Err(RuleError::Rejected("empty url".to_string()));
        }
        if self.rules.contains_key(&rule.id) {
            return Err(RuleError::DuplicateId(rule.id));
        }
        self.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn remove_rule(&self, id: RuleId) -> Result<(), RuleError> {
        self.rules.remove(&id);
        Ok(())
    }

    async fn list_rules(&self) -> Vec<RedirectRule> {
        let mut rules: Vec<_> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by_key(|r| r.id);
        rules
    }
}

/// Issues locally unique rule ids and tracks the rules it installed
#[derive(Clone)]
pub struct RuleArena {
    engine: Arc<dyn RedirectRules>,
    next_id: Arc<AtomicU64>,
}

impl RuleArena {
    pub fn new(engine: Arc<dyn RedirectRules>) -> Self {
        Self {
            engine,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Install a redirect for one resource
    pub async fn install(
        &self,
        match_url: &str,
        redirect_to: &str,
        kind: ResourceKind,
    ) -> Result<RuleLease, RuleError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rule = RedirectRule {
            id,
            match_url: match_url.to_string(),
            redirect_to: redirect_to.to_string(),
            resource_types: RequestType::scope_for(kind),
        };
        self.engine.add_rule(rule).await?;
        debug!(rule_id = id, match_url = %match_url, redirect_to = %redirect_to, "Installed redirect rule");

        Ok(RuleLease {
            id,
            engine: Arc::clone(&self.engine),
            released: false,
        })
    }

    /// Rules currently installed in the engine
    pub async fn list(&self) -> Vec<RedirectRule> {
        self.engine.list_rules().await
    }
}

/// Ownership of one installed rule.
///
/// Call [`RuleLease::release`] once the redirected load settles. A lease
/// dropped unreleased removes its rule from a background task.
pub struct RuleLease {
    id: RuleId,
    engine: Arc<dyn RedirectRules>,
    released: bool,
}

impl RuleLease {
    pub fn id(&self) -> RuleId {
        self.id
    }

    pub async fn release(mut self) -> Result<(), RuleError> {
        self.released = true;
        self.engine.remove_rule(self.id).await
    }
}

impl Drop for RuleLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let id = self.id;
        let engine = Arc::clone(&self.engine);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = engine.remove_rule(id).await {
                        warn!(rule_id = id, error = %e, "Failed to remove abandoned redirect rule");
                    }
                });
            }
            Err(_) => warn!(rule_id = id, "Redirect rule leaked outside a runtime"),
        }
    }
}
