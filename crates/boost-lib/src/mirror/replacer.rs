//! Replacement of slow resources with mirrors

use super::rules::{RuleArena, RuleError, RuleLease};
use super::selector::{MirrorSelector, Selection, SkipReason};
use crate::config::{BoostConfig, Placement, ReplaceMode};
use crate::dom::{Dom, DomError, ElementId, ElementSpec, LoadOutcome, SriElement};
use crate::observability::{BoostMetrics, StructuredLogger};
use crate::storage::Storage;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum ReplaceError {
    #[error("mirror failed to load")]
    LoadFailed,
    #[error("mirror did not settle within {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// One way of making the page load a resource from another URL
#[async_trait]
pub trait ReplaceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Load `candidate` in place of `element`.
    ///
    /// On success returns the element now serving the resource. On failure
    /// the original element is left attached.
    async fn attempt(&self, element: &SriElement, candidate: &str)
        -> Result<ElementId, ReplaceError>;
}

/// Settle `watch`, mapping the timeout to a failure
async fn settle(
    watch: crate::dom::LoadWatch,
    timeout: Duration,
) -> Result<(), ReplaceError> {
    match tokio::time::timeout(timeout, watch).await {
        Ok(LoadOutcome::Loaded) => Ok(()),
        Ok(LoadOutcome::Failed) => Err(ReplaceError::LoadFailed),
        Err(_) => Err(ReplaceError::TimedOut(timeout)),
    }
}

/// Swap elements in the document
pub struct DomSubstitution {
    dom: Arc<dyn Dom>,
    placement: Placement,
    timeout: Duration,
}

impl DomSubstitution {
    pub fn new(dom: Arc<dyn Dom>, placement: Placement, timeout: Duration) -> Self {
        Self {
            dom,
            placement,
            timeout,
        }
    }

    async fn adjacent(&self, element: &SriElement, replacement: ElementId) -> Result<(), ReplaceError> {
        let watch = self.dom.watch_load(replacement);
        self.dom.insert_after(element.id, replacement)?;

        match settle(watch, self.timeout).await {
            Ok(()) => {
                retire_original(self.dom.as_ref(), element.id);
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = self.dom.remove(replacement) {
                    warn!(element = %replacement, error = %cleanup, "Failed to remove unused mirror element");
                }
                Err(e)
            }
        }
    }

    async fn in_place(&self, element: &SriElement, replacement: ElementId) -> Result<(), ReplaceError> {
        let watch = self.dom.watch_load(replacement);
        self.dom.replace(element.id, replacement)?;

        match settle(watch, self.timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.restore(element.id, replacement);
                Err(e)
            }
        }
    }

    /// Put the original back where the failed mirror sits
    fn restore(&self, original: ElementId, replacement: ElementId) {
        let Err(swap) = self.dom.replace(replacement, original) else {
            return;
        };
        warn!(element = %original, error = %swap, "Swap back failed, re-inserting original");

        let reinserted = self
            .dom
            .insert_after(replacement, original)
            .and_then(|()| self.dom.remove(replacement));
        if let Err(e) = reinserted {
            error!(
                element = %original,
                mirror = %replacement,
                error = %e,
                "Could not restore original element"
            );
        }
    }
}

/// Detach the original once its replacement has loaded. The mirror already
/// serves the resource, so a failure here only leaves a duplicate behind.
fn retire_original(dom: &dyn Dom, original: ElementId) {
    if let Err(e) = dom.remove(original) {
        warn!(element = %original, error = %e, "Failed to remove replaced original");
    }
}

#[async_trait]
impl ReplaceStrategy for DomSubstitution {
    fn name(&self) -> &'static str {
        match self.placement {
            Placement::Adjacent => "dom_adjacent",
            Placement::InPlace => "dom_in_place",
        }
    }

    async fn attempt(
        &self,
        element: &SriElement,
        candidate: &str,
    ) -> Result<ElementId, ReplaceError> {
        let replacement = self
            .dom
            .create_element(ElementSpec::replacement_for(element, candidate))?;

        match self.placement {
            Placement::Adjacent => self.adjacent(element, replacement).await?,
            Placement::InPlace => self.in_place(element, replacement).await?,
        }
        Ok(replacement)
    }
}

/// Redirect the unchanged URL at the request layer
pub struct RedirectSubstitution {
    dom: Arc<dyn Dom>,
    arena: RuleArena,
    timeout: Duration,
}

impl RedirectSubstitution {
    pub fn new(dom: Arc<dyn Dom>, arena: RuleArena, timeout: Duration) -> Self {
        Self {
            dom,
            arena,
            timeout,
        }
    }

    pub fn arena(&self) -> &RuleArena {
        &self.arena
    }

    async fn reload(&self, element: &SriElement, clone: ElementId) -> Result<(), ReplaceError> {
        let watch = self.dom.watch_load(clone);
        self.dom.insert_after(element.id, clone)?;
        settle(watch, self.timeout).await
    }
}

#[async_trait]
impl ReplaceStrategy for RedirectSubstitution {
    fn name(&self) -> &'static str {
        "redirect"
    }

    async fn attempt(
        &self,
        element: &SriElement,
        candidate: &str,
    ) -> Result<ElementId, ReplaceError> {
        let lease = self
            .arena
            .install(&element.url, candidate, element.kind)
            .await?;
        let clone = match self
            .dom
            .create_element(ElementSpec::replacement_for(element, &element.url))
        {
            Ok(clone) => clone,
            Err(e) => {
                release(lease).await;
                return Err(e.into());
            }
        };

        let result = self.reload(element, clone).await;
        // The rule is only needed while the clone loads
        release(lease).await;

        match result {
            Ok(()) => {
                retire_original(self.dom.as_ref(), element.id);
                Ok(clone)
            }
            Err(e) => {
                if let Err(cleanup) = self.dom.remove(clone) {
                    debug!(element = %clone, error = %cleanup, "Clone already detached");
                }
                Err(e)
            }
        }
    }
}

async fn release(lease: RuleLease) {
    let rule_id = lease.id();
    if let Err(e) = lease.release().await {
        warn!(rule_id, error = %e, "Failed to remove redirect rule");
    }
}

/// Build the strategy selected by `config`
pub fn strategy_for(
    config: &BoostConfig,
    dom: Arc<dyn Dom>,
    arena: RuleArena,
) -> Arc<dyn ReplaceStrategy> {
    match config.strategy {
        ReplaceMode::Dom => Arc::new(DomSubstitution::new(
            dom,
            config.placement,
            config.replace_timeout(),
        )),
        ReplaceMode::Redirect => Arc::new(RedirectSubstitution::new(
            dom,
            arena,
            config.replace_timeout(),
        )),
    }
}

/// What happened to one resource during a replacement pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReplacementOutcome {
    Skipped { reason: SkipReason },
    /// Every candidate was already tried during this page's life
    Exhausted,
    Replaced {
        mirror: String,
        element: ElementId,
    },
    Failed {
        mirror: String,
        error: String,
    },
}

/// Outcomes of one [`MirrorReplacer::process`] call, in element order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaceReport {
    pub outcomes: Vec<(ElementId, ReplacementOutcome)>,
}

impl ReplaceReport {
    pub fn replaced(&self) -> usize {
        self.count(|o| matches!(o, ReplacementOutcome::Replaced { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ReplacementOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                ReplacementOutcome::Skipped { .. } | ReplacementOutcome::Exhausted
            )
        })
    }

    fn count(&self, pred: impl Fn(&ReplacementOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Replaces slow resources with same-digest mirrors.
///
/// Each (resource URL, candidate) pair is attempted at most once for the
/// lifetime of the replacer.
pub struct MirrorReplacer {
    selector: MirrorSelector,
    strategy: Arc<dyn ReplaceStrategy>,
    attempted: Mutex<HashSet<(String, String)>>,
    log: bool,
    metrics: BoostMetrics,
    logger: StructuredLogger,
}

impl MirrorReplacer {
    pub fn new(config: &BoostConfig, storage: Storage, strategy: Arc<dyn ReplaceStrategy>) -> Self {
        Self {
            selector: MirrorSelector::new(config, storage),
            strategy,
            attempted: Mutex::new(HashSet::new()),
            log: config.enable_logging,
            metrics: BoostMetrics::new(),
            logger: StructuredLogger::new("mirror-replacer"),
        }
    }

    pub fn selector(&self) -> &MirrorSelector {
        &self.selector
    }

    /// Number of (resource, candidate) pairs tried so far
    pub fn attempted(&self) -> usize {
        self.lock_attempted().len()
    }

    fn lock_attempted(&self) -> std::sync::MutexGuard<'_, HashSet<(String, String)>> {
        self.attempted.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the first candidate not yet attempted for `url`
    fn claim(&self, url: &str, candidates: Vec<String>) -> Option<String> {
        let mut attempted = self.lock_attempted();
        candidates
            .into_iter()
            .find(|c| attempted.insert((url.to_string(), c.clone())))
    }

    /// Give every element at most one replacement attempt
    pub async fn process(&self, elements: &[SriElement]) -> ReplaceReport {
        let mut report = ReplaceReport::default();
        for element in elements {
            let outcome = self.process_one(element).await;
            report.outcomes.push((element.id, outcome));
        }

        if self.log {
            debug!(
                strategy = self.strategy.name(),
                replaced = report.replaced(),
                failed = report.failed(),
                skipped = report.skipped(),
                "Replacement pass complete"
            );
        }
        report
    }

    pub async fn process_one(&self, element: &SriElement) -> ReplacementOutcome {
        let (avg_ms, candidates) = match self.selector.select(element).await {
            Selection::Candidates { avg_ms, urls } => (avg_ms, urls),
            Selection::Skipped(reason) => {
                if self.log {
                    debug!(url = %element.url, reason = reason.as_str(), "Resource not replaced");
                }
                self.metrics.inc_replacement("skipped");
                return ReplacementOutcome::Skipped { reason };
            }
        };

        let Some(mirror) = self.claim(&element.url, candidates) else {
            self.metrics.inc_replacement("skipped");
            return ReplacementOutcome::Exhausted;
        };

        match self.strategy.attempt(element, &mirror).await {
            Ok(replacement) => {
                self.metrics.inc_replacement("succeeded");
                if self.log {
                    self.logger
                        .log_replacement(&element.url, &mirror, avg_ms, true);
                }
                ReplacementOutcome::Replaced {
                    mirror,
                    element: replacement,
                }
            }
            Err(e) => {
                self.metrics.inc_replacement("failed");
                if self.log {
                    self.logger
                        .log_replacement(&element.url, &mirror, avg_ms, false);
                    debug!(url = %element.url, mirror = %mirror, error = %e, "Replacement attempt failed");
                }
                ReplacementOutcome::Failed {
                    mirror,
                    error: e.to_string(),
                }
            }
        }
    }
}
