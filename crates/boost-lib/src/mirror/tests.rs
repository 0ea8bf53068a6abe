//! Replacement flows against a scripted document

use super::*;
use crate::config::{BoostConfig, Placement, ReplaceMode};
use crate::dom::{Dom, LoadOutcome};
use crate::models::{HostStats, IntegrityEntry, ResourceKind};
use crate::storage::Storage;
use crate::testing::FakeDom;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};

const ORIGINAL: &str = "https://a.com/lib.js";
const MIRROR_B: &str = "https://b.com/lib.js";
const MIRROR_C: &str = "https://c.com/lib.js";
const DIGEST: &str = "sha384-LIB";

async fn slow_storage(mirrors: &[&str]) -> Storage {
    let storage = Storage::in_memory();
    let now = Utc::now();
    storage
        .write_stats_batch(&[HostStats::fold(None, "a.com", 2_400.0, 3, now)])
        .await
        .unwrap();
    let urls = std::iter::once(ORIGINAL).chain(mirrors.iter().copied());
    storage
        .write_integrity_batch(&[IntegrityEntry::fold(None, DIGEST, urls, now)])
        .await
        .unwrap();
    storage
}

fn config(placement: Placement) -> BoostConfig {
    BoostConfig {
        placement,
        replace_timeout_ms: 50,
        ..BoostConfig::default()
    }
}

fn dom_replacer(dom: &Arc<FakeDom>, storage: Storage, placement: Placement) -> MirrorReplacer {
    let config = config(placement);
    let strategy = Arc::new(DomSubstitution::new(
        dom.clone(),
        placement,
        config.replace_timeout(),
    ));
    MirrorReplacer::new(&config, storage, strategy)
}

#[tokio::test]
async fn test_adjacent_swap_replaces_original_on_load() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    let original = dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));
    dom.respond(MIRROR_B, LoadOutcome::Loaded);

    let replacer = dom_replacer(&dom, storage, Placement::Adjacent);
    let report = replacer.process(&dom.sri_elements()).await;

    assert_eq!(report.replaced(), 1);
    let ReplacementOutcome::Replaced { mirror, element } = &report.outcomes[0].1 else {
        panic!("expected replacement, got {:?}", report.outcomes[0].1);
    };
    assert_eq!(mirror, MIRROR_B);
    assert!(!dom.is_attached(original));
    assert_eq!(dom.attached_urls(), vec![MIRROR_B]);

    let spec = dom.spec_of(*element).unwrap();
    assert_eq!(spec.integrity.as_deref(), Some(DIGEST));
    assert_eq!(spec.cross_origin.as_deref(), Some("anonymous"));
    assert_eq!(spec.kind, ResourceKind::Script);
}

#[tokio::test]
async fn test_failed_mirror_keeps_original() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    let original = dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));
    dom.respond(MIRROR_B, LoadOutcome::Failed);

    let replacer = dom_replacer(&dom, storage, Placement::Adjacent);
    let report = replacer.process(&dom.sri_elements()).await;

    assert_eq!(report.failed(), 1);
    assert!(dom.is_attached(original));
    assert_eq!(dom.attached_urls(), vec![ORIGINAL]);

    // The same pair is never retried
    let again = replacer.process(&dom.sri_elements()).await;
    assert_eq!(again.outcomes[0].1, ReplacementOutcome::Exhausted);
    assert_eq!(replacer.attempted(), 1);
}

#[tokio::test]
async fn test_next_call_tries_next_candidate() {
    let storage = slow_storage(&[MIRROR_B, MIRROR_C]).await;
    let dom = Arc::new(FakeDom::new());
    dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));
    dom.respond(MIRROR_B, LoadOutcome::Failed);
    dom.respond(MIRROR_C, LoadOutcome::Loaded);

    let replacer = dom_replacer(&dom, storage, Placement::Adjacent);

    let first = replacer.process(&dom.sri_elements()).await;
    assert!(matches!(
        &first.outcomes[0].1,
        ReplacementOutcome::Failed { mirror, .. } if mirror == MIRROR_B
    ));

    let second = replacer.process(&dom.sri_elements()).await;
    assert!(matches!(
        &second.outcomes[0].1,
        ReplacementOutcome::Replaced { mirror, .. } if mirror == MIRROR_C
    ));
    assert_eq!(dom.attached_urls(), vec![MIRROR_C]);
}

#[tokio::test]
async fn test_in_place_swap_restores_position_on_failure() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    dom.add_resource(ResourceKind::Stylesheet, "https://z.com/first.css", Some("sha256-F"));
    dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));
    dom.add_resource(ResourceKind::Stylesheet, "https://z.com/last.css", Some("sha256-L"));
    dom.respond(MIRROR_B, LoadOutcome::Failed);

    let replacer = dom_replacer(&dom, storage, Placement::InPlace);
    let report = replacer.process(&dom.sri_elements()).await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped(), 2);
    assert_eq!(
        dom.attached_urls(),
        vec!["https://z.com/first.css", ORIGINAL, "https://z.com/last.css"]
    );
}

#[tokio::test]
async fn test_in_place_swap_keeps_mirror_on_load() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));
    dom.respond(MIRROR_B, LoadOutcome::Loaded);

    let replacer = dom_replacer(&dom, storage, Placement::InPlace);
    assert_eq!(replacer.process(&dom.sri_elements()).await.replaced(), 1);
    assert_eq!(dom.attached_urls(), vec![MIRROR_B]);
}

#[tokio::test]
async fn test_in_place_failure_reinserts_original_when_swap_back_fails() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    let original = dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));
    dom.add_resource(ResourceKind::Stylesheet, "https://z.com/last.css", Some("sha256-L"));
    dom.respond(MIRROR_B, LoadOutcome::Failed);
    dom.refuse_replace_with(original);

    let replacer = dom_replacer(&dom, storage, Placement::InPlace);
    let outcome = replacer.process_one(&dom.sri_elements()[0]).await;

    assert!(matches!(outcome, ReplacementOutcome::Failed { .. }));
    assert!(dom.is_attached(original));
    assert_eq!(dom.attached_urls(), vec![ORIGINAL, "https://z.com/last.css"]);
}

#[tokio::test]
async fn test_adjacent_load_counts_as_replaced_when_original_removal_fails() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    let original = dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));
    dom.respond(MIRROR_B, LoadOutcome::Loaded);
    dom.refuse_removal_of(original);

    let replacer = dom_replacer(&dom, storage, Placement::Adjacent);
    let outcome = replacer.process_one(&dom.sri_elements()[0]).await;

    let ReplacementOutcome::Replaced { element, .. } = outcome else {
        panic!("expected replacement, got {outcome:?}");
    };
    assert!(dom.is_attached(element));
    assert_eq!(dom.attached_urls(), vec![ORIGINAL, MIRROR_B]);
}

#[tokio::test]
async fn test_unsettled_mirror_times_out() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    let original = dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));

    let replacer = dom_replacer(&dom, storage, Placement::Adjacent);
    let outcome = replacer.process_one(&dom.sri_elements()[0]).await;

    let ReplacementOutcome::Failed { error, .. } = outcome else {
        panic!("expected timeout failure, got {outcome:?}");
    };
    assert!(error.contains("did not settle"));
    assert!(dom.is_attached(original));
    assert_eq!(dom.attached_urls(), vec![ORIGINAL]);
}

#[tokio::test]
async fn test_fast_host_left_alone() {
    let storage = Storage::in_memory();
    storage
        .write_stats_batch(&[HostStats::fold(None, "a.com", 90.0, 3, Utc::now())])
        .await
        .unwrap();
    let dom = Arc::new(FakeDom::new());
    dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));

    let replacer = dom_replacer(&dom, storage, Placement::Adjacent);
    let report = replacer.process(&dom.sri_elements()).await;

    assert_eq!(report.skipped(), 1);
    assert_eq!(dom.element_count(), 1);
    assert_eq!(replacer.attempted(), 0);
}

/// Rule engine remembering every rule it was given
#[derive(Default)]
struct RecordingRules {
    inner: InMemoryRuleEngine,
    seen: Mutex<Vec<RedirectRule>>,
}

#[async_trait]
impl RedirectRules for RecordingRules {
    async fn add_rule(&self, rule: RedirectRule) -> Result<(), RuleError> {
        self.seen.lock().unwrap().push(rule.clone());
        self.inner.add_rule(rule).await
    }

    async fn remove_rule(&self, id: RuleId) -> Result<(), RuleError> {
        self.inner.remove_rule(id).await
    }

    async fn list_rules(&self) -> Vec<RedirectRule> {
        self.inner.list_rules().await
    }
}

fn redirect_replacer(
    dom: &Arc<FakeDom>,
    rules: &Arc<RecordingRules>,
    storage: Storage,
) -> MirrorReplacer {
    let config = BoostConfig {
        strategy: ReplaceMode::Redirect,
        ..config(Placement::Adjacent)
    };
    let strategy = strategy_for(&config, dom.clone(), RuleArena::new(rules.clone()));
    MirrorReplacer::new(&config, storage, strategy)
}

#[tokio::test]
async fn test_redirect_reloads_same_url_and_removes_rule() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    let original = dom.add_resource(ResourceKind::Icon, ORIGINAL, Some(DIGEST));
    dom.respond(ORIGINAL, LoadOutcome::Loaded);
    let rules = Arc::new(RecordingRules::default());

    let replacer = redirect_replacer(&dom, &rules, storage);
    let report = replacer.process(&dom.sri_elements()).await;

    assert_eq!(report.replaced(), 1);
    assert!(!dom.is_attached(original));
    assert_eq!(dom.attached_urls(), vec![ORIGINAL]);

    let seen = rules.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].match_url, ORIGINAL);
    assert_eq!(seen[0].redirect_to, MIRROR_B);
    assert_eq!(
        seen[0].resource_types,
        vec![RequestType::Stylesheet, RequestType::Image]
    );
    assert!(rules.list_rules().await.is_empty());
}

#[tokio::test]
async fn test_redirect_failure_removes_rule_and_clone() {
    let storage = slow_storage(&[MIRROR_B]).await;
    let dom = Arc::new(FakeDom::new());
    let original = dom.add_resource(ResourceKind::Script, ORIGINAL, Some(DIGEST));
    dom.respond(ORIGINAL, LoadOutcome::Failed);
    let rules = Arc::new(RecordingRules::default());

    let replacer = redirect_replacer(&dom, &rules, storage);
    let report = replacer.process(&dom.sri_elements()).await;

    assert_eq!(report.failed(), 1);
    assert!(dom.is_attached(original));
    assert_eq!(dom.attached_urls(), vec![ORIGINAL]);
    assert!(rules.list_rules().await.is_empty());
}
