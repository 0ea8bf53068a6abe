//! Document access used by the collector and the replacer
//!
//! The page itself is an external collaborator. The engine only needs to
//! enumerate SRI-protected elements, create and move elements, and learn
//! whether an element finished loading. Load notification is modelled as a
//! [`LoadWatch`] future that resolves exactly once.

use crate::models::{host_of, ModelError, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

/// Opaque handle of an element owned by a [`Dom`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An SRI-protected element found on the page
#[derive(Debug, Clone, PartialEq)]
pub struct SriElement {
    pub id: ElementId,
    pub kind: ResourceKind,
    /// Absolute resource URL (`src` or `href` resolved against the page)
    pub url: String,
    /// Value of the `integrity` attribute
    pub integrity: Option<String>,
    /// `rel` attribute for link elements
    pub rel: Option<String>,
}

impl SriElement {
    pub fn host(&self) -> Result<String, ModelError> {
        host_of(&self.url)
    }
}

/// Attributes of an element to create
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSpec {
    pub kind: ResourceKind,
    pub url: String,
    pub integrity: Option<String>,
    pub cross_origin: Option<String>,
    pub rel: Option<String>,
}

impl ElementSpec {
    /// Same-tag copy of `original` pointing at `url`.
    ///
    /// The integrity value is carried over unchanged and the request is made
    /// in anonymous CORS mode, so the browser re-verifies the content.
    pub fn replacement_for(original: &SriElement, url: &str) -> Self {
        Self {
            kind: original.kind,
            url: url.to_string(),
            integrity: original.integrity.clone(),
            cross_origin: original
                .integrity
                .as_ref()
                .map(|_| "anonymous".to_string()),
            rel: original.rel.clone(),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }
}

/// How an element's load settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed,
}

/// Single-resolution future for an element's load or error event.
///
/// If the notifying side goes away without resolving, the watch resolves
/// to [`LoadOutcome::Failed`].
#[derive(Debug)]
pub struct LoadWatch {
    rx: oneshot::Receiver<LoadOutcome>,
}

/// Resolving half of a [`LoadWatch`]
#[derive(Debug)]
pub struct LoadNotifier {
    tx: oneshot::Sender<LoadOutcome>,
}

impl LoadNotifier {
    /// Resolve the paired watch; a dropped watch is ignored
    pub fn resolve(self, outcome: LoadOutcome) {
        let _ = self.tx.send(outcome);
    }
}

impl LoadWatch {
    /// A pending watch together with the handle that resolves it
    pub fn pending() -> (LoadNotifier, LoadWatch) {
        let (tx, rx) = oneshot::channel();
        (LoadNotifier { tx }, LoadWatch { rx })
    }

    /// A watch that is already resolved
    pub fn settled(outcome: LoadOutcome) -> LoadWatch {
        let (notifier, watch) = Self::pending();
        notifier.resolve(outcome);
        watch
    }
}

impl Future for LoadWatch {
    type Output = LoadOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(LoadOutcome::Failed))
    }
}

/// Errors raised by DOM primitives
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("unknown element {0}")]
    UnknownElement(ElementId),
    #[error("element {0} is not attached to the document")]
    Detached(ElementId),
    #[error("element {0} is already attached")]
    AlreadyAttached(ElementId),
}

/// Page document primitives
pub trait Dom: Send + Sync {
    /// Attached elements with a resource reference and an `integrity`
    /// attribute, in document order
    fn sri_elements(&self) -> Vec<SriElement>;

    /// Create a detached element
    fn create_element(&self, spec: ElementSpec) -> Result<ElementId, DomError>;

    /// Attach `element` right after `anchor`
    fn insert_after(&self, anchor: ElementId, element: ElementId) -> Result<(), DomError>;

    /// Put `new` where `old` is and detach `old`
    fn replace(&self, old: ElementId, new: ElementId) -> Result<(), DomError>;

    /// Detach an element
    fn remove(&self, element: ElementId) -> Result<(), DomError>;

    /// Watch the next load or error event of `element`
    fn watch_load(&self, element: ElementId) -> LoadWatch;
}
