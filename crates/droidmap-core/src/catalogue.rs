//! Session context for one exploration or monitoring run.
//!
//! The [`Catalogue`] owns everything a run learns: captured pages, the
//! append-only operation log, the state graph, the recognizer's signature
//! set and the error annotations. It is created by the caller and passed by
//! reference; nothing here is global.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ExploreError;
use crate::graph::{GraphExport, StateGraph};
use crate::operation::{ActionKind, Operation};
use crate::page::{Page, PageId};
use crate::recognize::{PageSignature, Recognizer};

/// A branch the explorer gave up on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedBranch {
    pub page: PageId,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Catalogue {
    app_name: String,
    started_at: DateTime<Utc>,
    pages: HashMap<PageId, Page>,
    page_order: Vec<PageId>,
    operations: Vec<Operation>,
    graph: StateGraph,
    recognizer: Recognizer,
    errors: Vec<ExploreError>,
    skipped: Vec<SkippedBranch>,
}

impl Catalogue {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self::with_recognizer(app_name, Recognizer::new())
    }

    /// Start a catalogue with a preconfigured recognizer (custom categories).
    pub fn with_recognizer(app_name: impl Into<String>, recognizer: Recognizer) -> Self {
        Self {
            app_name: app_name.into(),
            started_at: Utc::now(),
            pages: HashMap::new(),
            page_order: Vec::new(),
            operations: Vec::new(),
            graph: StateGraph::new(),
            recognizer,
            errors: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Add a page, making its id unique within the session.
    ///
    /// Returns the id the page was stored under. Colliding ids get a `_{n}`
    /// suffix. Unexplorable placeholders are kept out of the recognizer so
    /// they never count as duplicates of anything.
    pub fn register_page(&mut self, mut page: Page) -> PageId {
        page.id = self.reserve_id(&page.id);
        let id = page.id.clone();

        self.graph.add_page_node(&page);
        if !page.unexplorable {
            self.recognizer.register(id.clone(), page.signature.clone());
        }
        debug!(page = %id, title = %page.title, elements = page.elements.len(), "Registered page");
        self.page_order.push(id.clone());
        self.pages.insert(id.clone(), page);
        id
    }

    /// The id `proposed` would be stored under if registered now.
    pub fn reserve_id(&self, proposed: &PageId) -> PageId {
        if !self.pages.contains_key(proposed) {
            return proposed.clone();
        }
        let mut n = 1;
        loop {
            let candidate = PageId(format!("{}_{}", proposed.0, n));
            if !self.pages.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn page(&self, id: &PageId) -> Option<&Page> {
        self.pages.get(id)
    }

    /// Pages in registration order.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.page_order.iter().filter_map(|id| self.pages.get(id))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn mark_requires_assistance(&mut self, id: &PageId, reason: &str) {
        if let Some(page) = self.pages.get_mut(id) {
            page.mark_requires_assistance(reason);
        }
    }

    /// Best already-catalogued page matching `signature`.
    pub fn find_duplicate(&self, signature: &PageSignature) -> Option<PageId> {
        self.recognizer.find_duplicate(signature).map(|(id, _)| id)
    }

    pub fn recognizer(&self) -> &Recognizer {
        &self.recognizer
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn errors(&self) -> &[ExploreError] {
        &self.errors
    }

    pub fn skipped_branches(&self) -> &[SkippedBranch] {
        &self.skipped
    }

    /// Append an operation to the log.
    ///
    /// A successful operation with a target page also upserts the edge
    /// `source -> target`.
    pub fn record_operation(&mut self, operation: Operation) {
        if operation.success {
            if let Some(target) = operation.target_page.clone() {
                let descriptor = operation.target_descriptor();
                self.link(&operation.source_page, &target, operation.kind, &descriptor, Some(&operation));
            }
        }
        self.operations.push(operation);
    }

    /// Record an edge without an operation behind it.
    pub fn record_transition(
        &mut self,
        source: &PageId,
        target: &PageId,
        kind: ActionKind,
        action_target: &str,
    ) {
        self.link(source, target, kind, action_target, None);
    }

    fn link(
        &mut self,
        source: &PageId,
        target: &PageId,
        kind: ActionKind,
        action_target: &str,
        operation: Option<&Operation>,
    ) {
        let created = self
            .graph
            .add_transition(source, target, kind, action_target, operation);
        for missing in created {
            self.errors.push(ExploreError::graph_inconsistency(
                source.as_str(),
                target.as_str(),
                missing.as_str(),
            ));
        }
    }

    pub fn record_error(&mut self, error: ExploreError) {
        debug!(code = %error.code, message = %error.message, "Recorded error");
        self.errors.push(error);
    }

    pub fn record_skipped_branch(&mut self, page: &PageId, reason: impl Into<String>) {
        let reason = reason.into();
        info!(page = %page, reason = %reason, "Skipped branch");
        self.skipped.push(SkippedBranch {
            page: page.clone(),
            reason,
            at: Utc::now(),
        });
    }

    pub fn export(&self) -> CatalogueExport {
        CatalogueExport {
            app_name: self.app_name.clone(),
            started_at: self.started_at,
            pages: self.pages().cloned().collect(),
            graph: self.graph.export(),
            operations: self.operations.clone(),
            errors: self.errors.clone(),
            skipped_branches: self.skipped.clone(),
        }
    }
}

/// Serializable snapshot of a catalogue: pages, graph and operation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueExport {
    pub app_name: String,
    pub started_at: DateTime<Utc>,
    pub pages: Vec<Page>,
    pub graph: GraphExport,
    pub operations: Vec<Operation>,
    pub errors: Vec<ExploreError>,
    pub skipped_branches: Vec<SkippedBranch>,
}
