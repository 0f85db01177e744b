//! Coverage report and diagram export.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use crate::catalogue::{Catalogue, SkippedBranch};
use crate::elements::analyze::is_interactive;
use crate::error::{ErrorCode, ExploreError};
use crate::graph::{NavigationSuggestion, StateGraph};
use crate::operation::{ActionKind, Operation};
use crate::page::PageId;

/// Edge labels are cut to this many terminal columns.
pub const LABEL_WIDTH: usize = 20;

/// Depth bound for the path listing in the report.
pub const PATH_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramFormat {
    Mermaid,
    Dot,
}

impl DiagramFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DiagramFormat::Mermaid => "mmd",
            DiagramFormat::Dot => "dot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathCoverage {
    pub coverage: f64,
    pub visited_pages: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub total: usize,
    pub failed: usize,
    pub by_kind: BTreeMap<ActionKind, usize>,
    /// Mean gap between consecutive operations, zero with fewer than two.
    pub average_interval_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
}

impl OperationStats {
    pub fn from_log(operations: &[Operation]) -> Self {
        let mut by_kind = BTreeMap::new();
        for op in operations {
            *by_kind.entry(op.kind).or_insert(0) += 1;
        }

        let mut timestamps: Vec<DateTime<Utc>> = operations.iter().map(|op| op.timestamp).collect();
        timestamps.sort();
        let average_interval_secs = match (timestamps.first(), timestamps.last()) {
            (Some(first), Some(last)) if timestamps.len() > 1 => {
                let span = (*last - *first).num_milliseconds() as f64 / 1000.0;
                span / (timestamps.len() - 1) as f64
            }
            _ => 0.0,
        };

        Self {
            total: operations.len(),
            failed: operations.iter().filter(|op| !op.success).count(),
            by_kind,
            average_interval_secs,
            first: timestamps.first().copied(),
            last: timestamps.last().copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub id: PageId,
    pub title: String,
    pub activity_name: String,
    pub element_count: usize,
    pub interactive_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub requires_assistance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistance_reason: Option<String>,
    pub unexplorable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    pub error_counts: BTreeMap<ErrorCode, usize>,
    pub errors: Vec<ExploreError>,
    pub skipped_branches: Vec<SkippedBranch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub app_name: String,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// The run was stopped before the traversal finished.
    pub cancelled: bool,
    pub total_pages: usize,
    pub total_transitions: usize,
    pub total_operations: usize,
    pub path_coverage: PathCoverage,
    pub operation_stats: OperationStats,
    pub cycles: Vec<Vec<PageId>>,
    /// Pages with a transition that lands back on the same page.
    #[serde(default)]
    pub self_loops: Vec<PageId>,
    pub dead_ends: Vec<PageId>,
    /// Maximal paths from the entry page, at most [`PATH_DEPTH`] steps long.
    pub paths: Vec<Vec<PageId>>,
    /// Outgoing edges per page, most travelled first.
    pub navigation: BTreeMap<PageId, Vec<NavigationSuggestion>>,
    pub pages: Vec<PageSummary>,
    pub annotations: Annotations,
    /// Mermaid rendering of the state graph.
    pub diagram: String,
}

impl CoverageReport {
    pub fn generate(catalogue: &Catalogue, cancelled: bool) -> Self {
        let graph = catalogue.graph();
        let (visited_pages, total_pages) = graph.coverage_counts();

        let pages = catalogue
            .pages()
            .map(|page| PageSummary {
                id: page.id.clone(),
                title: page.title.clone(),
                activity_name: page.activity_name.clone(),
                element_count: page.elements.len(),
                interactive_count: page.elements.iter().filter(|e| is_interactive(e)).count(),
                category: catalogue.recognizer().classify(page).primary,
                requires_assistance: page.requires_assistance,
                assistance_reason: page.assistance_reason.clone(),
                unexplorable: page.unexplorable,
                screenshot_path: page.screenshot_path.clone(),
                captured_at: page.captured_at,
            })
            .collect();

        let paths = catalogue
            .pages()
            .next()
            .map(|entry| graph.paths_from(&entry.id, PATH_DEPTH))
            .unwrap_or_default();
        let navigation = graph
            .nodes()
            .filter_map(|node| {
                let suggestions = graph.navigation_suggestions(&node.id);
                (!suggestions.is_empty()).then(|| (node.id.clone(), suggestions))
            })
            .collect();

        let mut error_counts = BTreeMap::new();
        for error in catalogue.errors() {
            *error_counts.entry(error.code).or_insert(0) += 1;
        }

        Self {
            app_name: catalogue.app_name().to_string(),
            started_at: catalogue.started_at(),
            generated_at: Utc::now(),
            cancelled,
            total_pages: catalogue.page_count(),
            total_transitions: graph.edge_count(),
            total_operations: catalogue.operations().len(),
            path_coverage: PathCoverage {
                coverage: graph.coverage(),
                visited_pages,
                total_pages,
            },
            operation_stats: OperationStats::from_log(catalogue.operations()),
            cycles: graph.strongly_connected_cycles(),
            self_loops: graph.self_loops(),
            dead_ends: graph.dead_ends(),
            paths,
            navigation,
            pages,
            annotations: Annotations {
                error_counts,
                errors: catalogue.errors().to_vec(),
                skipped_branches: catalogue.skipped_branches().to_vec(),
            },
            diagram: render_diagram(graph, DiagramFormat::Mermaid),
        }
    }
}

/// Render the graph as Mermaid or Graphviz text.
pub fn render_diagram(graph: &StateGraph, format: DiagramFormat) -> String {
    match format {
        DiagramFormat::Mermaid => render_mermaid(graph),
        DiagramFormat::Dot => render_dot(graph),
    }
}

fn render_mermaid(graph: &StateGraph) -> String {
    // Sanitized page ids can collide (`a.b_1` and `a_b_1`), so every node
    // gets its position as a prefix.
    let ids: HashMap<&PageId, String> = graph
        .nodes()
        .enumerate()
        .map(|(i, node)| (&node.id, format!("p{i}_{}", mermaid_id(&node.id))))
        .collect();
    let id_of = |page: &PageId| ids.get(page).cloned().unwrap_or_else(|| mermaid_id(page));

    let mut out = String::from("graph TD\n");
    for node in graph.nodes() {
        let _ = writeln!(out, "    {}[\"{}\"]", id_of(&node.id), mermaid_text(&node.label));
    }
    for edge in graph.transitions() {
        let label = format!("{}: {}", edge.kind, truncate_label(&edge.action_target, LABEL_WIDTH));
        let _ = writeln!(
            out,
            "    {} -->|{}| {}",
            id_of(&edge.source),
            mermaid_text(&label),
            id_of(&edge.target)
        );
    }
    out
}

fn render_dot(graph: &StateGraph) -> String {
    let mut out = String::from("digraph droidmap {\n    rankdir=TB;\n    node [shape=box];\n");
    for node in graph.nodes() {
        let style = if node.placeholder { ", style=dashed" } else { "" };
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\"{}];",
            dot_escape(node.id.as_str()),
            dot_escape(&node.label),
            style
        );
    }
    for edge in graph.transitions() {
        let label = format!("{}: {}", edge.kind, truncate_label(&edge.action_target, LABEL_WIDTH));
        let _ = writeln!(
            out,
            "    \"{}\" -> \"{}\" [label=\"{}\"];",
            dot_escape(edge.source.as_str()),
            dot_escape(edge.target.as_str()),
            dot_escape(&label)
        );
    }
    out.push_str("}\n");
    out
}

/// Mermaid node ids only allow word characters.
fn mermaid_id(id: &PageId) -> String {
    id.as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn mermaid_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('"', "#quot;")
        .replace('|', "#124;")
        .replace('\n', "<br/>")
}

fn dot_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("\r\n", "\\n")
        .replace('\r', "\\n")
        .replace('\n', "\\n")
}

/// Cut `text` to at most `max_width` display columns, appending `...` when cut.
pub fn truncate_label(text: &str, max_width: usize) -> String {
    let mut width = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if width + w > max_width {
            out.push_str("...");
            return out;
        }
        width += w;
        out.push(c);
    }
    out
}
