//! Element scoring: importance and pairwise matching.
//!
//! # Importance
//!
//! | Signal | Weight |
//! |--------|--------|
//! | text present | 3.0 (+1.0 if longer than 10 chars) |
//! | resource-id present | 2.5 |
//! | content-desc present | 2.0 |
//! | clickable | 1.5 |
//! | editable | 1.5 |
//! | class mentions button/text/edit/input/menu/list | 0.5 each |
//! | area in (1000, 10000) px² | 0.5 |
//!
//! Elements scoring at least [`INTERACTIVE_THRESHOLD`] are interactive.
//!
//! # Matching
//!
//! Two captures of the "same" control rarely agree on every attribute, so
//! matching is a weighted vote over the attributes both sides actually have.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::elements::{Bounds, Element};

/// Minimum importance for an element to be acted upon.
pub const INTERACTIVE_THRESHOLD: f64 = 2.0;

/// Class-name fragments that hint at an interactive or content control.
const IMPORTANT_CLASS_HINTS: [&str; 6] = ["button", "text", "edit", "input", "menu", "list"];

/// Knobs for element matching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Maximum Manhattan distance between centers for bounds to be "similar".
    pub bounds_threshold: i32,
    /// Minimum score for two elements to be the same control.
    pub match_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            bounds_threshold: 50,
            match_threshold: 0.6,
        }
    }
}

/// Heuristic priority of an element. Non-negative, uncapped.
pub fn importance(element: &Element) -> f64 {
    let mut score = 0.0;

    if let Some(text) = element.text().map(str::trim).filter(|t| !t.is_empty()) {
        score += 3.0;
        if text.chars().count() > 10 {
            score += 1.0;
        }
    }
    if element.resource_id().is_some() {
        score += 2.5;
    }
    if element.content_desc().is_some() {
        score += 2.0;
    }
    if element.flags.clickable {
        score += 1.5;
    }
    if element.is_editable() {
        score += 1.5;
    }

    if let Some(class) = element.class_name() {
        let class = class.to_lowercase();
        let hits = IMPORTANT_CLASS_HINTS
            .iter()
            .filter(|hint| class.contains(*hint))
            .count();
        score += 0.5 * hits as f64;
    }

    if let Some(bounds) = element.bounds {
        let area = bounds.area();
        if area > 1_000 && area < 10_000 {
            score += 0.5;
        }
    }

    score
}

/// Whether an element is worth acting on.
pub fn is_interactive(element: &Element) -> bool {
    element.importance >= INTERACTIVE_THRESHOLD
}

/// Interactive elements, most important first.
///
/// The sort is stable, so ties keep document order.
pub fn interactive_elements(elements: &[Element]) -> Vec<Element> {
    let mut interactive: Vec<Element> = elements.iter().filter(|e| is_interactive(e)).cloned().collect();
    interactive.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    interactive
}

/// Whether two rectangles have centers within `threshold` (Manhattan).
pub fn bounds_similar(a: &Bounds, b: &Bounds, threshold: i32) -> bool {
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    let distance = (i64::from(ax) - i64::from(bx)).abs() + (i64::from(ay) - i64::from(by)).abs();
    distance <= i64::from(threshold)
}

/// Weighted agreement between two elements, in `[0, 1]`.
///
/// A component contributes to the denominator only when both elements carry
/// a value for it. Clickability always contributes. Editability contributes
/// when at least one side knows it; an unknown side compares as `false`.
pub fn similarity(a: &Element, b: &Element, config: &MatchConfig) -> f64 {
    let mut matched = 0u32;
    let mut counted = 0u32;

    let mut vote = |left: Option<&str>, right: Option<&str>, weight: u32| {
        if let (Some(l), Some(r)) = (left, right) {
            counted += weight;
            if l == r {
                matched += weight;
            }
        }
    };
    vote(a.resource_id(), b.resource_id(), 10);
    vote(a.text(), b.text(), 8);
    vote(a.content_desc(), b.content_desc(), 6);
    vote(a.class_name(), b.class_name(), 5);

    if let (Some(ab), Some(bb)) = (a.bounds, b.bounds) {
        counted += 7;
        if bounds_similar(&ab, &bb, config.bounds_threshold) {
            matched += 7;
        }
    }

    counted += 2;
    if a.flags.clickable == b.flags.clickable {
        matched += 2;
    }

    if a.editable.is_some() || b.editable.is_some() {
        counted += 2;
        if a.is_editable() == b.is_editable() {
            matched += 2;
        }
    }

    f64::from(matched) / f64::from(counted)
}

/// Whether two elements are the same control.
pub fn elements_match(a: &Element, b: &Element, config: &MatchConfig) -> bool {
    similarity(a, b, config) >= config.match_threshold
}

/// Best-scoring candidate for `target`, if any candidate scores above zero.
pub fn find_best_match<'a>(
    target: &Element,
    candidates: &'a [Element],
    config: &MatchConfig,
) -> Option<(&'a Element, f64)> {
    let mut best: Option<(&Element, f64)> = None;
    for candidate in candidates {
        let score = similarity(target, candidate, config);
        if score > best.map_or(0.0, |(_, s)| s) {
            best = Some((candidate, score));
        }
    }
    best
}

/// Coarse widget family derived from the class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementGroup {
    Buttons,
    InputFields,
    TextViews,
    ImageViews,
    Lists,
    Others,
}

impl ElementGroup {
    pub fn of(element: &Element) -> Self {
        let class = element.class_name().unwrap_or_default().to_lowercase();
        if class.contains("button") {
            ElementGroup::Buttons
        } else if class.contains("text") && class.contains("edit") {
            ElementGroup::InputFields
        } else if class.contains("text") {
            ElementGroup::TextViews
        } else if class.contains("image") {
            ElementGroup::ImageViews
        } else if class.contains("list") || class.contains("recycler") {
            ElementGroup::Lists
        } else {
            ElementGroup::Others
        }
    }
}

/// Group elements by widget family, preserving order within each group.
pub fn group_by_kind(elements: &[Element]) -> BTreeMap<ElementGroup, Vec<&Element>> {
    let mut groups: BTreeMap<ElementGroup, Vec<&Element>> = BTreeMap::new();
    for element in elements {
        groups.entry(ElementGroup::of(element)).or_default().push(element);
    }
    groups
}
