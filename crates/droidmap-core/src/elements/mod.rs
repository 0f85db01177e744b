//! UI element types.
//!
//! An [`Element`] is one control pulled out of a UI-tree dump. The parser
//! produces them (see [`parse`]), the analyzer scores and compares them (see
//! [`analyze`]).
//!
//! # Attribute model
//!
//! Known device attributes get typed fields. Anything the parser does not
//! recognize is kept verbatim in [`Element::extra`] so newer dump formats do
//! not lose information.

pub mod analyze;
pub mod parse;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Screen rectangle in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    #[must_use]
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Integer center point, the tap target for this rectangle.
    #[must_use]
    pub fn center(&self) -> (i32, i32) {
        (midpoint(self.left, self.right), midpoint(self.top, self.bottom))
    }

    #[must_use]
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    #[must_use]
    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    /// Area in px². Degenerate rectangles yield zero or a negative value.
    #[must_use]
    pub fn area(&self) -> i64 {
        self.width().saturating_mul(self.height())
    }

    /// Whether a point lies inside the rectangle (right/bottom exclusive).
    #[must_use]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Truncating midpoint, computed wide so any pair of coordinates works.
fn midpoint(a: i32, b: i32) -> i32 {
    // The mean of two i32 values is always an i32.
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{}][{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Boolean state flags reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementFlags {
    pub clickable: bool,
    pub long_clickable: bool,
    pub scrollable: bool,
    pub enabled: bool,
    pub focusable: bool,
    pub focused: bool,
    pub selected: bool,
    pub checkable: bool,
    pub checked: bool,
    pub password: bool,
}

/// A UI control extracted from one capture.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Screen rectangle. `None` when the dump had no parseable bounds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,

    #[serde(default)]
    pub flags: ElementFlags,

    /// Whether the control accepts text.
    ///
    /// `None` means the dump did not say and the class name gave no hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,

    /// Heuristic priority, see [`analyze::importance`].
    pub importance: f64,

    /// Attributes the parser does not model.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Element {
    /// Non-empty text, if any.
    pub fn text(&self) -> Option<&str> {
        non_empty(self.text.as_deref())
    }

    /// Non-empty resource id, if any.
    pub fn resource_id(&self) -> Option<&str> {
        non_empty(self.resource_id.as_deref())
    }

    /// Non-empty content description, if any.
    pub fn content_desc(&self) -> Option<&str> {
        non_empty(self.content_desc.as_deref())
    }

    /// Non-empty class name, if any.
    pub fn class_name(&self) -> Option<&str> {
        non_empty(self.class_name.as_deref())
    }

    /// Whether the element is known to accept text.
    pub fn is_editable(&self) -> bool {
        self.editable.unwrap_or(false)
    }

    /// Short human-readable descriptor used for edge labels and logs.
    ///
    /// Prefers text, then content description, then resource id, then the
    /// bounds rectangle.
    pub fn descriptor(&self) -> String {
        if let Some(text) = self.text() {
            return text.to_string();
        }
        if let Some(desc) = self.content_desc() {
            return desc.to_string();
        }
        if let Some(id) = self.resource_id() {
            return id.to_string();
        }
        match self.bounds {
            Some(bounds) => bounds.to_string(),
            None => "unknown".to_string(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
