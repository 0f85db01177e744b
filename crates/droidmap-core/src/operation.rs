//! Operation log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::elements::Element;
use crate::page::PageId;

/// Kind of device action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tap,
    Input,
    Swipe,
    Back,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Tap => "tap",
            ActionKind::Input => "input",
            ActionKind::Swipe => "swipe",
            ActionKind::Back => "back",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One performed (or attempted) action. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Element>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<(i32, i32)>,
    pub source_page: PageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_page: Option<PageId>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Operation {
    /// Start building an operation stamped with the current time.
    pub fn new(kind: ActionKind, source_page: PageId) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            target: None,
            input_text: None,
            coordinates: None,
            source_page,
            target_page: None,
            success: true,
            duration_ms: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach the acted-on element; coordinates default to its center.
    pub fn on(mut self, element: &Element) -> Self {
        if self.coordinates.is_none() {
            self.coordinates = element.bounds.map(|b| b.center());
        }
        self.target = Some(element.clone());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.input_text = Some(text.into());
        self
    }

    pub fn with_coordinates(mut self, x: i32, y: i32) -> Self {
        self.coordinates = Some((x, y));
        self
    }

    pub fn leading_to(mut self, page: PageId) -> Self {
        self.target_page = Some(page);
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn took_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Edge label for this operation.
    pub fn target_descriptor(&self) -> String {
        match (&self.target, self.kind) {
            (Some(element), _) => element.descriptor(),
            (None, ActionKind::Back) => "back".to_string(),
            (None, _) => match self.coordinates {
                Some((x, y)) => format!("({x},{y})"),
                None => "unknown".to_string(),
            },
        }
    }
}
