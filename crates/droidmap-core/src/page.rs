//! Captured screen state.
//!
//! A [`Page`] is one captured, fingerprinted snapshot of the app's visible
//! screen. Pages are created once per capture; the only field that changes
//! afterwards is the assistance flag.
//!
//! # Change detection
//!
//! Every page carries a [`PageSignature`](crate::recognize::PageSignature)
//! built from fast FNV-1a hashes. Comparing signatures is how the explorer
//! decides whether a screen was already catalogued:
//!
//! ```ignore
//! if recognizer.find_duplicate(&page.signature).is_none() {
//!     // new screen, expand it
//! }
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::elements::parse::{extract_activity_name, extract_title, parse_hierarchy};
use crate::elements::Element;
use crate::recognize::PageSignature;

/// Activity name used when neither the device nor the dump reported one.
pub const UNKNOWN_ACTIVITY: &str = "unknown";

/// Unique page identifier within one exploration session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub String);

impl PageId {
    /// Build the canonical `{app}_{unix-seconds}` id.
    pub fn from_capture(app_name: &str, captured_at: DateTime<Utc>) -> Self {
        Self(format!("{}_{}", app_name, captured_at.timestamp()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Raw material of one capture, before it becomes a [`Page`].
#[derive(Debug, Clone, Default)]
pub struct CaptureInput {
    /// Foreground app as reported by the device, `package` or `package/activity`.
    pub current_app: String,
    /// Raw UI-tree dump.
    pub ui_hierarchy: String,
    /// Where the screenshot was stored, if one was taken.
    pub screenshot_path: Option<PathBuf>,
    /// Screenshot bytes, used only for the signature hash.
    pub screenshot_bytes: Option<Vec<u8>>,
}

/// One catalogued screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub app_name: String,
    pub activity_name: String,
    pub title: String,
    pub elements: Vec<Element>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
    /// Raw UI-tree dump the elements were parsed from.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ui_hierarchy: String,
    pub captured_at: DateTime<Utc>,
    pub requires_assistance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistance_reason: Option<String>,
    /// Set on placeholder pages produced after a failed capture.
    #[serde(default)]
    pub unexplorable: bool,
    pub signature: PageSignature,
}

impl Page {
    /// Build a page from a capture.
    ///
    /// The id is provisional: the catalogue may suffix it to keep ids unique.
    pub fn from_capture(input: CaptureInput, captured_at: DateTime<Utc>) -> Self {
        let (app_name, device_activity) = split_current_app(&input.current_app);
        let elements = parse_hierarchy(&input.ui_hierarchy);
        let title = extract_title(&elements);
        let activity_name = device_activity
            .or_else(|| extract_activity_name(&input.ui_hierarchy))
            .unwrap_or_else(|| UNKNOWN_ACTIVITY.to_string());

        let signature = PageSignature::new(
            &title,
            &activity_name,
            elements.len(),
            input.screenshot_bytes.as_deref(),
            Some(&input.ui_hierarchy).filter(|h| !h.is_empty()).map(String::as_str),
        );

        Self {
            id: PageId::from_capture(&app_name, captured_at),
            app_name,
            activity_name,
            title,
            elements,
            screenshot_path: input.screenshot_path,
            ui_hierarchy: input.ui_hierarchy,
            captured_at,
            requires_assistance: false,
            assistance_reason: None,
            unexplorable: false,
            signature,
        }
    }

    /// Placeholder for a capture that failed. Never expanded.
    pub fn placeholder(app_name: &str, captured_at: DateTime<Utc>) -> Self {
        let title = "unavailable".to_string();
        let signature = PageSignature::new(&title, UNKNOWN_ACTIVITY, 0, None, None);
        Self {
            id: PageId::from_capture(app_name, captured_at),
            app_name: app_name.to_string(),
            activity_name: UNKNOWN_ACTIVITY.to_string(),
            title,
            elements: Vec::new(),
            screenshot_path: None,
            ui_hierarchy: String::new(),
            captured_at,
            requires_assistance: false,
            assistance_reason: None,
            unexplorable: true,
            signature,
        }
    }

    /// Flag this page as needing external help.
    pub fn mark_requires_assistance(&mut self, reason: impl Into<String>) {
        self.requires_assistance = true;
        self.assistance_reason = Some(reason.into());
    }

    /// Label for diagrams: title, or activity when untitled.
    pub fn label(&self) -> &str {
        if self.title.is_empty() || self.title == crate::elements::parse::UNTITLED {
            &self.activity_name
        } else {
            &self.title
        }
    }
}

/// Split `package/activity` as reported by the device.
pub fn split_current_app(current: &str) -> (String, Option<String>) {
    let current = current.trim();
    if current.is_empty() {
        return ("unknown".to_string(), None);
    }
    match current.split_once('/') {
        Some((package, activity)) if !activity.is_empty() => {
            (package.to_string(), Some(activity.to_string()))
        }
        Some((package, _)) => (package.to_string(), None),
        None => (current.to_string(), None),
    }
}

/// Compute a content hash from text.
///
/// Uses FNV-1a, a fast non-cryptographic hash suitable for change detection.
#[must_use]
pub fn compute_content_hash(text: &str) -> u64 {
    compute_bytes_hash(text.as_bytes())
}

/// FNV-1a over raw bytes.
#[must_use]
pub fn compute_bytes_hash(bytes: &[u8]) -> u64 {
    // FNV-1a parameters for 64-bit
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001B3;

    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
