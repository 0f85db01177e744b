//! Exploration error records with suggestions.
//!
//! Nothing in the exploration engine aborts a session. Failures are absorbed
//! where they happen and kept as [`ExploreError`] records, which end up as
//! annotations in the coverage report.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for exploration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// UI hierarchy or screenshot could not be captured.
    CaptureFailed,
    /// A tap, input or back action failed on the device.
    ActionFailed,
    /// An assistance session expired before anyone resolved it.
    AssistanceTimeout,
    /// An assistance session was aborted.
    AssistanceCancelled,
    /// An edge referenced a page that was not in the graph.
    GraphInconsistency,
    InvalidInput,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::CaptureFailed => write!(f, "CAPTURE_FAILED"),
            ErrorCode::ActionFailed => write!(f, "ACTION_FAILED"),
            ErrorCode::AssistanceTimeout => write!(f, "ASSISTANCE_TIMEOUT"),
            ErrorCode::AssistanceCancelled => write!(f, "ASSISTANCE_CANCELLED"),
            ErrorCode::GraphInconsistency => write!(f, "GRAPH_INCONSISTENCY"),
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// A recorded failure with operator-facing context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploreError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ExploreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExploreError {}

impl ExploreError {
    pub fn capture_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::CaptureFailed,
            message: message.into(),
            suggestion: Some(
                "Check that the device is connected and the screen is unlocked".into(),
            ),
        }
    }

    /// Create an action failure for a specific action kind and target.
    pub fn action_failed(action: &str, target: &str, error: &str) -> Self {
        Self {
            code: ErrorCode::ActionFailed,
            message: format!("Failed to {} '{}': {}", action, target, error),
            suggestion: Some(
                "The element may have moved or the app may have changed screens".into(),
            ),
        }
    }

    pub fn assistance_timeout(reason: &str, timeout_secs: u64) -> Self {
        Self {
            code: ErrorCode::AssistanceTimeout,
            message: format!(
                "Assistance for '{}' not resolved within {}s",
                reason, timeout_secs
            ),
            suggestion: Some("Increase --assist-timeout or resolve the prompt sooner".into()),
        }
    }

    pub fn assistance_cancelled(reason: &str) -> Self {
        Self {
            code: ErrorCode::AssistanceCancelled,
            message: format!("Assistance for '{}' was cancelled", reason),
            suggestion: Some("The blocked screen and everything behind it was skipped".into()),
        }
    }

    /// Create an error for an edge whose endpoint was missing from the graph.
    pub fn graph_inconsistency(source: &str, target: &str, missing: &str) -> Self {
        Self {
            code: ErrorCode::GraphInconsistency,
            message: format!(
                "Transition {} -> {} referenced unknown page '{}'",
                source, target, missing
            ),
            suggestion: Some("A placeholder node was created for the missing page".into()),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some("Check the command arguments and try again".into()),
        }
    }

    /// Create an invalid input error with a custom suggestion.
    pub fn invalid_input_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
            suggestion: Some("This is an internal error. Please report it if it persists.".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every constructor must carry a suggestion for the report reader.
    fn assert_has_suggestion(err: &ExploreError, context: &str) {
        assert!(
            err.suggestion.is_some(),
            "{} should have a suggestion, but got None",
            context
        );
    }

    #[test]
    fn test_capture_failed_has_suggestion() {
        let err = ExploreError::capture_failed("uiautomator dump returned nothing");
        assert_has_suggestion(&err, "capture_failed");
        assert_eq!(err.code, ErrorCode::CaptureFailed);
        assert!(err.message.contains("uiautomator"));
    }

    #[test]
    fn test_action_failed_includes_target() {
        let err = ExploreError::action_failed("tap", "btn_login", "device offline");
        assert_has_suggestion(&err, "action_failed");
        assert!(err.message.contains("tap"));
        assert!(err.message.contains("btn_login"));
        assert!(err.message.contains("device offline"));
    }

    #[test]
    fn test_assistance_errors_have_suggestions() {
        let timeout = ExploreError::assistance_timeout("fingerprint", 300);
        assert_has_suggestion(&timeout, "assistance_timeout");
        assert!(timeout.message.contains("300s"));

        let cancelled = ExploreError::assistance_cancelled("captcha");
        assert_has_suggestion(&cancelled, "assistance_cancelled");
        assert_eq!(cancelled.code, ErrorCode::AssistanceCancelled);
    }

    #[test]
    fn test_graph_inconsistency_names_missing_page() {
        let err = ExploreError::graph_inconsistency("a", "b", "b");
        assert_has_suggestion(&err, "graph_inconsistency");
        assert!(err.message.contains("'b'"));
    }

    #[test]
    fn test_invalid_input_with_custom_suggestion() {
        let err = ExploreError::invalid_input_with_suggestion("bad depth", "Use 1..=50");
        assert_eq!(err.suggestion.as_deref(), Some("Use 1..=50"));
        assert_has_suggestion(&ExploreError::invalid_input("x"), "invalid_input");
        assert_has_suggestion(&ExploreError::internal("x"), "internal");
    }

    #[test]
    fn test_display_format_with_suggestion() {
        let err = ExploreError::capture_failed("no hierarchy");
        let display = format!("{}", err);
        assert!(display.contains("[CAPTURE_FAILED]"));
        assert!(display.contains("no hierarchy"));
        assert!(display.contains("(hint:"));
    }

    #[test]
    fn test_json_round_trip_uses_screaming_codes() {
        let err = ExploreError::action_failed("back", "page_1", "timeout");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("ACTION_FAILED"));

        let parsed: ExploreError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }
}
