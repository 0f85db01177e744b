//! Run configuration for exploration and monitoring.

use std::path::PathBuf;
use std::time::Duration;

use droidmap_core::elements::analyze::MatchConfig;
use droidmap_core::error::ExploreError;
use droidmap_core::recognize::CategoryRule;

use crate::assist::operator::DEFAULT_AUTO_RESOLVE_DELAY;
use crate::assist::{ConsoleOperator, HeadlessOperator, Operator, DEFAULT_SCAN_INTERVAL};

pub const DEFAULT_MAX_DEPTH: usize = 10;
pub const MAX_DEPTH_LIMIT: usize = 50;
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);
pub const DEFAULT_LAUNCH_WAIT: Duration = Duration::from_secs(3);
pub const DEFAULT_INPUT_TEXT: &str = "test";
pub const DEFAULT_ASSIST_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MONITOR_DURATION: Duration = Duration::from_secs(300);

/// Who answers assistance requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistMode {
    /// Prompt on the terminal.
    Interactive,
    /// No human available.
    Headless,
}

#[derive(Debug, Clone)]
pub struct AssistConfig {
    pub mode: AssistMode,
    pub timeout: Duration,
    pub scan_interval: Duration,
    /// Headless only: treat blocked screens as passed after a short delay.
    pub assume_resolved: bool,
    pub auto_resolve_delay: Duration,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            mode: AssistMode::Interactive,
            timeout: DEFAULT_ASSIST_TIMEOUT,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            assume_resolved: false,
            auto_resolve_delay: DEFAULT_AUTO_RESOLVE_DELAY,
        }
    }
}

impl AssistConfig {
    pub fn operator(&self) -> Box<dyn Operator> {
        match (self.mode, self.assume_resolved) {
            (AssistMode::Interactive, _) => Box::new(ConsoleOperator::stdin()),
            (AssistMode::Headless, false) => Box::new(HeadlessOperator::declining()),
            (AssistMode::Headless, true) => {
                Box::new(HeadlessOperator::assume_resolved(self.auto_resolve_delay))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExploreConfig {
    pub package: String,
    pub max_depth: usize,
    /// Wait after each action before capturing.
    pub settle: Duration,
    /// Wait after launching the app before the first capture.
    pub launch_wait: Duration,
    /// Text typed into editable elements.
    pub input_text: String,
    /// Where screenshots and UI dumps go. Nothing is saved when unset.
    pub artifacts_dir: Option<PathBuf>,
    /// Extra page categories on top of the built-in ones.
    pub categories: Vec<CategoryRule>,
    pub assist: AssistConfig,
}

impl ExploreConfig {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            max_depth: DEFAULT_MAX_DEPTH,
            settle: DEFAULT_SETTLE,
            launch_wait: DEFAULT_LAUNCH_WAIT,
            input_text: DEFAULT_INPUT_TEXT.to_string(),
            artifacts_dir: None,
            categories: Vec::new(),
            assist: AssistConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ExploreError> {
        if self.package.trim().is_empty() {
            return Err(ExploreError::invalid_input("Package name must not be empty"));
        }
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            return Err(ExploreError::invalid_input_with_suggestion(
                format!("Invalid max depth {}", self.max_depth),
                format!("Use a depth between 1 and {MAX_DEPTH_LIMIT}."),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub package: String,
    pub interval: Duration,
    pub max_duration: Duration,
    /// Used to pair editable fields across polls.
    pub match_config: MatchConfig,
}

impl MonitorConfig {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            interval: DEFAULT_MONITOR_INTERVAL,
            max_duration: DEFAULT_MONITOR_DURATION,
            match_config: MatchConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ExploreError> {
        if self.interval.is_zero() {
            return Err(ExploreError::invalid_input_with_suggestion(
                "Polling interval must be greater than zero",
                "Use an interval of at least 100ms.",
            ));
        }
        Ok(())
    }
}

/// Parse `id:keyword,keyword` into a custom category rule.
pub fn parse_category(spec: &str) -> Result<CategoryRule, ExploreError> {
    let (id, keywords) = spec.split_once(':').ok_or_else(|| {
        ExploreError::invalid_input_with_suggestion(
            format!("Invalid category '{spec}'"),
            "Use the form id:keyword,keyword (e.g. checkout:cart,pay,order).",
        )
    })?;
    let id = id.trim();
    let keywords: Vec<&str> = keywords
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect();
    if id.is_empty() || keywords.is_empty() {
        return Err(ExploreError::invalid_input(format!(
            "Category '{spec}' needs an id and at least one keyword"
        )));
    }
    Ok(CategoryRule::new(id, id, &keywords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidmap_core::error::ErrorCode;

    #[test]
    fn explore_defaults() {
        let config = ExploreConfig::new("com.example");
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.settle, Duration::from_secs(2));
        assert_eq!(config.launch_wait, Duration::from_secs(3));
        assert_eq!(config.assist.timeout, Duration::from_secs(300));
        assert_eq!(config.assist.mode, AssistMode::Interactive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn depth_out_of_range_is_rejected() {
        let mut config = ExploreConfig::new("com.example");
        config.max_depth = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.suggestion.unwrap().contains("50"));

        config.max_depth = 51;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_package_is_rejected() {
        assert!(ExploreConfig::new("  ").validate().is_err());
    }

    #[test]
    fn monitor_defaults_and_zero_interval() {
        let mut config = MonitorConfig::new("com.example");
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.max_duration, Duration::from_secs(300));
        config.interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn category_specs() {
        let rule = parse_category("checkout: Cart, pay ,").unwrap();
        assert_eq!(rule.id, "checkout");
        assert_eq!(rule.keywords, vec!["cart", "pay"]);

        assert!(parse_category("no-colon").is_err());
        assert!(parse_category("empty:").is_err());
        assert!(parse_category(":cart").is_err());
    }
}
