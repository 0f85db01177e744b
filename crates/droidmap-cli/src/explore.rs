//! Depth-first traversal of an app's screens.
//!
//! The explorer launches the app, captures the entry screen and then works
//! through an explicit stack of frames. A frame is a page plus the
//! interactive elements not tried yet. Each step acts on one element, waits
//! for the UI to settle and captures the result:
//!
//! - unchanged screen: logged, no edge
//! - known page: edge recorded, then back to the frame's page
//! - new page: registered and pushed as a frame one level deeper
//! - blocked page: handed to the assistance coordinator first
//!
//! Exhausted frames (and frames at the depth bound) are popped with a back
//! press. Failures are recorded in the catalogue and never end the run; only
//! cancellation does.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use droidmap_core::catalogue::Catalogue;
use droidmap_core::elements::analyze::interactive_elements;
use droidmap_core::elements::Element;
use droidmap_core::error::ExploreError;
use droidmap_core::operation::{ActionKind, Operation};
use droidmap_core::page::{CaptureInput, Page, PageId};
use droidmap_core::recognize::{detect_assistance, BlockReason, Recognizer};
use droidmap_core::report::CoverageReport;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assist::{AssistanceCoordinator, AssistanceRequest, AssistanceState, Operator};
use crate::config::ExploreConfig;
use crate::device::{Device, DeviceError};

/// Screenshot of the latest capture, renamed once the page is kept.
const PENDING_SCREENSHOT: &str = ".capture.png";

struct Frame {
    page: PageId,
    remaining: VecDeque<Element>,
    depth: usize,
}

enum Step {
    Stay,
    Descend(Frame),
    Stopped,
}

/// A capture not yet in the catalogue.
struct Captured {
    page: Page,
    screenshot: Option<PathBuf>,
}

/// Result of checking a capture for a blocking screen.
enum Gate {
    Clear,
    Passed(BlockReason),
    Blocked(BlockReason, ExploreError),
}

pub struct ExploreOutcome {
    pub catalogue: Catalogue,
    pub report: CoverageReport,
}

pub struct Explorer {
    device: Arc<dyn Device>,
    coordinator: Arc<AssistanceCoordinator>,
    operator: Arc<dyn Operator>,
    config: ExploreConfig,
    cancel: CancellationToken,
}

impl Explorer {
    pub fn new(
        device: Arc<dyn Device>,
        coordinator: Arc<AssistanceCoordinator>,
        operator: Arc<dyn Operator>,
        config: ExploreConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            device,
            coordinator,
            operator,
            config,
            cancel,
        }
    }

    /// Explore the configured app and build the coverage report.
    ///
    /// Always returns a report; `report.cancelled` tells whether the run was
    /// stopped early.
    pub async fn explore(&self) -> ExploreOutcome {
        let mut recognizer = Recognizer::new();
        for rule in &self.config.categories {
            if let Err(e) = recognizer.add_custom_category(rule.clone()) {
                warn!("Ignoring custom category: {}", e);
            }
        }
        let mut catalogue = Catalogue::with_recognizer(&self.config.package, recognizer);

        let cancelled = self.run(&mut catalogue).await;
        let report = CoverageReport::generate(&catalogue, cancelled);
        info!(
            pages = report.total_pages,
            transitions = report.total_transitions,
            operations = report.total_operations,
            coverage = report.path_coverage.coverage,
            cancelled,
            "Exploration finished"
        );
        ExploreOutcome { catalogue, report }
    }

    /// Traverse into `catalogue`. Returns true if cancelled before finishing.
    pub async fn run(&self, catalogue: &mut Catalogue) -> bool {
        let package = self.config.package.as_str();
        info!(package, max_depth = self.config.max_depth, "Starting exploration");

        if let Some(dir) = &self.config.artifacts_dir {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!("Failed to create {}: {}", dir.display(), e);
            }
        }

        if let Err(e) = self.device.launch_app(package).await {
            warn!("Failed to launch {}: {}", package, e);
            catalogue.record_error(ExploreError::action_failed("launch", package, &e.to_string()));
        }
        if self.pause(self.config.launch_wait).await {
            return true;
        }

        let captured = self.capture(catalogue).await;
        if captured.page.unexplorable {
            let id = catalogue.register_page(captured.page);
            warn!(page = %id, "Entry screen could not be captured, nothing to explore");
            return self.cancel.is_cancelled();
        }

        if captured.page.app_name != package {
            warn!(app = %captured.page.app_name, "Entry screen belongs to another app, nothing to explore");
            catalogue.record_error(ExploreError::capture_failed(format!(
                "Foreground app after launch is {}, not {}",
                captured.page.app_name, package
            )));
            return self.cancel.is_cancelled();
        }

        let assisted = match self.gate(&captured.page).await {
            Gate::Clear => None,
            Gate::Passed(reason) => Some(reason),
            Gate::Blocked(reason, error) => {
                let id = self.store(catalogue, captured, Some(reason)).await;
                catalogue.record_error(error);
                catalogue.record_skipped_branch(&id, format!("{} not resolved", reason.reason()));
                return self.cancel.is_cancelled();
            }
        };
        let remaining = interactive_elements(&captured.page.elements).into();
        let root = self.store(catalogue, captured, assisted).await;
        info!(page = %root, "Entry page captured");

        let mut stack = vec![Frame {
            page: root,
            remaining,
            depth: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            if self.cancel.is_cancelled() {
                return true;
            }

            let next = if frame.depth < self.config.max_depth {
                frame.remaining.pop_front()
            } else {
                None
            };
            let Some(element) = next else {
                let Some(done) = stack.pop() else { break };
                if let Some(parent) = stack.last() {
                    debug!(page = %done.page, "Frame exhausted, backing out");
                    if self.go_back(catalogue, &done.page, &parent.page).await {
                        return true;
                    }
                }
                continue;
            };

            let source = frame.page.clone();
            let depth = frame.depth;
            match self.step(catalogue, &source, depth, element).await {
                Step::Stay => {}
                Step::Descend(child) => stack.push(child),
                Step::Stopped => return true,
            }
        }

        self.cancel.is_cancelled()
    }

    async fn step(
        &self,
        catalogue: &mut Catalogue,
        source: &PageId,
        depth: usize,
        element: Element,
    ) -> Step {
        let started = Instant::now();
        let (kind, result) = self.act(&element).await;
        let mut operation = Operation::new(kind, source.clone())
            .on(&element)
            .took_ms(elapsed_ms(started));
        if kind == ActionKind::Input {
            operation = operation.with_text(&self.config.input_text);
        }

        if let Err(e) = result {
            let target = element.descriptor();
            warn!(page = %source, target = %target, "Action failed: {}", e);
            catalogue.record_error(ExploreError::action_failed(kind.as_str(), &target, &e.to_string()));
            catalogue.record_operation(operation.failed());
            return Step::Stay;
        }

        if self.pause(self.config.settle).await {
            catalogue.record_operation(operation);
            return Step::Stopped;
        }

        let captured = self.capture(catalogue).await;
        if captured.page.unexplorable {
            let id = catalogue.register_page(captured.page);
            catalogue.record_operation(operation.leading_to(id.clone()));
            return self.back_or_stop(catalogue, &id, source).await;
        }

        if captured.page.app_name != self.config.package {
            let target = element.descriptor();
            info!(page = %source, target = %target, app = %captured.page.app_name, "Action left the app");
            catalogue.record_operation(operation);
            catalogue.record_skipped_branch(
                source,
                format!("{} opened {}", target, captured.page.app_name),
            );
            return if self.leave_foreign_app(catalogue, source).await {
                Step::Stopped
            } else {
                Step::Stay
            };
        }

        let assisted = match self.gate(&captured.page).await {
            Gate::Clear => None,
            Gate::Passed(reason) => Some(reason),
            Gate::Blocked(reason, error) => {
                let id = match catalogue.find_duplicate(&captured.page.signature) {
                    Some(known) => {
                        catalogue.mark_requires_assistance(&known, reason.reason());
                        known
                    }
                    None => self.store(catalogue, captured, Some(reason)).await,
                };
                catalogue.record_operation(operation.leading_to(id.clone()));
                catalogue.record_error(error);
                catalogue.record_skipped_branch(&id, format!("{} not resolved", reason.reason()));
                if id == *source {
                    return Step::Stay;
                }
                return self.back_or_stop(catalogue, &id, source).await;
            }
        };

        match catalogue.find_duplicate(&captured.page.signature) {
            Some(known) if known == *source => {
                debug!(page = %source, target = %element.descriptor(), "Screen unchanged");
                catalogue.record_operation(operation);
                Step::Stay
            }
            Some(known) => {
                debug!(page = %known, "Reached known page");
                if let Some(reason) = assisted {
                    catalogue.mark_requires_assistance(&known, reason.reason());
                }
                catalogue.record_operation(operation.leading_to(known.clone()));
                self.back_or_stop(catalogue, &known, source).await
            }
            None => {
                let remaining = interactive_elements(&captured.page.elements).into();
                let id = self.store(catalogue, captured, assisted).await;
                info!(page = %id, depth = depth + 1, "Discovered page");
                catalogue.record_operation(operation.leading_to(id.clone()));
                Step::Descend(Frame {
                    page: id,
                    remaining,
                    depth: depth + 1,
                })
            }
        }
    }

    /// Tap the element, or type into it when it accepts text.
    async fn act(&self, element: &Element) -> (ActionKind, Result<(), DeviceError>) {
        if element.is_editable() {
            let result = self
                .device
                .input_text(element, &self.config.input_text)
                .await;
            return (ActionKind::Input, result);
        }
        let result = match element.bounds {
            Some(bounds) => {
                let (x, y) = bounds.center();
                self.device.tap(x, y).await
            }
            None => Err(DeviceError::NoBounds(element.descriptor())),
        };
        (ActionKind::Tap, result)
    }

    async fn back_or_stop(&self, catalogue: &mut Catalogue, from: &PageId, to: &PageId) -> Step {
        if self.go_back(catalogue, from, to).await {
            Step::Stopped
        } else {
            Step::Stay
        }
    }

    /// Press back from `from`, expecting to land on `to`. True if cancelled
    /// while settling.
    async fn go_back(&self, catalogue: &mut Catalogue, from: &PageId, to: &PageId) -> bool {
        let started = Instant::now();
        let result = self.device.press_back().await;
        let operation = Operation::new(ActionKind::Back, from.clone()).took_ms(elapsed_ms(started));
        match result {
            Ok(()) => catalogue.record_operation(operation.leading_to(to.clone())),
            Err(e) => {
                warn!(page = %from, "Back navigation failed: {}", e);
                catalogue.record_error(ExploreError::action_failed("back", from.as_str(), &e.to_string()));
                catalogue.record_operation(operation.failed());
            }
        }
        self.pause(self.config.settle).await
    }

    /// Press back out of another app that an action opened. The foreign
    /// screen is never catalogued, so no operation is logged for it. True if
    /// cancelled while settling.
    async fn leave_foreign_app(&self, catalogue: &mut Catalogue, source: &PageId) -> bool {
        if let Err(e) = self.device.press_back().await {
            warn!(page = %source, "Back navigation failed: {}", e);
            catalogue.record_error(ExploreError::action_failed("back", source.as_str(), &e.to_string()));
        }
        self.pause(self.config.settle).await
    }

    async fn capture(&self, catalogue: &mut Catalogue) -> Captured {
        let captured_at = Utc::now();
        let ui_hierarchy = match self.device.ui_hierarchy().await {
            Ok(dump) => dump,
            Err(e) => {
                warn!("Capture failed: {}", e);
                catalogue.record_error(ExploreError::capture_failed(format!(
                    "UI hierarchy unavailable: {e}"
                )));
                return Captured {
                    page: Page::placeholder(&self.config.package, captured_at),
                    screenshot: None,
                };
            }
        };

        let current_app = match self.device.current_app().await {
            Ok(app) => app,
            Err(e) => {
                debug!("Foreground app unknown ({}), assuming {}", e, self.config.package);
                self.config.package.clone()
            }
        };

        let (screenshot, screenshot_bytes) = self.screenshot(catalogue).await;
        let page = Page::from_capture(
            CaptureInput {
                current_app,
                ui_hierarchy,
                screenshot_path: None,
                screenshot_bytes,
            },
            captured_at,
        );
        Captured { page, screenshot }
    }

    /// A missing screenshot weakens the signature but keeps the page.
    async fn screenshot(&self, catalogue: &mut Catalogue) -> (Option<PathBuf>, Option<Vec<u8>>) {
        let Some(dir) = &self.config.artifacts_dir else {
            return (None, None);
        };
        let path = dir.join(PENDING_SCREENSHOT);
        match self.device.take_screenshot(&path).await {
            Ok(true) => match tokio::fs::read(&path).await {
                Ok(bytes) => (Some(path), Some(bytes)),
                Err(e) => {
                    warn!("Failed to read screenshot {}: {}", path.display(), e);
                    (None, None)
                }
            },
            Ok(false) => (None, None),
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                catalogue.record_error(ExploreError::capture_failed(format!(
                    "Screenshot unavailable: {e}"
                )));
                (None, None)
            }
        }
    }

    /// Register a capture, saving its screenshot and UI dump under the final id.
    async fn store(
        &self,
        catalogue: &mut Catalogue,
        captured: Captured,
        assisted: Option<BlockReason>,
    ) -> PageId {
        let Captured {
            mut page,
            screenshot,
        } = captured;
        page.id = catalogue.reserve_id(&page.id);
        if let Some(reason) = assisted {
            page.mark_requires_assistance(reason.reason());
        }

        if let Some(dir) = &self.config.artifacts_dir {
            if let Some(pending) = screenshot {
                let path = dir.join(format!("{}.png", page.id));
                match tokio::fs::rename(&pending, &path).await {
                    Ok(()) => page.screenshot_path = Some(path),
                    Err(e) => warn!("Failed to keep screenshot for {}: {}", page.id, e),
                }
            }
            let dump_path = dir.join(format!("{}_ui.xml", page.id));
            if let Err(e) = tokio::fs::write(&dump_path, &page.ui_hierarchy).await {
                warn!("Failed to save UI dump for {}: {}", page.id, e);
            }
        }

        catalogue.register_page(page)
    }

    /// Hand a blocked screen to the operator and wait for the verdict.
    async fn gate(&self, page: &Page) -> Gate {
        let Some(reason) = detect_assistance(&page.title, &page.ui_hierarchy) else {
            return Gate::Clear;
        };
        info!(title = %page.title, reason = %reason, "Screen needs assistance");

        let timeout = self.config.assist.timeout;
        let mut request = AssistanceRequest::new(reason.reason(), reason.expected_action(), timeout);
        if reason == BlockReason::Captcha {
            request.required_data.insert(
                "verification_code".to_string(),
                "code shown on screen or sent to the device".to_string(),
            );
        }
        let outcome = tokio::select! {
            outcome = self.coordinator.resolve(request, self.operator.as_ref()) => outcome,
            _ = self.cancel.cancelled() => {
                return Gate::Blocked(reason, ExploreError::assistance_cancelled(reason.reason()));
            }
        };

        match outcome.state {
            _ if outcome.success() => {
                if let Some(result) = &outcome.result {
                    debug!(%result, "Assistance completed");
                }
                Gate::Passed(reason)
            }
            AssistanceState::Timeout => Gate::Blocked(
                reason,
                ExploreError::assistance_timeout(reason.reason(), timeout.as_secs()),
            ),
            _ => Gate::Blocked(reason, ExploreError::assistance_cancelled(reason.reason())),
        }
    }

    /// Sleep unless cancelled first. True when cancelled.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.cancel.is_cancelled(),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::{HeadlessOperator, OperatorResponse};
    use crate::test_support::{Control, FakeApp, ScriptedOperator, PACKAGE};
    use droidmap_core::error::ErrorCode;

    fn config() -> ExploreConfig {
        let mut config = ExploreConfig::new(PACKAGE);
        config.settle = Duration::ZERO;
        config.launch_wait = Duration::ZERO;
        config.max_depth = 3;
        config.assist.timeout = Duration::from_millis(50);
        config
    }

    fn explorer(app: &Arc<FakeApp>, operator: Arc<dyn Operator>, config: ExploreConfig) -> Explorer {
        Explorer::new(
            app.clone(),
            Arc::new(AssistanceCoordinator::new(Duration::from_millis(10))),
            operator,
            config,
            CancellationToken::new(),
        )
    }

    fn declining() -> Arc<dyn Operator> {
        Arc::new(HeadlessOperator::declining())
    }

    fn button(id: &'static str, label: &'static str) -> Control {
        Control::Button { id, label }
    }

    fn count(catalogue: &Catalogue, code: ErrorCode) -> usize {
        catalogue.errors().iter().filter(|e| e.code == code).count()
    }

    fn page_titled<'a>(catalogue: &'a Catalogue, title: &str) -> &'a Page {
        catalogue
            .pages()
            .find(|p| p.title == title)
            .unwrap_or_else(|| panic!("no page titled {title}"))
    }

    #[tokio::test]
    async fn cyclic_app_terminates_with_two_pages() {
        let app = Arc::new(
            FakeApp::new("Home")
                .screen("Home", "Home", &[button("to_detail", "Next")])
                .screen("Detail", "Detail", &[button("to_home", "Home")])
                .link("Home", "to_detail", "Detail")
                .link("Detail", "to_home", "Home"),
        );

        let outcome = explorer(&app, declining(), config()).explore().await;
        let report = &outcome.report;

        assert!(!report.cancelled);
        assert_eq!(report.total_pages, 2);
        assert_eq!(report.total_transitions, 2);
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.path_coverage.coverage, 1.0);
        assert_eq!(app.backs(), 2);
        assert_eq!(
            app.taps(),
            vec!["Home:to_detail", "Detail:to_home", "Detail:title", "Home:title"]
        );
        assert_eq!(report.total_operations, 6);
        assert!(outcome.catalogue.errors().is_empty());
    }

    #[tokio::test]
    async fn declined_assistance_skips_branch() {
        let app = Arc::new(
            FakeApp::new("Home")
                .screen("Home", "Home", &[button("to_verify", "Verify")])
                .screen("Verify", "Enter captcha", &[button("submit", "Submit")])
                .link("Home", "to_verify", "Verify"),
        );

        let outcome = explorer(&app, declining(), config()).explore().await;
        let catalogue = &outcome.catalogue;

        assert_eq!(catalogue.page_count(), 2);
        let blocked = page_titled(catalogue, "Enter captcha");
        assert!(blocked.requires_assistance);
        assert_eq!(blocked.assistance_reason.as_deref(), Some("verification code"));
        assert_eq!(catalogue.skipped_branches().len(), 1);
        assert_eq!(catalogue.skipped_branches()[0].page, blocked.id);
        assert_eq!(count(catalogue, ErrorCode::AssistanceCancelled), 1);
        assert!(!app.taps().iter().any(|t| t.starts_with("Verify:")));
        assert_eq!(app.current(), "Home");
    }

    #[tokio::test]
    async fn unanswered_assistance_times_out() {
        let app = Arc::new(
            FakeApp::new("Home")
                .screen("Home", "Home", &[button("to_verify", "Verify")])
                .screen("Verify", "Enter captcha", &[button("submit", "Submit")])
                .link("Home", "to_verify", "Verify"),
        );

        let operator = Arc::new(ScriptedOperator::silent());
        let outcome = explorer(&app, operator.clone(), config()).explore().await;

        assert_eq!(operator.seen().len(), 1);
        assert_eq!(count(&outcome.catalogue, ErrorCode::AssistanceTimeout), 1);
        assert_eq!(outcome.catalogue.skipped_branches().len(), 1);
    }

    #[tokio::test]
    async fn resolved_assistance_continues_into_page() {
        let app = Arc::new(
            FakeApp::new("Home")
                .screen("Home", "Home", &[button("to_verify", "Verify")])
                .screen("Verify", "Enter captcha", &[button("submit", "Submit")])
                .link("Home", "to_verify", "Verify"),
        );

        let operator = Arc::new(ScriptedOperator::new(vec![OperatorResponse::Confirmed(None)]));
        let outcome = explorer(&app, operator, config()).explore().await;
        let catalogue = &outcome.catalogue;

        assert!(page_titled(catalogue, "Enter captcha").requires_assistance);
        assert!(catalogue.skipped_branches().is_empty());
        assert!(app.taps().contains(&"Verify:submit".to_string()));
    }

    #[tokio::test]
    async fn leaving_the_app_backs_out_without_cataloguing() {
        let app = Arc::new(
            FakeApp::new("Home")
                .screen("Home", "Home", &[button("to_browser", "Open website")])
                .screen("Browser", "Browser", &[button("url", "Address")])
                .in_package("Browser", "com.android.chrome")
                .link("Home", "to_browser", "Browser"),
        );

        let outcome = explorer(&app, declining(), config()).explore().await;
        let catalogue = &outcome.catalogue;

        assert_eq!(catalogue.page_count(), 1);
        assert_eq!(catalogue.graph().edge_count(), 0);
        assert_eq!(catalogue.skipped_branches().len(), 1);
        assert!(catalogue.skipped_branches()[0].reason.contains("com.android.chrome"));
        assert_eq!(app.taps(), vec!["Home:to_browser", "Home:title"]);
        assert_eq!(app.backs(), 1);
        assert_eq!(app.current(), "Home");
    }

    #[tokio::test]
    async fn foreign_entry_screen_is_not_explored() {
        let app = Arc::new(
            FakeApp::new("Launcher")
                .screen("Launcher", "Launcher", &[button("icon", "Shop")])
                .in_package("Launcher", "com.android.launcher3"),
        );

        let outcome = explorer(&app, declining(), config()).explore().await;

        assert_eq!(outcome.catalogue.page_count(), 0);
        assert_eq!(count(&outcome.catalogue, ErrorCode::CaptureFailed), 1);
        assert!(app.taps().is_empty());
    }

    #[tokio::test]
    async fn failed_action_moves_to_next_element() {
        let app = Arc::new(
            FakeApp::new("Home")
                .screen(
                    "Home",
                    "Home",
                    &[button("broken", "Broken"), button("to_detail", "Next")],
                )
                .screen("Detail", "Detail", &[])
                .link("Home", "to_detail", "Detail")
                .failing("broken"),
        );

        let outcome = explorer(&app, declining(), config()).explore().await;
        let catalogue = &outcome.catalogue;

        assert_eq!(catalogue.page_count(), 2);
        assert_eq!(count(catalogue, ErrorCode::ActionFailed), 1);
        let failed: Vec<_> = catalogue.operations().iter().filter(|op| !op.success).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].target_descriptor(), "Broken");
        assert_eq!(outcome.report.operation_stats.failed, 1);
    }

    #[tokio::test]
    async fn unreadable_screen_becomes_placeholder() {
        let app = Arc::new(
            FakeApp::new("Home")
                .screen("Home", "Home", &[button("to_void", "Open")])
                .broken_screen("Void")
                .link("Home", "to_void", "Void"),
        );

        let outcome = explorer(&app, declining(), config()).explore().await;
        let catalogue = &outcome.catalogue;

        assert_eq!(catalogue.page_count(), 2);
        assert_eq!(catalogue.pages().filter(|p| p.unexplorable).count(), 1);
        assert_eq!(count(catalogue, ErrorCode::CaptureFailed), 1);
        assert_eq!(app.backs(), 1);
        assert_eq!(app.current(), "Home");
    }

    #[tokio::test]
    async fn depth_bound_stops_descent() {
        let app = Arc::new(
            FakeApp::new("Home")
                .screen("Home", "Home", &[button("next", "Next")])
                .screen("One", "One", &[button("next", "Next")])
                .screen("Two", "Two", &[button("next", "Next")])
                .screen("Three", "Three", &[])
                .link("Home", "next", "One")
                .link("One", "next", "Two")
                .link("Two", "next", "Three"),
        );

        let mut config = config();
        config.max_depth = 2;
        let outcome = explorer(&app, declining(), config).explore().await;

        assert_eq!(outcome.catalogue.page_count(), 3);
        assert!(!app.taps().iter().any(|t| t.starts_with("Two:")));
        assert_eq!(app.current(), "Home");
    }

    #[tokio::test]
    async fn editable_fields_get_text() {
        let app = Arc::new(FakeApp::new("Search").screen(
            "Search",
            "Search",
            &[Control::Field { id: "query" }],
        ));

        let outcome = explorer(&app, declining(), config()).explore().await;

        assert_eq!(app.typed(), vec!["query=test"]);
        let input = outcome
            .catalogue
            .operations()
            .iter()
            .find(|op| op.kind == ActionKind::Input)
            .unwrap();
        assert_eq!(input.input_text.as_deref(), Some("test"));
        assert!(input.target_page.is_none());
    }

    #[tokio::test]
    async fn cancelled_run_still_reports() {
        let app = Arc::new(FakeApp::new("Home").screen("Home", "Home", &[]));
        let explorer = explorer(&app, declining(), config());
        explorer.cancel.cancel();

        let outcome = explorer.explore().await;
        assert!(outcome.report.cancelled);
        assert_eq!(outcome.report.total_pages, 0);
        assert_eq!(outcome.report.path_coverage.coverage, 0.0);
    }

    #[tokio::test]
    async fn artifacts_are_saved_under_page_id() {
        let dir = std::env::temp_dir().join(format!("droidmap-test-{}", uuid::Uuid::new_v4()));
        let app = Arc::new(FakeApp::new("Home").screen("Home", "Home", &[]));
        let mut config = config();
        config.artifacts_dir = Some(dir.clone());

        let outcome = explorer(&app, declining(), config).explore().await;
        let page = outcome.catalogue.pages().next().unwrap();

        let screenshot = page.screenshot_path.clone().unwrap();
        assert_eq!(screenshot, dir.join(format!("{}.png", page.id)));
        assert!(screenshot.exists());
        assert!(dir.join(format!("{}_ui.xml", page.id)).exists());
        assert!(page.signature.screenshot_hash.is_some());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
