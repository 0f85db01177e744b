//! Passive monitoring of a human-driven session.
//!
//! Polls the device on a fixed interval and turns what it sees into the same
//! catalogue the explorer builds: every screen change becomes a transition
//! (back when the user returns to the previous screen, tap otherwise) and
//! every edit to a text field becomes an input operation. The monitor never
//! acts on the device.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use droidmap_core::catalogue::Catalogue;
use droidmap_core::elements::analyze::find_best_match;
use droidmap_core::elements::Element;
use droidmap_core::error::ExploreError;
use droidmap_core::operation::{ActionKind, Operation};
use droidmap_core::page::{split_current_app, CaptureInput, Page, PageId};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::device::Device;

const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Why monitoring stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEnd {
    Cancelled,
    TimeLimit,
}

/// Screen shown at the previous poll.
struct Observed {
    id: PageId,
    elements: Vec<Element>,
}

#[derive(Default)]
struct Tracker {
    last: Option<Observed>,
    /// Pages visited, most recent last. Returning to the second-to-last one
    /// counts as back navigation.
    trail: Vec<PageId>,
}

pub struct Monitor {
    device: Arc<dyn Device>,
    config: MonitorConfig,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(device: Arc<dyn Device>, config: MonitorConfig, cancel: CancellationToken) -> Self {
        Self {
            device,
            config,
            cancel,
        }
    }

    pub async fn run(&self, catalogue: &mut Catalogue) -> MonitorEnd {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = Instant::now() + self.config.max_duration;
        let mut tracker = Tracker::default();

        info!(
            package = %self.config.package,
            interval_ms = self.config.interval.as_millis() as u64,
            "Monitoring started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let fut = self.poll(catalogue, &mut tracker);
                    if tokio::time::timeout(POLL_TIMEOUT, fut).await.is_err() {
                        warn!("Device poll timed out (> {}s)", POLL_TIMEOUT.as_secs());
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    info!("Monitoring time limit reached");
                    return MonitorEnd::TimeLimit;
                }
                _ = self.cancel.cancelled() => {
                    info!("Monitoring shutting down");
                    return MonitorEnd::Cancelled;
                }
            }
        }
    }

    async fn poll(&self, catalogue: &mut Catalogue, tracker: &mut Tracker) {
        let captured_at = Utc::now();
        let ui_hierarchy = match self.device.ui_hierarchy().await {
            Ok(dump) => dump,
            Err(e) => {
                warn!("Capture failed: {}", e);
                catalogue.record_error(ExploreError::capture_failed(format!(
                    "UI hierarchy unavailable: {e}"
                )));
                return;
            }
        };
        let current_app = match self.device.current_app().await {
            Ok(app) => app,
            Err(e) => {
                debug!("Foreground app unknown ({}), assuming {}", e, self.config.package);
                self.config.package.clone()
            }
        };
        let (foreground, _) = split_current_app(&current_app);
        if foreground != self.config.package {
            debug!(app = %current_app, "Foreground app is not monitored");
            return;
        }

        let page = Page::from_capture(
            CaptureInput {
                current_app,
                ui_hierarchy,
                ..Default::default()
            },
            captured_at,
        );
        let elements = page.elements.clone();
        let id = match catalogue.find_duplicate(&page.signature) {
            Some(known) => known,
            None => {
                let id = catalogue.register_page(page);
                info!(page = %id, "New page observed");
                id
            }
        };

        match tracker.last.take() {
            Some(previous) if previous.id == id => {
                self.record_edits(catalogue, &previous, &elements, captured_at);
            }
            Some(previous) => {
                let returning = tracker.trail.len() >= 2 && tracker.trail[tracker.trail.len() - 2] == id;
                let kind = if returning {
                    tracker.trail.pop();
                    ActionKind::Back
                } else {
                    tracker.trail.push(id.clone());
                    ActionKind::Tap
                };
                debug!(from = %previous.id, to = %id, %kind, "Screen changed");
                catalogue.record_operation(
                    Operation::new(kind, previous.id)
                        .at(captured_at)
                        .leading_to(id.clone()),
                );
            }
            None => tracker.trail.push(id.clone()),
        }
        tracker.last = Some(Observed { id, elements });
    }

    /// Record an input operation for each text field whose content changed.
    fn record_edits(
        &self,
        catalogue: &mut Catalogue,
        previous: &Observed,
        now: &[Element],
        at: DateTime<Utc>,
    ) {
        let threshold = self.config.match_config.match_threshold;
        for before in previous.elements.iter().filter(|e| e.is_editable()) {
            let Some((after, score)) = find_best_match(before, now, &self.config.match_config) else {
                continue;
            };
            if score < threshold || after.text() == before.text() {
                continue;
            }
            let text = after.text().unwrap_or_default();
            debug!(field = %after.descriptor(), "Text field edited");
            catalogue.record_operation(
                Operation::new(ActionKind::Input, previous.id.clone())
                    .on(after)
                    .with_text(text)
                    .at(at),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Control, FakeApp, PACKAGE};

    fn app() -> Arc<FakeApp> {
        Arc::new(
            FakeApp::new("Home")
                .screen(
                    "Home",
                    "Home",
                    &[
                        Control::Field { id: "query" },
                        Control::Button {
                            id: "to_detail",
                            label: "Next",
                        },
                    ],
                )
                .screen("Detail", "Detail", &[]),
        )
    }

    fn config(max_duration: Duration) -> MonitorConfig {
        let mut config = MonitorConfig::new(PACKAGE);
        config.interval = Duration::from_millis(10);
        config.max_duration = max_duration;
        config
    }

    #[tokio::test]
    async fn records_navigation_and_edits() {
        let app = app();
        let cancel = CancellationToken::new();
        let monitor = Monitor::new(app.clone(), config(Duration::from_secs(10)), cancel.clone());
        let mut catalogue = Catalogue::new(PACKAGE);

        let driver = async {
            let step = Duration::from_millis(60);
            tokio::time::sleep(step).await;
            app.type_into_field("hello");
            tokio::time::sleep(step).await;
            app.navigate("Detail");
            tokio::time::sleep(step).await;
            app.press_back().await.unwrap();
            tokio::time::sleep(step).await;
            cancel.cancel();
        };
        let (end, ()) = tokio::join!(monitor.run(&mut catalogue), driver);

        assert_eq!(end, MonitorEnd::Cancelled);
        assert_eq!(catalogue.page_count(), 2);

        let kinds: Vec<ActionKind> = catalogue.operations().iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Input, ActionKind::Tap, ActionKind::Back]);
        assert_eq!(catalogue.operations()[0].input_text.as_deref(), Some("hello"));
        assert_eq!(catalogue.graph().edge_count(), 2);
    }

    #[tokio::test]
    async fn stops_at_time_limit() {
        let app = app();
        let monitor = Monitor::new(
            app.clone(),
            config(Duration::from_millis(50)),
            CancellationToken::new(),
        );
        let mut catalogue = Catalogue::new(PACKAGE);

        let end = monitor.run(&mut catalogue).await;
        assert_eq!(end, MonitorEnd::TimeLimit);
        assert_eq!(catalogue.page_count(), 1);
        assert!(catalogue.operations().is_empty());
    }

    #[tokio::test]
    async fn other_apps_are_ignored() {
        let app = app();
        let mut config = config(Duration::from_millis(50));
        config.package = "org.other".to_string();
        let monitor = Monitor::new(app.clone(), config, CancellationToken::new());
        let mut catalogue = Catalogue::new("org.other");

        monitor.run(&mut catalogue).await;
        assert_eq!(catalogue.page_count(), 0);
    }

    #[tokio::test]
    async fn package_prefix_is_not_a_match() {
        let app = app();
        let mut config = config(Duration::from_millis(50));
        config.package = "com.example.sho".to_string();
        let monitor = Monitor::new(app.clone(), config, CancellationToken::new());
        let mut catalogue = Catalogue::new("com.example.sho");

        monitor.run(&mut catalogue).await;
        assert_eq!(catalogue.page_count(), 0);
    }
}
