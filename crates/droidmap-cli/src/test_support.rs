//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use droidmap_core::elements::parse::parse_hierarchy;
use droidmap_core::elements::Element;

use crate::assist::{AssistanceId, AssistanceRequest, Operator, OperatorResponse};
use crate::device::{Device, DeviceError};

pub const PACKAGE: &str = "com.example.shop";

/// One control on a fake screen.
#[derive(Debug, Clone)]
pub enum Control {
    Button { id: &'static str, label: &'static str },
    Field { id: &'static str },
}

#[derive(Default)]
struct FakeState {
    screens: HashMap<String, Option<String>>,
    history: Vec<String>,
    taps: Vec<String>,
    typed: Vec<String>,
    backs: usize,
}

/// Scripted in-memory app.
///
/// Screens are rendered to uiautomator-style dumps. Tapping a control looks
/// up `(screen, control id)` in the link table and navigates there; back
/// pops the history. A screen without a dump fails to capture.
pub struct FakeApp {
    start: String,
    links: HashMap<(String, String), String>,
    failing: HashSet<String>,
    packages: HashMap<String, String>,
    state: Mutex<FakeState>,
}

impl FakeApp {
    pub fn new(start: &str) -> Self {
        Self {
            start: start.to_string(),
            links: HashMap::new(),
            failing: HashSet::new(),
            packages: HashMap::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn screen(self, name: &str, title: &str, controls: &[Control]) -> Self {
        self.lock()
            .screens
            .insert(name.to_string(), Some(render(title, controls)));
        self
    }

    /// A screen whose UI tree can never be dumped.
    pub fn broken_screen(self, name: &str) -> Self {
        self.lock().screens.insert(name.to_string(), None);
        self
    }

    pub fn link(mut self, from: &str, control: &str, to: &str) -> Self {
        self.links
            .insert((from.to_string(), control.to_string()), to.to_string());
        self
    }

    /// Report `screen` as belonging to another app.
    pub fn in_package(mut self, screen: &str, package: &str) -> Self {
        self.packages.insert(screen.to_string(), package.to_string());
        self
    }

    /// Taps on this control report a device error.
    pub fn failing(mut self, control: &str) -> Self {
        self.failing.insert(control.to_string());
        self
    }

    /// Switch to `name` as if the user navigated there.
    pub fn navigate(&self, name: &str) {
        self.lock().history.push(name.to_string());
    }

    /// Type into the first field on the current screen, as a user would.
    pub fn type_into_field(&self, text: &str) {
        let current = self.current();
        if let Some(Some(dump)) = self.lock().screens.get_mut(&current) {
            *dump = dump.replacen("text=\"\" resource-id", &format!("text=\"{text}\" resource-id"), 1);
        }
    }

    pub fn current(&self) -> String {
        self.lock()
            .history
            .last()
            .cloned()
            .unwrap_or_else(|| self.start.clone())
    }

    pub fn taps(&self) -> Vec<String> {
        self.lock().taps.clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.lock().typed.clone()
    }

    pub fn backs(&self) -> usize {
        self.lock().backs
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn control_at(&self, x: i32, y: i32) -> Option<String> {
        let current = self.current();
        let dump = self.lock().screens.get(&current)?.clone()?;
        parse_hierarchy(&dump)
            .into_iter()
            .find(|e| e.bounds.is_some_and(|b| b.contains(x, y)))
            .and_then(|e| e.resource_id().map(control_id))
    }
}

fn control_id(resource_id: &str) -> String {
    resource_id
        .rsplit('/')
        .next()
        .unwrap_or(resource_id)
        .to_string()
}

fn render(title: &str, controls: &[Control]) -> String {
    let mut dump = String::from("<hierarchy rotation=\"0\">\n");
    dump.push_str(&format!(
        "  <node text=\"{title}\" resource-id=\"{PACKAGE}:id/title\" class=\"android.widget.TextView\" clickable=\"false\" enabled=\"true\" bounds=\"[0,0][1080,100]\" />\n"
    ));
    for (i, control) in controls.iter().enumerate() {
        let top = 200 + 150 * i as i32;
        let bottom = top + 100;
        let node = match control {
            Control::Button { id, label } => format!(
                "  <node text=\"{label}\" resource-id=\"{PACKAGE}:id/{id}\" class=\"android.widget.Button\" clickable=\"true\" enabled=\"true\" bounds=\"[0,{top}][1080,{bottom}]\" />\n"
            ),
            Control::Field { id } => format!(
                "  <node text=\"\" resource-id=\"{PACKAGE}:id/{id}\" class=\"android.widget.EditText\" clickable=\"true\" enabled=\"true\" bounds=\"[0,{top}][1080,{bottom}]\" />\n"
            ),
        };
        dump.push_str(&node);
    }
    dump.push_str("</hierarchy>");
    dump
}

#[async_trait]
impl Device for FakeApp {
    fn serial(&self) -> &str {
        "fake-device"
    }

    async fn ui_hierarchy(&self) -> Result<String, DeviceError> {
        let current = self.current();
        match self.lock().screens.get(&current) {
            Some(Some(dump)) => Ok(dump.clone()),
            _ => Err(DeviceError::EmptyHierarchy),
        }
    }

    async fn take_screenshot(&self, path: &Path) -> Result<bool, DeviceError> {
        tokio::fs::write(path, self.current().as_bytes()).await?;
        Ok(true)
    }

    async fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        let control = self.control_at(x, y);
        if let Some(control) = &control {
            if self.failing.contains(control) {
                return Err(DeviceError::Command {
                    command: format!("input tap {x} {y}"),
                    message: "injected failure".to_string(),
                });
            }
        }

        let current = self.current();
        let mut state = self.lock();
        if let Some(control) = control {
            state.taps.push(format!("{current}:{control}"));
            if let Some(next) = self.links.get(&(current, control)) {
                state.history.push(next.clone());
            }
        }
        Ok(())
    }

    async fn input_text(&self, target: &Element, text: &str) -> Result<(), DeviceError> {
        let id = target
            .resource_id()
            .map(control_id)
            .ok_or_else(|| DeviceError::NoBounds(target.descriptor()))?;
        self.lock().typed.push(format!("{id}={text}"));
        Ok(())
    }

    async fn press_back(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.backs += 1;
        if state.history.len() > 1 {
            state.history.pop();
        }
        Ok(())
    }

    async fn launch_app(&self, _package: &str) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.history = vec![self.start.clone()];
        Ok(())
    }

    async fn current_app(&self) -> Result<String, DeviceError> {
        let current = self.current();
        let package = self.packages.get(&current).map_or(PACKAGE, String::as_str);
        Ok(format!("{package}/.{current}Activity"))
    }
}

/// Operator that replays canned answers in order.
///
/// Once the script runs out (or for [`ScriptedOperator::silent`]) it never
/// answers, leaving the session to time out.
pub struct ScriptedOperator {
    answers: Mutex<Vec<OperatorResponse>>,
    seen: Mutex<Vec<AssistanceId>>,
}

impl ScriptedOperator {
    pub fn new(mut answers: Vec<OperatorResponse>) -> Self {
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    pub fn seen(&self) -> Vec<AssistanceId> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn handle(&self, id: &AssistanceId, _request: &AssistanceRequest) -> OperatorResponse {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id.clone());
        let next = self
            .answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        match next {
            Some(answer) => answer,
            None => std::future::pending().await,
        }
    }
}
