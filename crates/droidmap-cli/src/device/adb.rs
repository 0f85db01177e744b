//! `adb`-backed device driver.

use std::path::Path;
use std::process::Output;
use std::sync::OnceLock;

use async_trait::async_trait;
use droidmap_core::elements::Element;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{Device, DeviceError};

const KEYCODE_BACK: &str = "4";

/// Claim key used when no serial is given and adb picks the only device.
pub const DEFAULT_SERIAL: &str = "default";

/// Drives one device through the `adb` binary on `PATH`.
pub struct AdbDevice {
    serial: Option<String>,
}

impl AdbDevice {
    pub fn new(serial: Option<String>) -> Self {
        Self { serial }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, DeviceError> {
        trace!(serial = %self.serial(), ?args, "adb");
        let mut command = Command::new("adb");
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        let output = command.args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not found") || stderr.contains("offline") {
                return Err(DeviceError::Disconnected);
            }
            return Err(DeviceError::Command {
                command: format!("adb {}", args.join(" ")),
                message: stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn shell(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let output = self.run(&full).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Device for AdbDevice {
    fn serial(&self) -> &str {
        self.serial.as_deref().unwrap_or(DEFAULT_SERIAL)
    }

    async fn ui_hierarchy(&self) -> Result<String, DeviceError> {
        let output = self
            .run(&["exec-out", "uiautomator", "dump", "/dev/tty"])
            .await?;
        let raw = String::from_utf8_lossy(&output.stdout);
        let dump = strip_dump_trailer(&raw);
        if !dump.contains("<node") {
            return Err(DeviceError::EmptyHierarchy);
        }
        debug!(bytes = dump.len(), "Captured UI hierarchy");
        Ok(dump.to_string())
    }

    async fn take_screenshot(&self, path: &Path) -> Result<bool, DeviceError> {
        let output = self.run(&["exec-out", "screencap", "-p"]).await?;
        if output.stdout.is_empty() {
            return Ok(false);
        }
        tokio::fs::write(path, &output.stdout).await?;
        Ok(true)
    }

    async fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()])
            .await
            .map(drop)
    }

    async fn input_text(&self, target: &Element, text: &str) -> Result<(), DeviceError> {
        let (x, y) = target
            .bounds
            .map(|b| b.center())
            .ok_or_else(|| DeviceError::NoBounds(target.descriptor()))?;
        self.tap(x, y).await?;
        self.shell(&["input", "text", &escape_input_text(text)])
            .await
            .map(drop)
    }

    async fn press_back(&self) -> Result<(), DeviceError> {
        self.shell(&["input", "keyevent", KEYCODE_BACK]).await.map(drop)
    }

    async fn launch_app(&self, package: &str) -> Result<(), DeviceError> {
        self.shell(&[
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
        .await
        .map(drop)
    }

    async fn current_app(&self) -> Result<String, DeviceError> {
        let dumpsys = self.shell(&["dumpsys", "window"]).await?;
        parse_focused_window(&dumpsys).ok_or_else(|| DeviceError::Command {
            command: "adb shell dumpsys window".to_string(),
            message: "no focused window reported".to_string(),
        })
    }
}

/// `uiautomator dump /dev/tty` appends a status line after the XML.
fn strip_dump_trailer(raw: &str) -> &str {
    const END: &str = "</hierarchy>";
    match raw.rfind(END) {
        Some(pos) => &raw[..pos + END.len()],
        None => raw.trim(),
    }
}

/// `input text` treats spaces as separators and the shell eats metacharacters.
fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\'' | '"' | '\\' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '$' | '`' | '*' | '?'
            | '~' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn focus_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"mCurrentFocus=Window\{\S+ \S+ ([^/\s}]+)(?:/([^\s}]+))?\}")
            .expect("focus regex is valid")
    })
}

/// Extract `package/activity` from `dumpsys window` output.
fn parse_focused_window(dumpsys: &str) -> Option<String> {
    let caps = focus_regex().captures(dumpsys)?;
    let package = caps.get(1)?.as_str();
    Some(match caps.get(2) {
        Some(activity) => format!("{}/{}", package, activity.as_str()),
        None => package.to_string(),
    })
}
