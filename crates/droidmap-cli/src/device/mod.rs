//! Device capability interface and per-device claims.
//!
//! The explorer and the monitor only talk to a device through the [`Device`]
//! trait. [`DeviceClaims`] makes sure at most one of them drives a given
//! device at a time, across processes.

pub mod adb;

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use droidmap_core::elements::Element;
use tracing::{debug, info, warn};

use crate::paths::serial_file_stem;

/// Failures reported by a device driver.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("failed to run device tool: {0}")]
    Io(#[from] std::io::Error),

    #[error("device returned an empty UI hierarchy")]
    EmptyHierarchy,

    #[error("element '{0}' has no bounds to act on")]
    NoBounds(String),

    #[error("device is not connected")]
    Disconnected,
}

/// Actions and queries a connected device supports.
///
/// Every call is awaited before the next one is issued; implementations do
/// not need to handle concurrent calls.
#[async_trait]
pub trait Device: Send + Sync {
    /// Identifier used for claims and logs.
    fn serial(&self) -> &str;

    /// Raw UI-tree dump of the current screen.
    async fn ui_hierarchy(&self) -> Result<String, DeviceError>;

    /// Save a screenshot to `path`. `Ok(false)` means the device produced no image.
    async fn take_screenshot(&self, path: &Path) -> Result<bool, DeviceError>;

    async fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError>;

    /// Focus `target` and type `text` into it.
    async fn input_text(&self, target: &Element, text: &str) -> Result<(), DeviceError>;

    async fn press_back(&self) -> Result<(), DeviceError>;

    async fn launch_app(&self, package: &str) -> Result<(), DeviceError>;

    /// Foreground app as `package` or `package/activity`.
    async fn current_app(&self) -> Result<String, DeviceError>;
}

/// What a claim is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Explore,
    Monitor,
}

impl DeviceMode {
    fn as_str(&self) -> &'static str {
        match self {
            DeviceMode::Explore => "explore",
            DeviceMode::Monitor => "monitor",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "explore" => Some(DeviceMode::Explore),
            "monitor" => Some(DeviceMode::Monitor),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceMode::Explore => write!(f, "exploration"),
            DeviceMode::Monitor => write!(f, "monitoring"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("device {serial} is already in use by {holder}; {requested} cannot start until that run ends")]
    Busy {
        serial: String,
        requested: DeviceMode,
        holder: String,
    },

    #[error("failed to claim device {serial} ({}): {source}", path.display())]
    Io {
        serial: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive access to one device. The claim file is removed on drop.
#[derive(Debug)]
pub struct DeviceClaim {
    serial: String,
    mode: DeviceMode,
    path: PathBuf,
}

impl DeviceClaim {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove claim file {}: {}", self.path.display(), e);
        }
        debug!(serial = %self.serial, mode = %self.mode, "Released device claim");
    }
}

/// Contents of an existing claim file.
struct Holder {
    pid: u32,
    mode: Option<DeviceMode>,
}

impl Holder {
    /// `None` when the file is unreadable or still being written.
    fn read(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        let mut lines = contents.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let mode = lines.next().and_then(|m| DeviceMode::parse(m.trim()));
        Some(Self { pid, mode })
    }

    fn describe(&self) -> String {
        match self.mode {
            Some(mode) => format!("{} (pid {})", mode, self.pid),
            None => format!("pid {}", self.pid),
        }
    }

    /// Whether the holding process still exists.
    #[cfg(unix)]
    fn alive(&self) -> bool {
        let Ok(pid) = i32::try_from(self.pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: kill with signal 0 only checks that the process exists and
        // may be signalled. No signal is delivered.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    /// Liveness cannot be checked here, so every holder counts as alive.
    #[cfg(not(unix))]
    fn alive(&self) -> bool {
        true
    }
}

/// Per-serial claim files under one directory.
///
/// A claim is a file created with `create_new`, so it excludes other
/// processes as well as other claims in this one. Files left by a process
/// that no longer exists are treated as stale and replaced.
pub struct DeviceClaims {
    dir: PathBuf,
}

impl DeviceClaims {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Take the device for `mode`, failing immediately if someone else holds it.
    pub fn claim(&self, serial: &str, mode: DeviceMode) -> Result<DeviceClaim, ClaimError> {
        let path = self.dir.join(format!("{}.lock", serial_file_stem(serial)));
        let io_error = |source: std::io::Error| ClaimError::Io {
            serial: serial.to_string(),
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(io_error)?;

        let mut stale_removed = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}\n{}", std::process::id(), mode.as_str()).map_err(io_error)?;
                    debug!(serial, %mode, path = %path.display(), "Claimed device");
                    return Ok(DeviceClaim {
                        serial: serial.to_string(),
                        mode,
                        path: path.clone(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = Holder::read(&path);
                    if let Some(holder) = holder.as_ref().filter(|h| !stale_removed && !h.alive()) {
                        info!(serial, pid = holder.pid, "Removing stale device claim");
                        match std::fs::remove_file(&path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(io_error(e)),
                        }
                        stale_removed = true;
                        continue;
                    }

                    let holder = holder
                        .map(|h| h.describe())
                        .unwrap_or_else(|| "another run".to_string());
                    warn!(serial, %mode, %holder, "Device busy, rejecting claim");
                    return Err(ClaimError::Busy {
                        serial: serial.to_string(),
                        requested: mode,
                        holder,
                    });
                }
                Err(e) => return Err(io_error(e)),
            }
        }
    }
}
