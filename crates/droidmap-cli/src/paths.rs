//! Output directory resolution.
//!
//! Priority for the output root:
//! 1. `DROIDMAP_OUTPUT_DIR` (explicit override)
//! 2. `XDG_DATA_HOME/droidmap` (Linux standard)
//! 3. `~/.droidmap` (home directory fallback)
//! 4. `/tmp/droidmap` (last resort)
//!
//! Each run writes to `{root}/{package}/{YYYYmmdd-HHMMSS}/`.
//!
//! Device claim files live in the runtime directory:
//! 1. `DROIDMAP_RUNTIME_DIR` (explicit override)
//! 2. `XDG_RUNTIME_DIR/droidmap` (Linux standard)
//! 3. `~/.droidmap/run` (home directory fallback)
//! 4. `/tmp/droidmap-run` (last resort)

use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Device serial from `ANDROID_SERIAL`, the variable adb itself honours.
pub fn default_serial() -> Option<String> {
    env::var("ANDROID_SERIAL").ok().filter(|s| !s.is_empty())
}

/// Get the output root with priority fallback.
///
/// Empty environment values are ignored.
pub fn get_output_root() -> PathBuf {
    if let Ok(dir) = env::var("DROIDMAP_OUTPUT_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Ok(data_dir) = env::var("XDG_DATA_HOME") {
        if !data_dir.is_empty() {
            return PathBuf::from(data_dir).join("droidmap");
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".droidmap");
    }

    env::temp_dir().join("droidmap")
}

/// Get the runtime directory for device claim files.
///
/// Empty environment values are ignored.
pub fn get_runtime_dir() -> PathBuf {
    if let Ok(dir) = env::var("DROIDMAP_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("droidmap");
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".droidmap").join("run");
    }

    env::temp_dir().join("droidmap-run")
}

/// File name for a device serial.
///
/// Serials like `192.168.1.5:5555` carry characters that are not safe in
/// every file system, so anything outside `[A-Za-z0-9._-]` becomes `_`.
pub(crate) fn serial_file_stem(serial: &str) -> String {
    let stem: String = serial
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.starts_with('.') || stem.starts_with('-') {
        format!("_{stem}")
    } else {
        stem
    }
}

/// Validate a package name before using it as a path component.
///
/// Package names must:
/// - Be non-empty
/// - Contain only alphanumeric characters, dots, hyphens, and underscores
/// - Not start with a dot or a hyphen
///
/// Returns the name or `unknown` if invalid.
pub(crate) fn sanitize_package_name(name: &str) -> String {
    let is_valid = !name.is_empty()
        && !name.starts_with('-')
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');

    if is_valid {
        name.to_string()
    } else {
        tracing::warn!(
            "Invalid package name '{}' for output path, using 'unknown'. Names must contain only alphanumeric, dot, hyphen, underscore.",
            name
        );
        "unknown".to_string()
    }
}

/// Directory for one run of `package` started at `started_at`.
pub fn run_dir(root: &Path, package: &str, started_at: DateTime<Utc>) -> PathBuf {
    root.join(sanitize_package_name(package))
        .join(started_at.format("%Y%m%d-%H%M%S").to_string())
}

/// Subdirectory for per-page screenshots and UI dumps.
pub fn pages_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("pages")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;

    // Env var manipulation is not thread-safe; tests touching it run serially.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
        _lock: std::sync::MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), std::env::var(name).ok()))
                .collect();
            Self { vars, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                // SAFETY: We hold ENV_MUTEX, so no other test thread is modifying env vars
                unsafe {
                    match value {
                        Some(v) => std::env::set_var(name, v),
                        None => std::env::remove_var(name),
                    }
                }
            }
        }
    }

    #[test]
    fn test_output_root_explicit_override() {
        let _guard = EnvGuard::new(&["DROIDMAP_OUTPUT_DIR", "XDG_DATA_HOME"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROIDMAP_OUTPUT_DIR", "/custom/out");
            std::env::remove_var("XDG_DATA_HOME");
        }
        assert_eq!(get_output_root(), PathBuf::from("/custom/out"));
    }

    #[test]
    fn test_output_root_ignores_empty() {
        let _guard = EnvGuard::new(&["DROIDMAP_OUTPUT_DIR", "XDG_DATA_HOME"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROIDMAP_OUTPUT_DIR", "");
            std::env::set_var("XDG_DATA_HOME", "");
        }
        assert!(get_output_root().to_string_lossy().ends_with("droidmap"));
        assert_ne!(get_output_root(), PathBuf::from(""));
    }

    #[test]
    fn test_output_root_xdg_data_home() {
        let _guard = EnvGuard::new(&["DROIDMAP_OUTPUT_DIR", "XDG_DATA_HOME"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::remove_var("DROIDMAP_OUTPUT_DIR");
            std::env::set_var("XDG_DATA_HOME", "/home/me/.local/share");
        }
        assert_eq!(
            get_output_root(),
            PathBuf::from("/home/me/.local/share/droidmap")
        );
    }

    #[test]
    fn test_runtime_dir_priority() {
        let _guard = EnvGuard::new(&["DROIDMAP_RUNTIME_DIR", "XDG_RUNTIME_DIR"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROIDMAP_RUNTIME_DIR", "");
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        }
        assert_eq!(get_runtime_dir(), PathBuf::from("/run/user/1000/droidmap"));

        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROIDMAP_RUNTIME_DIR", "/custom/run");
        }
        assert_eq!(get_runtime_dir(), PathBuf::from("/custom/run"));
    }

    #[test]
    fn test_serial_file_stem() {
        assert_eq!(serial_file_stem("emulator-5554"), "emulator-5554");
        assert_eq!(serial_file_stem("192.168.1.5:5555"), "192.168.1.5_5555");
        assert_eq!(serial_file_stem("../etc"), "_.._etc");
        assert_eq!(serial_file_stem(""), "_");
    }

    #[test]
    fn test_default_serial() {
        let _guard = EnvGuard::new(&["ANDROID_SERIAL"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("ANDROID_SERIAL", "emulator-5554") };
        assert_eq!(default_serial().as_deref(), Some("emulator-5554"));

        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("ANDROID_SERIAL", "") };
        assert_eq!(default_serial(), None);
    }

    #[test]
    fn test_sanitize_valid_packages() {
        assert_eq!(sanitize_package_name("com.example.mail"), "com.example.mail");
        assert_eq!(sanitize_package_name("org.some_app-2"), "org.some_app-2");
    }

    #[test]
    fn test_sanitize_path_traversal() {
        assert_eq!(sanitize_package_name("../../etc"), "unknown");
        assert_eq!(sanitize_package_name(".."), "unknown");
        assert_eq!(sanitize_package_name("com/example"), "unknown");
        assert_eq!(sanitize_package_name("-rf"), "unknown");
        assert_eq!(sanitize_package_name(""), "unknown");
        assert_eq!(sanitize_package_name("com example"), "unknown");
        assert_eq!(sanitize_package_name("pkg\0evil"), "unknown");
    }

    #[test]
    fn test_run_dir_layout() {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let dir = run_dir(Path::new("/out"), "com.example", started);
        assert_eq!(dir, PathBuf::from("/out/com.example/20240309-140507"));
        assert_eq!(pages_dir(&dir), PathBuf::from("/out/com.example/20240309-140507/pages"));
    }
}
