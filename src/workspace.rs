//! Per-run artifact workspace.
//!
//! Each run gets a timestamped directory under the artifact base:
//! - `screenshots/{passed,failed,errors,before-action,after-action}/`
//! - `logs/test.log`
//! - `console-logs/`, `network-logs/`, `artifacts/`
//! - the three report files and `.run.json` metadata

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::evidence::StatusTag;
use crate::harness::types::HarnessResult;

/// Metadata file written at the root of every run directory
const RUN_METADATA_FILE: &str = ".run.json";

#[derive(Debug, Clone)]
pub struct RunWorkspace {
    /// Run id, also the directory name
    pub id: String,
    pub dir: PathBuf,
}

impl RunWorkspace {
    /// Allocate `<base>/<name>_<timestamp>` without touching the filesystem
    pub fn new(base: &Path, name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), generate_timestamp_suffix());
        Self {
            dir: base.join(&id),
            id,
        }
    }

    /// Use an existing directory as the run root
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("run_{}", generate_timestamp_suffix()));
        Self { id, dir }
    }

    /// Create the directory layout and write run metadata
    pub fn init(&self) -> HarnessResult<()> {
        for tag in StatusTag::ALL {
            fs::create_dir_all(self.screenshot_dir(tag))?;
        }
        for sub in ["logs", "console-logs", "network-logs", "artifacts"] {
            fs::create_dir_all(self.dir.join(sub))?;
        }

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "host": host,
            "pid": std::process::id(),
        });
        fs::write(
            self.dir.join(RUN_METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    pub fn screenshot_dir(&self, tag: StatusTag) -> PathBuf {
        self.dir.join("screenshots").join(tag.as_str())
    }

    /// Path for a screenshot; `seq` keeps repeated captures of a phase apart
    pub fn screenshot_path(&self, tag: StatusTag, phase: &str, label: &str, seq: usize) -> PathBuf {
        let filename = format!("{:03}_{}_{}.png", seq, sanitize_name(phase), sanitize_name(label));
        self.screenshot_dir(tag).join(filename)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }

    pub fn console_dir(&self) -> PathBuf {
        self.dir.join("console-logs")
    }

    pub fn network_dir(&self) -> PathBuf {
        self.dir.join("network-logs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join("artifacts")
    }

    /// Workspace for one session of a load run, nested under this one
    pub fn child(&self, name: &str) -> Self {
        let id = sanitize_name(name);
        Self {
            dir: self.dir.join(&id),
            id: format!("{}/{}", self.id, id),
        }
    }
}

fn generate_timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Run directories under `base` (those carrying run metadata), sorted
pub fn list_runs(base: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if path.is_dir() && path.join(RUN_METADATA_FILE).exists() {
            runs.push(path);
        }
    }
    runs.sort();
    Ok(runs)
}

/// Remove run directories older than `max_age`. Returns how many were removed.
pub fn cleanup_old_runs(base: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut cleaned = 0;

    for path in list_runs(base)? {
        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        if let Ok(age) = now.duration_since(modified) {
            if age > max_age && fs::remove_dir_all(&path).is_ok() {
                cleaned += 1;
            }
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("responsive-mobile"), "responsive-mobile");
        assert_eq!(sanitize_name("before click: Delete"), "before_click__Delete");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name(""), "unnamed");
    }

    #[test]
    fn test_init_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::new(tmp.path(), "smoke run");
        assert!(ws.id.starts_with("smoke_run_"));
        ws.init().unwrap();

        for tag in StatusTag::ALL {
            assert!(ws.screenshot_dir(tag).is_dir());
        }
        assert!(ws.logs_dir().is_dir());
        assert!(ws.console_dir().is_dir());
        assert!(ws.network_dir().is_dir());
        assert!(ws.artifacts_dir().is_dir());

        let raw = fs::read_to_string(ws.dir.join(RUN_METADATA_FILE)).unwrap();
        let meta: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(meta["id"], ws.id.as_str());
        assert!(meta["host"].is_string());
    }

    #[test]
    fn test_screenshot_path_is_partitioned_by_status() {
        let ws = RunWorkspace::in_dir("/tmp/run_x");
        let path = ws.screenshot_path(StatusTag::BeforeAction, "buttons", "click 1", 4);
        assert!(path.ends_with("screenshots/before-action/004_buttons_click_1.png"));
    }

    #[test]
    fn test_list_and_cleanup_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let a = RunWorkspace::new(tmp.path(), "a");
        a.init().unwrap();
        fs::create_dir_all(tmp.path().join("not-a-run")).unwrap();

        let runs = list_runs(tmp.path()).unwrap();
        assert_eq!(runs, vec![a.dir.clone()]);

        assert_eq!(cleanup_old_runs(tmp.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(cleanup_old_runs(tmp.path(), Duration::ZERO).unwrap(), 1);
        assert!(!a.dir.exists());
    }
}
