//! Screenshots and the end-of-run review report.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::browser::Browser;

pub const SUMMARY_FILE: &str = "run_summary.json";

/// Writes diagnostic artifacts into one directory.
///
/// Screenshot capture is best-effort: failures are logged and never
/// interrupt the run.
#[derive(Debug)]
pub struct Artifacts {
    dir: PathBuf,
    screenshots: bool,
    captured: Mutex<Vec<PathBuf>>,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>, screenshots: bool) -> Self {
        Self {
            dir: dir.into(),
            screenshots,
            captured: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a screenshot as `<name>.png`. Returns the path when one was written.
    pub async fn capture(&self, browser: &dyn Browser, name: &str) -> Option<PathBuf> {
        if !self.screenshots {
            return None;
        }
        let png = match browser.screenshot_png().await {
            Ok(png) => png,
            Err(e) => {
                warn!(screenshot = %name, error = %e, "Screenshot capture failed");
                return None;
            }
        };
        let path = self.dir.join(format!("{}.png", file_stem(name)));
        let written = std::fs::create_dir_all(&self.dir).and_then(|_| std::fs::write(&path, png));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "Failed to write screenshot");
            return None;
        }
        debug!(path = %path.display(), "Screenshot saved");
        if let Ok(mut captured) = self.captured.lock() {
            captured.push(path.clone());
        }
        Some(path)
    }

    /// Paths of every screenshot written so far
    pub fn captured(&self) -> Vec<PathBuf> {
        self.captured.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Write the run report as pretty JSON. Always written, even with screenshots off.
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

/// Restrict artifact names to characters safe in file names.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;

    #[test]
    fn test_file_stem_sanitized() {
        assert_eq!(file_stem("after_cpt_1_97110"), "after_cpt_1_97110");
        assert_eq!(file_stem("claim 39359/opened"), "claim_39359_opened");
    }

    #[tokio::test]
    async fn test_capture_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path(), true);
        let browser = FakeBrowser::new();

        let path = artifacts.capture(&browser, "ecw_after_login").await.unwrap();
        assert!(path.ends_with("ecw_after_login.png"));
        assert!(path.exists());
        assert_eq!(artifacts.captured(), vec![path]);
    }

    #[tokio::test]
    async fn test_capture_disabled_skips_browser() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path(), false);
        let browser = FakeBrowser::new();

        assert!(artifacts.capture(&browser, "anything").await.is_none());
        assert_eq!(browser.with_state(|s| s.screenshots), 0);
    }

    #[test]
    fn test_summary_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path().join("run"), false);
        let path = artifacts
            .write_summary(&serde_json::json!({ "verdict": "complete" }))
            .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("\"verdict\": \"complete\""));
    }
}
