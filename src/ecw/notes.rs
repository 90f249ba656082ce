//! Progress note extraction from the claim's "Prog. Notes" dialog.
//!
//! Notes render inside an iframe whose id and name vary between releases,
//! and occasionally inline. Each attempt opens the dialog, tries the
//! strategies in order, and closes the dialog again.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::{dismiss_dialogs, selectors};
use crate::artifacts::Artifacts;
use crate::browser::{wait_until, Browser, ElementId};
use crate::config::Config;
use crate::retry::{AttemptRecord, RetryPolicy};

pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Shorter text is a half-rendered viewer, not a note
pub const MIN_NOTES_CHARS: usize = 50;

pub type ExtractionAttempt = AttemptRecord;

#[derive(Debug, Error)]
#[error("Progress notes could not be extracted after {} attempt(s)", .trail.len())]
pub struct ExtractionFailed {
    pub trail: Vec<ExtractionAttempt>,
}

/// Where the note text was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotesSource {
    ViewerFrame,
    MarkedFrame,
    InlinePanel,
    /// Supplied by the operator instead of read from the page
    File,
}

impl NotesSource {
    const PAGE: [NotesSource; 3] = [Self::ViewerFrame, Self::MarkedFrame, Self::InlinePanel];
}

impl fmt::Display for NotesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ViewerFrame => "viewer_frame",
            Self::MarkedFrame => "marked_frame",
            Self::InlinePanel => "inline_panel",
            Self::File => "file",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedNotes {
    pub text: String,
    pub source: NotesSource,
    pub trail: Vec<ExtractionAttempt>,
}

pub struct NotesExtractor<'a> {
    browser: &'a dyn Browser,
    artifacts: &'a Artifacts,
    policy: RetryPolicy,
    wait_timeout: Duration,
}

impl<'a> NotesExtractor<'a> {
    pub fn new(browser: &'a dyn Browser, config: &Config, artifacts: &'a Artifacts) -> Self {
        Self {
            browser,
            artifacts,
            policy: RetryPolicy::fixed(MAX_ATTEMPTS, RETRY_DELAY),
            wait_timeout: config.browser.wait_timeout,
        }
    }

    /// Read the progress notes, retrying per the policy.
    pub async fn extract(&self) -> Result<ExtractedNotes, ExtractionFailed> {
        match self.policy.run(move |attempt| self.attempt(attempt)).await {
            Ok(done) => {
                let (text, source) = done.value;
                info!(
                    event = "notes_extracted",
                    source = %source,
                    char_count = text.chars().count(),
                    attempts = done.trail.len(),
                    "Progress notes extracted"
                );
                Ok(ExtractedNotes {
                    text,
                    source,
                    trail: done.trail,
                })
            }
            Err(trail) => Err(ExtractionFailed { trail }),
        }
    }

    async fn attempt(&self, attempt: u32) -> Result<(String, NotesSource), String> {
        let result = self.read_dialog().await;
        dismiss_dialogs(self.browser).await;
        if result.is_err() {
            self.artifacts
                .capture(self.browser, &format!("notes_attempt_{attempt}"))
                .await;
        }
        result
    }

    async fn read_dialog(&self) -> Result<(String, NotesSource), String> {
        let button = selectors::progress_notes_button();
        let found = button
            .wait_for_visible(self.browser, self.wait_timeout)
            .await
            .ok_or_else(|| "Prog. Notes button not found".to_string())?;
        self.browser
            .click(&found.element)
            .await
            .map_err(|e| format!("Prog. Notes click failed: {e}"))?;

        // Viewer content loads asynchronously after the dialog opens
        let browser = self.browser;
        wait_until(self.wait_timeout, move || async move {
            selectors::notes_viewer_frame().first_visible(browser).await.is_some()
                || selectors::inline_notes_panel().first_visible(browser).await.is_some()
        })
        .await;

        for source in NotesSource::PAGE {
            let Some(raw) = self.read_source(source).await else {
                continue;
            };
            let cleaned = clean_notes(&raw);
            let chars = cleaned.chars().count();
            if chars >= MIN_NOTES_CHARS {
                return Ok((cleaned, source));
            }
            debug!(source = %source, chars, "Notes text too short");
        }
        Err(format!("no strategy yielded {MIN_NOTES_CHARS}+ characters of notes"))
    }

    async fn read_source(&self, source: NotesSource) -> Option<String> {
        match source {
            NotesSource::ViewerFrame => {
                let frame = selectors::notes_viewer_frame().first_visible(self.browser).await?;
                self.frame_text(&frame.element).await
            }
            NotesSource::MarkedFrame => {
                let frames = self.browser.find_all(&selectors::any_frame()).await.ok()?;
                for frame in frames {
                    if let Some(text) = self.frame_text(&frame).await {
                        if has_clinical_markers(&text) {
                            return Some(text);
                        }
                    }
                }
                None
            }
            NotesSource::InlinePanel => {
                let panel = selectors::inline_notes_panel().first_visible(self.browser).await?;
                self.browser.text(&panel.element).await.ok()
            }
            NotesSource::File => None,
        }
    }

    /// Body text of `frame`; always returns to the parent context.
    async fn frame_text(&self, frame: &ElementId) -> Option<String> {
        if let Err(e) = self.browser.switch_to_frame(frame).await {
            debug!(error = %e, "Could not enter frame");
            return None;
        }
        let text = match self.browser.find_all(&selectors::frame_body()).await {
            Ok(bodies) => match bodies.first() {
                Some(body) => self.browser.text(body).await.ok(),
                None => None,
            },
            Err(_) => None,
        };
        if let Err(e) = self.browser.switch_to_parent_frame().await {
            debug!(error = %e, "Could not leave frame");
        }
        text
    }
}

fn has_clinical_markers(text: &str) -> bool {
    selectors::CLINICAL_MARKERS.iter().any(|m| text.contains(m))
}

/// Undo literal escape sequences and collapse whitespace, keeping line breaks.
pub fn clean_notes(raw: &str) -> String {
    let unescaped = raw
        .replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\t", " ")
        .replace('\r', "");
    unescaped
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
