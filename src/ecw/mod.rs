//! Drivers for the eClinicalWorks web UI.
//!
//! Each driver borrows the browser session, the run configuration and the
//! artifact writer, and walks one part of the host workflow.

pub mod claims;
pub mod login;
pub mod navigation;
pub mod notes;
pub mod population;
pub mod selectors;

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::browser::{fill, Browser, BrowserError, Located, LocatorChain};

pub use claims::ClaimsLookup;
pub use login::LoginDriver;
pub use navigation::NavigationDriver;
pub use notes::{ExtractedNotes, ExtractionFailed, NotesExtractor};
pub use population::{CodePopulator, PopulationSummary, RowPopulationError};

/// Pause after clicks that trigger client-side rendering
pub(crate) const SETTLE: Duration = Duration::from_millis(1500);

/// An expected UI element never appeared. Fatal for the run.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("{step}: no element matched any of the {tried} selector(s) for {target}")]
    ElementNotFound {
        step: &'static str,
        target: String,
        tried: usize,
    },

    #[error("{step}: timed out after {timeout_ms} ms waiting for {condition}")]
    Timeout {
        step: &'static str,
        condition: String,
        timeout_ms: u64,
    },

    #[error("Login was not accepted; still on {0}")]
    LoginRejected(String),

    #[error("Claim {0} not found in lookup results")]
    ClaimNotFound(String),

    #[error("Calendar could not be set to {0}")]
    CalendarDate(String),

    #[error("{step}: browser error: {source}")]
    Browser {
        step: &'static str,
        #[source]
        source: BrowserError,
    },
}

impl NavigationError {
    pub(crate) fn browser(step: &'static str) -> impl FnOnce(BrowserError) -> Self {
        move |source| Self::Browser { step, source }
    }

    pub(crate) fn not_found(step: &'static str, chain: &LocatorChain) -> Self {
        Self::ElementNotFound {
            step,
            target: chain.name().to_string(),
            tried: chain.len(),
        }
    }
}

/// Wait for `chain` to show an element and click it.
pub(crate) async fn click_when_visible(
    browser: &dyn Browser,
    chain: &LocatorChain,
    timeout: Duration,
    step: &'static str,
) -> Result<Located, NavigationError> {
    let found = chain
        .wait_for_visible(browser, timeout)
        .await
        .ok_or_else(|| NavigationError::not_found(step, chain))?;
    browser
        .click(&found.element)
        .await
        .map_err(NavigationError::browser(step))?;
    Ok(found)
}

/// Wait for `chain` to show an element and type `text` into it.
pub(crate) async fn fill_when_visible(
    browser: &dyn Browser,
    chain: &LocatorChain,
    text: &str,
    timeout: Duration,
    step: &'static str,
) -> Result<Located, NavigationError> {
    let found = chain
        .wait_for_visible(browser, timeout)
        .await
        .ok_or_else(|| NavigationError::not_found(step, chain))?;
    fill(browser, &found.element, text)
        .await
        .map_err(NavigationError::browser(step))?;
    Ok(found)
}

/// Close any visible modal. Best-effort.
pub(crate) async fn dismiss_dialogs(browser: &dyn Browser) {
    if let Some(found) = selectors::dialog_close_buttons().first_interactable(browser).await {
        debug!(strategy = found.strategy, "Closing open dialog");
        if let Err(e) = browser.click(&found.element).await {
            debug!(error = %e, "Dialog close click failed");
        }
    }
}

pub(crate) async fn settle() {
    tokio::time::sleep(SETTLE).await;
}
