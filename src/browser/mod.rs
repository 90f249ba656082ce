//! Browser session abstraction used by the host UI drivers.
//!
//! The drivers only talk to the [`Browser`] trait; [`WebDriverBrowser`]
//! implements it over the W3C WebDriver wire protocol.

pub mod locator;
pub mod webdriver;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub use locator::{Located, LocatorChain};
pub use webdriver::WebDriverBrowser;

/// Interval between checks while waiting on a page condition
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("WebDriver request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("WebDriver error '{error}': {message}")]
    Protocol { error: String, message: String },

    #[error("Element is no longer attached to the page: {0}")]
    StaleElement(String),

    #[error("Unexpected WebDriver response: {0}")]
    UnexpectedResponse(String),
}

/// How to find elements on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::XPath(expression.into())
    }

    /// WebDriver `using` strategy name
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Css(_) => "css selector",
            Self::XPath(_) => "xpath",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Css(s) | Self::XPath(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Opaque handle to an element in the current browsing context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Tab,
}

impl Key {
    /// WebDriver key code point
    pub fn code_point(self) -> char {
        match self {
            Self::Tab => '\u{E004}',
        }
    }
}

/// Operations the drivers need from a live browser session.
///
/// Frame switching is stateful: element lookups resolve inside the
/// currently selected frame until `switch_to_parent_frame` is called.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// All elements matching `locator`, in document order. Empty when none match.
    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementId>, BrowserError>;

    async fn is_displayed(&self, element: &ElementId) -> Result<bool, BrowserError>;
    async fn is_enabled(&self, element: &ElementId) -> Result<bool, BrowserError>;
    async fn click(&self, element: &ElementId) -> Result<(), BrowserError>;
    async fn clear(&self, element: &ElementId) -> Result<(), BrowserError>;
    async fn type_text(&self, element: &ElementId, text: &str) -> Result<(), BrowserError>;
    async fn text(&self, element: &ElementId) -> Result<String, BrowserError>;
    async fn attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, BrowserError>;

    /// Press and release a key on the focused element
    async fn press_key(&self, key: Key) -> Result<(), BrowserError>;

    async fn switch_to_frame(&self, frame: &ElementId) -> Result<(), BrowserError>;
    async fn switch_to_parent_frame(&self) -> Result<(), BrowserError>;

    /// PNG bytes of the current viewport
    async fn screenshot_png(&self) -> Result<Vec<u8>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// Visible and enabled. Lookup errors count as "no".
pub async fn is_interactable(browser: &dyn Browser, element: &ElementId) -> bool {
    matches!(browser.is_displayed(element).await, Ok(true))
        && matches!(browser.is_enabled(element).await, Ok(true))
}

/// Click into a field, clear it and type `text`.
pub async fn fill(
    browser: &dyn Browser,
    element: &ElementId,
    text: &str,
) -> Result<(), BrowserError> {
    browser.click(element).await?;
    browser.clear(element).await?;
    browser.type_text(element, text).await
}

/// Poll `condition` every [`POLL_INTERVAL`] until it holds or `timeout` elapses.
///
/// The condition is always checked at least once.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_strategy_names() {
        assert_eq!(Locator::css("#login").strategy(), "css selector");
        assert_eq!(Locator::xpath("//input").strategy(), "xpath");
        assert_eq!(Locator::css("#login").to_string(), "css=#login");
    }

    #[test]
    fn test_key_code_points() {
        assert_eq!(Key::Tab.code_point(), '\u{E004}');
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out() {
        let started = Instant::now();
        let held = wait_until(Duration::from_secs(1), || async { false }).await;
        assert!(!held);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_polls_until_true() {
        let mut calls = 0;
        let held = wait_until(Duration::from_secs(5), || {
            calls += 1;
            let done = calls >= 3;
            async move { done }
        })
        .await;
        assert!(held);
        assert_eq!(calls, 3);
    }
}
