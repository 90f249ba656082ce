//! Ordered fallback selectors for one logical page element.
//!
//! The host UI renders the same control with different ids and classes
//! depending on version and screen, so every lookup is a chain of
//! strategies tried in order. The first strategy yielding a visible
//! element wins.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{is_interactable, Browser, ElementId, Locator, POLL_INTERVAL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorChain {
    name: String,
    steps: Vec<Locator>,
}

/// An element found by a chain, with the strategy that matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub element: ElementId,
    /// 0-based index of the strategy that matched
    pub strategy: usize,
}

impl LocatorChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, locator: Locator) -> Self {
        self.steps.push(locator);
        self
    }

    pub fn css(self, selector: impl Into<String>) -> Self {
        self.then(Locator::css(selector))
    }

    pub fn xpath(self, expression: impl Into<String>) -> Self {
        self.then(Locator::xpath(expression))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Locator] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// First displayed element across the strategies, or `None` if every strategy misses.
    pub async fn first_visible(&self, browser: &dyn Browser) -> Option<Located> {
        self.first_matching(browser, false).await
    }

    /// Like [`first_visible`](Self::first_visible) but the element must also be enabled.
    pub async fn first_interactable(&self, browser: &dyn Browser) -> Option<Located> {
        self.first_matching(browser, true).await
    }

    /// Retry [`first_visible`](Self::first_visible) until it hits or `timeout` elapses.
    pub async fn wait_for_visible(
        &self,
        browser: &dyn Browser,
        timeout: Duration,
    ) -> Option<Located> {
        self.wait_for(browser, timeout, false).await
    }

    /// Retry [`first_interactable`](Self::first_interactable) until it hits or `timeout` elapses.
    pub async fn wait_for_interactable(
        &self,
        browser: &dyn Browser,
        timeout: Duration,
    ) -> Option<Located> {
        self.wait_for(browser, timeout, true).await
    }

    async fn wait_for(
        &self,
        browser: &dyn Browser,
        timeout: Duration,
        require_enabled: bool,
    ) -> Option<Located> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.first_matching(browser, require_enabled).await {
                return Some(found);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    target_name = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "No strategy matched before timeout"
                );
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn first_matching(
        &self,
        browser: &dyn Browser,
        require_enabled: bool,
    ) -> Option<Located> {
        for (strategy, locator) in self.steps.iter().enumerate() {
            let elements = match browser.find_all(locator).await {
                Ok(elements) => elements,
                Err(e) => {
                    debug!(
                        target_name = %self.name,
                        strategy,
                        error = %e,
                        "Strategy lookup failed"
                    );
                    continue;
                }
            };
            for element in elements {
                let usable = if require_enabled {
                    is_interactable(browser, &element).await
                } else {
                    matches!(browser.is_displayed(&element).await, Ok(true))
                };
                if usable {
                    debug!(
                        target_name = %self.name,
                        strategy,
                        locator = %locator,
                        "Element located"
                    );
                    return Some(Located { element, strategy });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;

    fn chain() -> LocatorChain {
        LocatorChain::new("login button")
            .css("#loginButton")
            .css(".btn-login")
            .xpath("//button[normalize-space(.)='Log In']")
    }

    #[tokio::test]
    async fn test_first_strategy_wins() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            s.add(Locator::css("#loginButton"), "a");
            s.add(Locator::css(".btn-login"), "b");
        });
        let found = chain().first_visible(&browser).await.unwrap();
        assert_eq!(found.element, ElementId::new("a"));
        assert_eq!(found.strategy, 0);
    }

    #[tokio::test]
    async fn test_hidden_elements_fall_through() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            s.add(Locator::css("#loginButton"), "a");
            s.hide("a");
            s.add(Locator::xpath("//button[normalize-space(.)='Log In']"), "c");
        });
        let found = chain().first_visible(&browser).await.unwrap();
        assert_eq!(found.element, ElementId::new("c"));
        assert_eq!(found.strategy, 2);
    }

    #[tokio::test]
    async fn test_disabled_skipped_when_interactable_required() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            s.add(Locator::css("#loginButton"), "a");
            s.disable("a");
            s.add(Locator::css(".btn-login"), "b");
        });
        assert_eq!(chain().first_visible(&browser).await.unwrap().strategy, 0);
        assert_eq!(chain().first_interactable(&browser).await.unwrap().strategy, 1);
    }

    #[tokio::test]
    async fn test_all_strategies_miss() {
        let browser = FakeBrowser::new();
        assert!(chain().first_visible(&browser).await.is_none());
        assert_eq!(browser.with_state(|s| s.find_count(&Locator::css(".btn-login"))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_visible_gives_up_after_timeout() {
        let browser = FakeBrowser::new();
        let started = Instant::now();
        let found = chain().wait_for_visible(&browser, Duration::from_secs(2)).await;
        assert!(found.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_interactable_waits_until_enabled() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            s.add(Locator::css(".btn-login"), "b");
            s.enable_after("b", 2);
        });
        let started = Instant::now();
        let found = chain()
            .wait_for_interactable(&browser, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(found.element, ElementId::new("b"));
        assert_eq!(started.elapsed(), POLL_INTERVAL * 2);
    }
}
