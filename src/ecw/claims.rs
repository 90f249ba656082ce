//! Claims lookup: filter to all claims and open the target claim.

use tracing::{debug, info};

use super::{click_when_visible, selectors, settle, NavigationError};
use crate::artifacts::Artifacts;
use crate::browser::Browser;
use crate::config::Config;

/// Most candidate claim numbers listed when the target is missing
const MAX_LISTED_CANDIDATES: usize = 25;

pub struct ClaimsLookup<'a> {
    browser: &'a dyn Browser,
    config: &'a Config,
    artifacts: &'a Artifacts,
}

impl<'a> ClaimsLookup<'a> {
    pub fn new(browser: &'a dyn Browser, config: &'a Config, artifacts: &'a Artifacts) -> Self {
        Self {
            browser,
            config,
            artifacts,
        }
    }

    /// Run the lookup with status "All Claims" and open the configured claim.
    pub async fn open_claim(&self) -> Result<(), NavigationError> {
        let timeout = self.config.browser.wait_timeout;
        let claim_id = &self.config.claim_id;

        let open = selectors::lookup_panel_button();
        click_when_visible(self.browser, &open, timeout, "lookup: open").await?;
        settle().await;
        let all_claims = selectors::all_claims_option();
        click_when_visible(self.browser, &all_claims, timeout, "lookup: claim status").await?;
        let run = selectors::run_lookup_button();
        click_when_visible(self.browser, &run, timeout, "lookup: run").await?;
        settle().await;
        self.artifacts.capture(self.browser, "claims_list").await;

        let chain = selectors::claim_cell(claim_id);
        let Some(cell) = chain.wait_for_visible(self.browser, timeout).await else {
            self.log_candidates().await;
            self.artifacts.capture(self.browser, "claim_not_found").await;
            return Err(NavigationError::ClaimNotFound(claim_id.clone()));
        };

        self.browser
            .click(&cell.element)
            .await
            .map_err(NavigationError::browser("lookup: open claim"))?;
        settle().await;

        info!(
            event = "claim_opened",
            claim_id = %claim_id,
            strategy = cell.strategy,
            "Claim opened"
        );
        self.artifacts.capture(self.browser, &format!("claim_{claim_id}_opened")).await;
        Ok(())
    }

    /// Debug listing of numeric cells, to tell a wrong id from an empty result.
    async fn log_candidates(&self) {
        let cells = self
            .browser
            .find_all(&selectors::numeric_cells())
            .await
            .unwrap_or_default();
        let mut candidates = Vec::new();
        for cell in cells.iter().take(MAX_LISTED_CANDIDATES) {
            if let Ok(text) = self.browser.text(cell).await {
                candidates.push(text.trim().to_string());
            }
        }
        debug!(
            claim_id = %self.config.claim_id,
            visible = cells.len(),
            candidates = ?candidates,
            "Target claim missing from lookup results"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeBrowser, FakeState};

    fn config() -> Config {
        Config::parse(
            "[DEFAULT]\nusername = u\npassword = p\nurl = https://ecw.example.org/\n\
             target_date = 08-14-2025\nclaim_id = 39359\n[BROWSER]\nwait_timeout = 1000\n",
        )
        .unwrap()
    }

    fn lookup_controls(s: &mut FakeState) {
        s.add(selectors::lookup_panel_button().steps()[0].clone(), "lookup");
        s.add(selectors::all_claims_option().steps()[0].clone(), "all-claims");
        s.add(selectors::run_lookup_button().steps()[0].clone(), "run-lookup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_opened_after_lookup() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            lookup_controls(s);
            s.on_click("run-lookup", |s| {
                s.add(selectors::claim_cell("39359").steps()[1].clone(), "cell-39359");
            });
        });
        let config = config();
        let artifacts = Artifacts::new(".", false);

        ClaimsLookup::new(&browser, &config, &artifacts)
            .open_claim()
            .await
            .unwrap();

        browser.with_state(|s| {
            let order: Vec<&str> = s.clicks.iter().map(|c| c.0.as_str()).collect();
            assert_eq!(order, vec!["lookup", "all-claims", "run-lookup", "cell-39359"]);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_claim_reported() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            lookup_controls(s);
            s.add(selectors::numeric_cells(), "other");
            s.set_text("other", "38939");
        });
        let config = config();
        let artifacts = Artifacts::new(".", false);

        let err = ClaimsLookup::new(&browser, &config, &artifacts)
            .open_claim()
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationError::ClaimNotFound(id) if id == "39359"));
        assert_eq!(browser.with_state(|s| s.find_count(&selectors::numeric_cells())), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_status_filter_is_fatal() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            s.add(selectors::lookup_panel_button().steps()[0].clone(), "lookup");
        });
        let config = config();
        let artifacts = Artifacts::new(".", false);

        let err = ClaimsLookup::new(&browser, &config, &artifacts)
            .open_claim()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NavigationError::ElementNotFound { step: "lookup: claim status", .. }
        ));
    }
}
