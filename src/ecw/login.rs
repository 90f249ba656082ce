//! Login, including the two-step username/password form.

use tracing::{debug, info};

use super::{click_when_visible, fill_when_visible, selectors, NavigationError};
use crate::artifacts::Artifacts;
use crate::browser::{fill, wait_until, Browser};
use crate::config::Config;

pub struct LoginDriver<'a> {
    browser: &'a dyn Browser,
    config: &'a Config,
    artifacts: &'a Artifacts,
}

impl<'a> LoginDriver<'a> {
    pub fn new(browser: &'a dyn Browser, config: &'a Config, artifacts: &'a Artifacts) -> Self {
        Self {
            browser,
            config,
            artifacts,
        }
    }

    /// Open the login page and sign in. Succeeds once the URL leaves the login pages.
    pub async fn login(&self) -> Result<(), NavigationError> {
        let timeout = self.config.browser.wait_timeout;
        let credentials = &self.config.credentials;

        self.browser
            .goto(&self.config.url)
            .await
            .map_err(NavigationError::browser("login: open page"))?;

        fill_when_visible(
            self.browser,
            &selectors::username_field(),
            &credentials.username,
            timeout,
            "login: username",
        )
        .await?;

        let password_chain = selectors::password_field();
        let password_on_first_page = match password_chain.first_interactable(self.browser).await {
            Some(field) => {
                fill(self.browser, &field.element, &credentials.password)
                    .await
                    .map_err(NavigationError::browser("login: password"))?;
                true
            }
            None => {
                debug!("Password field not on first page; expecting two-step login");
                false
            }
        };

        let login_page = self.current_url().await?;
        let submit = selectors::login_button();
        click_when_visible(self.browser, &submit, timeout, "login: submit").await?;

        let browser = self.browser;
        let needs_password_page = if password_on_first_page {
            let login_page = login_page.as_str();
            wait_until(timeout, move || async move {
                browser
                    .current_url()
                    .await
                    .map(|url| url != login_page)
                    .unwrap_or(false)
            })
            .await;
            self.current_url().await?.contains(selectors::PASSWORD_PAGE_MARKER)
        } else {
            true
        };

        if needs_password_page {
            info!("Completing two-step login on password page");
            fill_when_visible(
                self.browser,
                &password_chain,
                &credentials.password,
                timeout,
                "login: password page",
            )
            .await?;
            let submit = selectors::login_button();
            click_when_visible(self.browser, &submit, timeout, "login: submit password").await?;
        }

        let left_login = wait_until(timeout, move || async move {
            browser
                .current_url()
                .await
                .map(|url| !url.to_lowercase().contains("login"))
                .unwrap_or(false)
        })
        .await;

        if !left_login {
            let url = self.current_url().await?;
            self.artifacts.capture(self.browser, "login_failed").await;
            return Err(NavigationError::LoginRejected(url));
        }

        info!(event = "login_succeeded", "Logged in");
        self.artifacts.capture(self.browser, "ecw_after_login").await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, NavigationError> {
        self.browser
            .current_url()
            .await
            .map_err(NavigationError::browser("login: read url"))
    }
}
