//! Menu navigation to the Claims screen and the Service Date filter.

use chrono::{Datelike, Month, NaiveDate};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{click_when_visible, selectors, settle, NavigationError};
use crate::artifacts::Artifacts;
use crate::browser::{wait_until, Browser, ElementId, Locator};
use crate::config::{Config, TARGET_DATE_FORMAT};

/// Pause between calendar interactions
const CALENDAR_PAUSE: Duration = Duration::from_millis(500);

/// Furthest the arrow navigation will step from the displayed month
const MAX_MONTH_STEPS: u32 = 36;

pub struct NavigationDriver<'a> {
    browser: &'a dyn Browser,
    config: &'a Config,
    artifacts: &'a Artifacts,
}

impl<'a> NavigationDriver<'a> {
    pub fn new(browser: &'a dyn Browser, config: &'a Config, artifacts: &'a Artifacts) -> Self {
        Self {
            browser,
            config,
            artifacts,
        }
    }

    /// Main menu → Billing → Claims, then wait for the claims filter to render.
    pub async fn open_claims(&self) -> Result<(), NavigationError> {
        let timeout = self.config.browser.wait_timeout;

        click_when_visible(self.browser, &selectors::main_menu(), timeout, "menu: open").await?;
        settle().await;
        let billing = selectors::billing_menu();
        click_when_visible(self.browser, &billing, timeout, "menu: billing").await?;
        settle().await;
        click_when_visible(self.browser, &selectors::claims_menu(), timeout, "menu: claims").await?;

        let browser = self.browser;
        let ready = wait_until(timeout, move || async move {
            visible_elements(browser, &selectors::calendar_icons()).await.len() >= 2
        })
        .await;
        if !ready {
            return Err(NavigationError::Timeout {
                step: "menu: claims",
                condition: "service date calendars".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        info!(event = "claims_page_opened", "Claims page opened");
        Ok(())
    }

    /// Set both Service Date FROM and TO to `date` through the calendar widget.
    pub async fn set_service_dates(&self, date: NaiveDate) -> Result<(), NavigationError> {
        let icons = visible_elements(self.browser, &selectors::calendar_icons()).await;
        if icons.len() < 2 {
            return Err(NavigationError::ElementNotFound {
                step: "service date",
                target: format!("FROM and TO calendar icons (found {})", icons.len()),
                tried: 1,
            });
        }

        for (label, icon) in ["FROM", "TO"].into_iter().zip(icons.iter()) {
            debug!(field = label, "Setting service date");
            self.browser
                .click(icon)
                .await
                .map_err(NavigationError::browser("service date: open calendar"))?;
            tokio::time::sleep(CALENDAR_PAUSE).await;
            self.pick_date(date).await?;
            tokio::time::sleep(CALENDAR_PAUSE).await;
        }

        info!(
            event = "service_dates_set",
            date = %date.format(TARGET_DATE_FORMAT),
            "Service dates set"
        );
        self.artifacts.capture(self.browser, "service_dates_set").await;
        Ok(())
    }

    async fn pick_date(&self, date: NaiveDate) -> Result<(), NavigationError> {
        if !self.select_from_dropdowns(date).await? {
            self.step_to_month(date).await?;
        }
        self.click_day(date).await
    }

    /// Use the month/year dropdowns when the picker has them. `false` if it does not.
    async fn select_from_dropdowns(&self, date: NaiveDate) -> Result<bool, NavigationError> {
        let Some(month) = month_of(date) else {
            return Ok(false);
        };
        let month_labels = vec![
            month.name().to_string(),
            month.name()[..3].to_string(),
            date.month0().to_string(),
        ];

        let month_select = first_visible_xpath(self.browser, &selectors::MONTH_SELECTS).await;
        let Some(month_select) = month_select else {
            return Ok(false);
        };
        self.choose_option(month_select, &month_labels).await?;

        let year_select = first_visible_xpath(self.browser, &selectors::YEAR_SELECTS).await;
        if let Some(year_select) = year_select {
            self.choose_option(year_select, &[date.year().to_string()]).await?;
        }
        Ok(true)
    }

    async fn choose_option(
        &self,
        select_xpath: &str,
        labels: &[String],
    ) -> Result<(), NavigationError> {
        let option = selectors::select_option(select_xpath, labels);
        let found = self
            .browser
            .find_all(&option)
            .await
            .map_err(NavigationError::browser("calendar: option"))?;
        let Some(element) = found.first() else {
            return Err(NavigationError::CalendarDate(format!(
                "no option {} in {select_xpath}",
                labels.join("/")
            )));
        };
        self.browser
            .click(element)
            .await
            .map_err(NavigationError::browser("calendar: option"))?;
        tokio::time::sleep(CALENDAR_PAUSE).await;
        Ok(())
    }

    /// Arrow navigation against the month shown in the picker header.
    async fn step_to_month(&self, date: NaiveDate) -> Result<(), NavigationError> {
        let Some(shown) = self.displayed_month().await else {
            warn!("Calendar header unreadable; assuming target month is displayed");
            return Ok(());
        };
        let target = month_index(date.year(), date.month());
        let diff = target - shown;
        if diff == 0 {
            return Ok(());
        }
        if diff.unsigned_abs() > MAX_MONTH_STEPS {
            return Err(NavigationError::CalendarDate(format!(
                "{} is {diff} months from the displayed month",
                date.format(TARGET_DATE_FORMAT)
            )));
        }

        let arrow = if diff > 0 {
            selectors::calendar_next()
        } else {
            selectors::calendar_previous()
        };
        for _ in 0..diff.unsigned_abs() {
            let found = arrow
                .first_visible(self.browser)
                .await
                .ok_or_else(|| NavigationError::not_found("calendar: month arrow", &arrow))?;
            self.browser
                .click(&found.element)
                .await
                .map_err(NavigationError::browser("calendar: month arrow"))?;
            tokio::time::sleep(CALENDAR_PAUSE).await;
        }

        match self.displayed_month().await {
            Some(now) if now != target => Err(NavigationError::CalendarDate(format!(
                "{} (picker stopped on a different month)",
                date.format(TARGET_DATE_FORMAT)
            ))),
            _ => Ok(()),
        }
    }

    async fn displayed_month(&self) -> Option<i32> {
        let header = selectors::calendar_header().first_visible(self.browser).await?;
        let text = self.browser.text(&header.element).await.ok()?;
        parse_month_header(&text)
    }

    async fn click_day(&self, date: NaiveDate) -> Result<(), NavigationError> {
        let chain = selectors::calendar_day(date.day());
        for locator in chain.steps() {
            for cell in visible_elements(self.browser, locator).await {
                let class = self
                    .browser
                    .attribute(&cell, "class")
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                if is_inactive_day(&class) {
                    continue;
                }
                self.browser
                    .click(&cell)
                    .await
                    .map_err(NavigationError::browser("calendar: day"))?;
                return Ok(());
            }
        }
        Err(NavigationError::CalendarDate(date.format(TARGET_DATE_FORMAT).to_string()))
    }
}

async fn visible_elements(browser: &dyn Browser, locator: &Locator) -> Vec<ElementId> {
    let mut visible = Vec::new();
    for element in browser.find_all(locator).await.unwrap_or_default() {
        if matches!(browser.is_displayed(&element).await, Ok(true)) {
            visible.push(element);
        }
    }
    visible
}

async fn first_visible_xpath<'x>(browser: &dyn Browser, xpaths: &[&'x str]) -> Option<&'x str> {
    for &xpath in xpaths {
        if !visible_elements(browser, &Locator::xpath(xpath)).await.is_empty() {
            return Some(xpath);
        }
    }
    None
}

fn month_of(date: NaiveDate) -> Option<Month> {
    Month::try_from(date.month() as u8).ok()
}

fn month_index(year: i32, month: u32) -> i32 {
    year * 12 + month as i32 - 1
}

fn is_inactive_day(class: &str) -> bool {
    class
        .split_whitespace()
        .any(|c| selectors::INACTIVE_DAY_CLASSES.contains(&c))
}

/// Month index of a header like "August 2025" or "Aug 2025".
fn parse_month_header(text: &str) -> Option<i32> {
    let mut parts = text.split_whitespace();
    let name = parts.next()?.to_ascii_lowercase();
    let year: i32 = parts.next()?.trim_matches(|c: char| !c.is_ascii_digit()).parse().ok()?;
    if name.len() < 3 {
        return None;
    }
    let month = (1..=12u32).find(|m| {
        Month::try_from(*m as u8)
            .map(|month| month.name().to_ascii_lowercase().starts_with(&name[..3]))
            .unwrap_or(false)
    })?;
    Some(month_index(year, month))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;

    fn config() -> Config {
        Config::parse(
            "[DEFAULT]\nusername = u\npassword = p\nurl = https://ecw.example.org/\n\
             target_date = 08-14-2025\nclaim_id = 39359\n[BROWSER]\nwait_timeout = 1000\n",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_month_header() {
        assert_eq!(parse_month_header("August 2025"), Some(month_index(2025, 8)));
        assert_eq!(parse_month_header("  Aug 2025 "), Some(month_index(2025, 8)));
        assert_eq!(parse_month_header("Dec 2024"), Some(month_index(2024, 12)));
        assert_eq!(parse_month_header("2025"), None);
        assert_eq!(parse_month_header("Someday 2025"), None);
    }

    #[test]
    fn test_inactive_day_classes() {
        assert!(is_inactive_day("day old"));
        assert!(is_inactive_day("day disabled"));
        assert!(!is_inactive_day("day active"));
        assert!(!is_inactive_day("day newest-custom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_claims_walks_menu() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            s.add(selectors::main_menu().steps()[0].clone(), "menu");
            s.add(selectors::billing_menu().steps()[0].clone(), "billing");
            s.add(selectors::claims_menu().steps()[0].clone(), "claims");
            s.on_click("claims", |s| {
                s.add(selectors::calendar_icons(), "from");
                s.add(selectors::calendar_icons(), "to");
            });
        });
        let config = config();
        let artifacts = Artifacts::new(".", false);

        NavigationDriver::new(&browser, &config, &artifacts)
            .open_claims()
            .await
            .unwrap();
        browser.with_state(|s| {
            let order: Vec<&str> = s.clicks.iter().map(|c| c.0.as_str()).collect();
            assert_eq!(order, vec!["menu", "billing", "claims"]);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_claims_times_out_without_calendars() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            s.add(selectors::main_menu().steps()[0].clone(), "menu");
            s.add(selectors::billing_menu().steps()[0].clone(), "billing");
            s.add(selectors::claims_menu().steps()[1].clone(), "claims");
        });
        let config = config();
        let artifacts = Artifacts::new(".", false);

        let err = NavigationDriver::new(&browser, &config, &artifacts)
            .open_claims()
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationError::Timeout { step: "menu: claims", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dates_set_through_dropdowns() {
        let browser = FakeBrowser::new();
        let august = selectors::select_option(
            selectors::MONTH_SELECTS[0],
            &["August".to_string(), "Aug".to_string(), "7".to_string()],
        );
        let year = selectors::select_option(selectors::YEAR_SELECTS[0], &["2025".to_string()]);
        browser.with_state(|s| {
            s.add(selectors::calendar_icons(), "from");
            s.add(selectors::calendar_icons(), "to");
            s.add(Locator::xpath(selectors::MONTH_SELECTS[0]), "month-select");
            s.add(august, "opt-aug");
            s.add(Locator::xpath(selectors::YEAR_SELECTS[0]), "year-select");
            s.add(year, "opt-2025");
            s.add(selectors::calendar_day(14).steps()[0].clone(), "day-14");
        });
        let config = config();
        let artifacts = Artifacts::new(".", false);

        NavigationDriver::new(&browser, &config, &artifacts)
            .set_service_dates(config.target_date)
            .await
            .unwrap();

        browser.with_state(|s| {
            let order: Vec<&str> = s.clicks.iter().map(|c| c.0.as_str()).collect();
            assert_eq!(
                order,
                vec!["from", "opt-aug", "opt-2025", "day-14", "to", "opt-aug", "opt-2025", "day-14"]
            );
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_dates_set_with_arrows_skipping_greyed_days() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            s.add(selectors::calendar_icons(), "from");
            s.add(selectors::calendar_icons(), "to");
            s.add(selectors::calendar_header().steps()[0].clone(), "header");
            s.set_text("header", "June 2025");
            s.add(selectors::calendar_next().steps()[0].clone(), "next");
            s.on_click("next", |s| {
                let shown = if s.value_of("header-month").is_empty() {
                    6
                } else {
                    s.value_of("header-month").parse::<u32>().unwrap()
                };
                let now = shown + 1;
                s.set_value("header-month", &now.to_string());
                let name = Month::try_from(now as u8).unwrap().name();
                s.set_text("header", &format!("{name} 2025"));
            });
            // Neighbouring-month 14th matched by the loose fallback first
            s.add(selectors::calendar_day(14).steps()[1].clone(), "old-14");
            s.set_attribute("old-14", "class", "day old");
            s.add(selectors::calendar_day(14).steps()[1].clone(), "day-14");
            s.set_attribute("day-14", "class", "day");
        });
        let config = config();
        let artifacts = Artifacts::new(".", false);

        NavigationDriver::new(&browser, &config, &artifacts)
            .pick_date(config.target_date)
            .await
            .unwrap();

        browser.with_state(|s| {
            let order: Vec<&str> = s.clicks.iter().map(|c| c.0.as_str()).collect();
            assert_eq!(order, vec!["next", "next", "day-14"]);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_calendar_icons() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| s.add(selectors::calendar_icons(), "from"));
        let config = config();
        let artifacts = Artifacts::new(".", false);

        let err = NavigationDriver::new(&browser, &config, &artifacts)
            .set_service_dates(config.target_date)
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationError::ElementNotFound { step: "service date", .. }));
    }
}
