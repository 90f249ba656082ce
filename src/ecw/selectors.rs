//! Locator chains for the eClinicalWorks web UI.
//!
//! Each chain lists the primary selector first, then fallbacks for older
//! or differently configured screens.

use crate::browser::{Locator, LocatorChain};
use crate::codes::ModifierSlot;

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

pub fn username_field() -> LocatorChain {
    LocatorChain::new("username field")
        .css(r#"input[name="username"]"#)
        .css(r#"input[name="userName"]"#)
        .css(r#"input[name="user"]"#)
        .css("#username")
        .css("#userName")
        .css(r#"input[type="text"]"#)
}

pub fn password_field() -> LocatorChain {
    LocatorChain::new("password field")
        .css(r#"input[name="password"]"#)
        .css(r#"input[name="pwd"]"#)
        .css("#password")
        .css("#pwd")
        .css(r#"input[type="password"]"#)
}

pub fn login_button() -> LocatorChain {
    LocatorChain::new("login button")
        .css(r#"input[type="submit"]"#)
        .css(r#"button[type="submit"]"#)
        .xpath(
            "//button[contains(normalize-space(.),'Log In') \
             or contains(normalize-space(.),'Login')]",
        )
        .xpath(
            "//button[contains(normalize-space(.),'Sign In') \
             or contains(normalize-space(.),'Next')]",
        )
        .css("#login")
        .css("#loginButton")
        .css(".login-button")
        .css(".btn-login")
}

/// URL fragment of the separate password page in the two-step login
pub const PASSWORD_PAGE_MARKER: &str = "getPwdPage";

// ---------------------------------------------------------------------------
// Menu navigation
// ---------------------------------------------------------------------------

pub fn main_menu() -> LocatorChain {
    LocatorChain::new("main menu")
        .css("#jellybean-panelLink4.navgator.mainMenu")
        .css("#jellybean-panelLink4")
        .css(".navgator.mainMenu")
}

pub fn billing_menu() -> LocatorChain {
    LocatorChain::new("billing menu")
        .css(".icon.nav-label.icon-label-bill")
        .xpath("//*[contains(@class,'nav-label') and normalize-space(.)='Billing']")
}

pub fn claims_menu() -> LocatorChain {
    LocatorChain::new("claims menu")
        .css(".svgicon.svg-document1")
        .xpath("//a[normalize-space(.)='Claims']")
}

// ---------------------------------------------------------------------------
// Service date calendar
// ---------------------------------------------------------------------------

/// Calendar icons next to the Service Date inputs; FROM then TO
pub fn calendar_icons() -> Locator {
    Locator::css(".icon.icon-inputcalender")
}

/// XPaths of month `<select>` elements inside an open date picker
pub const MONTH_SELECTS: [&str; 3] = [
    "//select[contains(@class,'datepicker-months')]",
    "//select[contains(@class,'ui-datepicker-month')]",
    "//select[contains(@class,'month')]",
];

pub const YEAR_SELECTS: [&str; 3] = [
    "//select[contains(@class,'datepicker-years')]",
    "//select[contains(@class,'ui-datepicker-year')]",
    "//select[contains(@class,'year')]",
];

/// `<option>` of `select_xpath` whose label or value equals one of `labels`
pub fn select_option(select_xpath: &str, labels: &[String]) -> Locator {
    let predicate = labels
        .iter()
        .map(|l| format!("normalize-space(.)='{l}' or @value='{l}'"))
        .collect::<Vec<_>>()
        .join(" or ");
    Locator::xpath(format!("{select_xpath}/option[{predicate}]"))
}

pub fn calendar_header() -> LocatorChain {
    LocatorChain::new("calendar header")
        .css(".datepicker-switch")
        .css(".ui-datepicker-title")
        .css(".calendar-header .month")
        .css(".month-year")
}

pub fn calendar_previous() -> LocatorChain {
    LocatorChain::new("calendar previous")
        .css("th.prev")
        .css(".ui-datepicker-prev")
        .css(".prev")
        .css(r#"[aria-label="Previous"]"#)
}

pub fn calendar_next() -> LocatorChain {
    LocatorChain::new("calendar next")
        .css("th.next")
        .css(".ui-datepicker-next")
        .css(".next")
        .css(r#"[aria-label="Next"]"#)
}

/// Day cells for `day` that belong to the displayed month
pub fn calendar_day(day: u32) -> LocatorChain {
    LocatorChain::new(format!("calendar day {day}"))
        .xpath(format!(
            "//td[contains(concat(' ',normalize-space(@class),' '),' day ') \
             and not(contains(@class,'old')) and not(contains(@class,'new')) \
             and not(contains(@class,'disabled')) and normalize-space(.)='{day}']"
        ))
        .xpath(format!("//td[@data-day='{day}']"))
        .xpath(format!("//button[@data-day='{day}']"))
        .xpath(format!(
            "//div[contains(@class,'calendar-day') and normalize-space(.)='{day}']"
        ))
}

/// Classes marking a day cell from a neighbouring month or out of range
pub const INACTIVE_DAY_CLASSES: [&str; 4] = ["old", "new", "disabled", "ui-state-disabled"];

// ---------------------------------------------------------------------------
// Claims lookup
// ---------------------------------------------------------------------------

pub fn lookup_panel_button() -> LocatorChain {
    LocatorChain::new("lookup button")
        .xpath("//button[normalize-space(.)='Lookup']")
        .xpath("//*[contains(@class,'btn') and normalize-space(.)='Lookup']")
        .css("#btnclaimlookup")
        .css(r#"[ng-click*="getClaimsListFromLookup"]"#)
}

pub fn all_claims_option() -> LocatorChain {
    LocatorChain::new("claim status All Claims")
        .xpath("//select[@id='claimStatusCodeId']/option[normalize-space(.)='All Claims']")
        .xpath(
            "//select[contains(@ng-model,'claimStatus')]\
             /option[normalize-space(.)='All Claims']",
        )
}

pub fn run_lookup_button() -> LocatorChain {
    LocatorChain::new("run lookup button")
        .css("#btnclaimlookup")
        .css(r#"[ng-click*="getClaimsListFromLookup"]"#)
        .xpath("//button[contains(normalize-space(.),'Lookup')]")
}

/// Results-table cell for `claim_id`. The id is pre-validated as `[A-Za-z0-9-]+`.
pub fn claim_cell(claim_id: &str) -> LocatorChain {
    LocatorChain::new(format!("claim {claim_id}"))
        .xpath(format!("//a[normalize-space(.)='{claim_id}']"))
        .xpath(format!("//td[normalize-space(.)='{claim_id}']"))
        .xpath(format!("//span[normalize-space(.)='{claim_id}']"))
        .xpath(format!("//td[contains(normalize-space(.),'{claim_id}')]"))
}

/// Cells whose whole text is a number of four or more digits
pub fn numeric_cells() -> Locator {
    Locator::xpath(
        "//td[string-length(normalize-space(.)) >= 4 \
         and translate(normalize-space(.),'0123456789','') = '']",
    )
}

// ---------------------------------------------------------------------------
// Progress notes
// ---------------------------------------------------------------------------

pub fn progress_notes_button() -> LocatorChain {
    LocatorChain::new("Prog. Notes button")
        .xpath("//button[contains(normalize-space(.),'Prog. Notes')]")
        .xpath("//input[contains(@value,'Prog. Notes')]")
        .xpath("//*[contains(@class,'btn') and contains(normalize-space(.),'Prog. Notes')]")
        .xpath("//button[contains(normalize-space(.),'Progress Notes')]")
        .xpath("//*[contains(@title,'Progress Notes')]")
}

const LOWER: &str = "translate(@name,'ABCDEFGHIJKLMNOPQRSTUVWXYZ','abcdefghijklmnopqrstuvwxyz')";

pub fn notes_viewer_frame() -> LocatorChain {
    LocatorChain::new("progress note viewer frame")
        .xpath("//iframe[contains(@id,'ProgNote')]")
        .xpath(format!("//iframe[contains({LOWER},'prognote')]"))
        .xpath(format!("//iframe[contains({LOWER},'progress')]"))
}

pub fn any_frame() -> Locator {
    Locator::css("iframe")
}

pub fn frame_body() -> Locator {
    Locator::css("body")
}

pub fn inline_notes_panel() -> LocatorChain {
    LocatorChain::new("inline progress notes panel")
        .css("#progressNotes")
        .css(".progress-notes")
        .css("div[id*='ProgNote']")
        .css(".modal-body .notes-content")
}

/// Text fragments that only appear in rendered clinical notes
pub const CLINICAL_MARKERS: [&str; 8] = [
    "Patient:",
    "HPI:",
    "Subjective:",
    "Objective:",
    "Assessment:",
    "Examination:",
    "Plan:",
    "Chief Complaint",
];

// ---------------------------------------------------------------------------
// Dialogs
// ---------------------------------------------------------------------------

pub fn dialog_close_buttons() -> LocatorChain {
    LocatorChain::new("dialog close")
        .css(r#"button[aria-label="Close"]"#)
        .css(".modal .close")
        .css(".modal-close")
        .css("button.close")
        .xpath("//div[contains(@class,'modal')]//button[normalize-space(.)='Close']")
        .xpath("//button[normalize-space(.)='×']")
}

// ---------------------------------------------------------------------------
// Code entry
// ---------------------------------------------------------------------------

/// One way of finding the empty CPT entry row (marked `*` in the first cell)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentinelStrategy {
    pub name: &'static str,
    /// XPath of the code input in the sentinel row
    pub input: &'static str,
}

pub const SENTINEL_STRATEGIES: [SentinelStrategy; 3] = [
    SentinelStrategy {
        name: "newCPT model",
        input: "//input[@ng-model='newCPT']",
    },
    SentinelStrategy {
        name: "billing claim input",
        input: "//input[@id='billingClaimIpt34']",
    },
    SentinelStrategy {
        name: "star row",
        input: "(//tr[td[1][normalize-space(.)='*']]//input[@type='text'])[1]",
    },
];

impl SentinelStrategy {
    pub fn input_locator(&self) -> Locator {
        Locator::xpath(self.input)
    }

    /// Rows of the table body holding the sentinel row
    pub fn rows_xpath(&self) -> String {
        format!("{}/ancestor::tbody[1]/tr", self.input)
    }

    pub fn rows_locator(&self) -> Locator {
        Locator::xpath(self.rows_xpath())
    }

    /// Modifier input in the 1-based `row` of the table
    pub fn modifier_chain(&self, row: usize, slot: ModifierSlot) -> LocatorChain {
        let row_xpath = format!("({})[{row}]", self.rows_xpath());
        let [primary_hint, short_hint] = slot.field_hints();
        LocatorChain::new(format!("{slot} cell in row {row}"))
            .xpath(format!("{row_xpath}/td[{}]//input", slot.column()))
            .xpath(format!(
                "{row_xpath}//input[contains(@data-fieldname,'{primary_hint}')]"
            ))
            .xpath(format!(
                "{row_xpath}//input[contains(@data-fieldname,'{short_hint}')]"
            ))
    }
}

pub fn icd_entry_field() -> LocatorChain {
    LocatorChain::new("ICD entry field")
        .css(r#"input[ng-model="newICD"]"#)
        .css(r#"input[class*="claimICDInput"]"#)
        .css(r#"input[id*="txtnewIcd"]"#)
        .css(r#"input[ng-keydown*="lookupICDCode"]"#)
}
