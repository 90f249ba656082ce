//! Entry of predicted codes into the open claim.
//!
//! The CPT table always ends with an empty row (first cell `*`). Typing a
//! code there and tabbing out makes the page commit that row and append a
//! fresh empty one. Each code runs through one cycle:
//!
//! ```text
//! LocateSentinel -> FillCode -> TriggerRowCreation
//!     -> LocateModifierCells -> FillModifiers -> Advance
//! ```
//!
//! A cycle that fails at any state is recorded and the next code starts
//! from `LocateSentinel` again. Modifiers are only written once the new
//! row is confirmed, into the row that received the code.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::selectors::{self, SentinelStrategy, SENTINEL_STRATEGIES};
use super::{dismiss_dialogs, settle};
use crate::activity_log;
use crate::artifacts::Artifacts;
use crate::browser::{
    fill, is_interactable, Browser, BrowserError, ElementId, Key, POLL_INTERVAL,
};
use crate::codes::{ModifierSlot, PredictedCode};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    LocateSentinel,
    FillCode,
    TriggerRowCreation,
    LocateModifierCells,
    FillModifiers,
    Advance,
}

/// Failure of a single code entry. Recovered by moving to the next code.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowPopulationError {
    #[error("No empty entry row found with any of {tried} selector(s)")]
    SentinelNotFound { tried: usize },

    #[error("No new row appeared within {timeout_ms} ms (row count stayed at {rows})")]
    RowNotCreated { rows: usize, timeout_ms: u64 },

    #[error("{slot} input not found in row {row}")]
    ModifierCellNotFound { slot: ModifierSlot, row: usize },

    #[error("Browser error during {state:?}: {message}")]
    Browser { state: CycleState, message: String },

    #[error("Not entered: exceeds the bound of {bound} codes")]
    OverBound { bound: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Cpt,
    Icd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Populated,
    Failed,
    Skipped,
}

/// Outcome of one code, as shown to the reviewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeEntryReport {
    /// 1-based position in the entry order
    pub index: usize,
    pub kind: EntryKind,
    pub code: String,
    pub modifier1: Option<String>,
    pub modifier2: Option<String>,
    pub status: EntryStatus,
    /// 1-based table row that received the code. Set on failures too once
    /// the row was created, since the code is then already on the claim.
    pub row: Option<usize>,
    pub modifiers_written: Vec<ModifierSlot>,
    pub failed_at: Option<CycleState>,
    pub error: Option<RowPopulationError>,
}

impl CodeEntryReport {
    fn new(index: usize, kind: EntryKind, code: &PredictedCode, status: EntryStatus) -> Self {
        Self {
            index,
            kind,
            code: code.code.clone(),
            modifier1: code.modifier1.clone(),
            modifier2: code.modifier2.clone(),
            status,
            row: None,
            modifiers_written: Vec::new(),
            failed_at: None,
            error: None,
        }
    }

    fn populated(index: usize, kind: EntryKind, code: &PredictedCode, filled: FilledRow) -> Self {
        Self {
            row: Some(filled.row),
            modifiers_written: filled.modifiers_written,
            ..Self::new(index, kind, code, EntryStatus::Populated)
        }
    }

    fn failed(index: usize, kind: EntryKind, code: &PredictedCode, failure: CycleFailure) -> Self {
        Self {
            row: failure.row,
            modifiers_written: failure.modifiers_written,
            failed_at: Some(failure.state),
            error: Some(failure.error),
            ..Self::new(index, kind, code, EntryStatus::Failed)
        }
    }

    fn skipped(index: usize, code: &PredictedCode, error: RowPopulationError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(index, EntryKind::Cpt, code, EntryStatus::Skipped)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulationSummary {
    pub entries: Vec<CodeEntryReport>,
}

impl PopulationSummary {
    pub fn populated(&self) -> usize {
        self.count(EntryStatus::Populated)
    }

    pub fn failed(&self) -> usize {
        self.count(EntryStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(EntryStatus::Skipped)
    }

    /// Every entry that needs a human to finish it
    pub fn needs_review(&self) -> impl Iterator<Item = &CodeEntryReport> {
        self.entries
            .iter()
            .filter(|e| e.status != EntryStatus::Populated)
    }

    pub fn is_complete(&self) -> bool {
        self.needs_review().next().is_none()
    }

    fn count(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

#[derive(Debug)]
struct FilledRow {
    row: usize,
    modifiers_written: Vec<ModifierSlot>,
}

/// Rows in the CPT table body. `total` is the XPath position space.
#[derive(Debug, Clone, Copy)]
struct RowCount {
    total: usize,
    visible: usize,
}

#[derive(Debug)]
struct CycleFailure {
    state: CycleState,
    error: RowPopulationError,
    /// Row already holding the code when the cycle failed
    row: Option<usize>,
    modifiers_written: Vec<ModifierSlot>,
}

impl CycleFailure {
    fn new(state: CycleState, error: RowPopulationError) -> Self {
        Self {
            state,
            error,
            row: None,
            modifiers_written: Vec::new(),
        }
    }

    fn browser(state: CycleState) -> impl FnOnce(BrowserError) -> Self {
        move |e| {
            Self::new(
                state,
                RowPopulationError::Browser {
                    state,
                    message: e.to_string(),
                },
            )
        }
    }

    fn in_row(mut self, row: usize, modifiers_written: &[ModifierSlot]) -> Self {
        self.row = Some(row);
        self.modifiers_written = modifiers_written.to_vec();
        self
    }
}

pub struct CodePopulator<'a> {
    browser: &'a dyn Browser,
    artifacts: &'a Artifacts,
    wait_timeout: Duration,
    max_codes: usize,
}

impl<'a> CodePopulator<'a> {
    pub fn new(browser: &'a dyn Browser, config: &Config, artifacts: &'a Artifacts) -> Self {
        Self {
            browser,
            artifacts,
            wait_timeout: config.browser.wait_timeout,
            max_codes: config.predictor.max_codes,
        }
    }

    /// Enter `codes` in order, one row each. Never aborts: every code gets a report entry.
    pub async fn populate(&self, codes: &[PredictedCode]) -> PopulationSummary {
        info!(
            event = "population_start",
            code_count = codes.len(),
            bound = self.max_codes,
            "Starting CPT population"
        );
        self.artifacts
            .capture(self.browser, "before_cpt_population")
            .await;

        let mut summary = PopulationSummary::default();
        for (position, code) in codes.iter().enumerate() {
            let index = position + 1;
            if position >= self.max_codes {
                warn!(
                    index,
                    code = %code.code,
                    bound = self.max_codes,
                    "Code over bound; not entered"
                );
                summary.entries.push(CodeEntryReport::skipped(
                    index,
                    code,
                    RowPopulationError::OverBound {
                        bound: self.max_codes,
                    },
                ));
                continue;
            }

            let entry = match self.run_cycle(code).await {
                Ok(filled) => {
                    activity_log::log_code_cycle(
                        index,
                        &code.code,
                        filled.modifiers_written.len(),
                        true,
                        None,
                    );
                    self.artifacts
                        .capture(self.browser, &format!("after_cpt_{index}_{}", code.code))
                        .await;
                    CodeEntryReport::populated(index, EntryKind::Cpt, code, filled)
                }
                Err(failure) => {
                    activity_log::log_code_cycle(
                        index,
                        &code.code,
                        failure.modifiers_written.len(),
                        false,
                        Some(&failure.error.to_string()),
                    );
                    let shot = match &failure.error {
                        RowPopulationError::SentinelNotFound { .. } => {
                            format!("debug_no_star_row_{index}")
                        }
                        _ => format!("debug_cpt_{index}_{}", code.code),
                    };
                    self.artifacts.capture(self.browser, &shot).await;
                    CodeEntryReport::failed(index, EntryKind::Cpt, code, failure)
                }
            };
            summary.entries.push(entry);
        }

        info!(
            event = "population_finished",
            populated = summary.populated(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            "CPT population finished"
        );
        self.artifacts.capture(self.browser, "final_cpt_result").await;
        summary
    }

    async fn run_cycle(&self, code: &PredictedCode) -> Result<FilledRow, CycleFailure> {
        dismiss_dialogs(self.browser).await;

        // LocateSentinel
        let (strategy, sentinel) = self.locate_sentinel().await.ok_or_else(|| {
            CycleFailure::new(
                CycleState::LocateSentinel,
                RowPopulationError::SentinelNotFound {
                    tried: SENTINEL_STRATEGIES.len(),
                },
            )
        })?;
        let rows_before = self
            .row_count(&strategy)
            .await
            .map_err(CycleFailure::browser(CycleState::LocateSentinel))?;
        debug!(
            strategy = strategy.name,
            rows = rows_before.visible,
            code = %code.code,
            "Entry row located"
        );

        // FillCode
        fill(self.browser, &sentinel, &code.code)
            .await
            .map_err(CycleFailure::browser(CycleState::FillCode))?;

        // TriggerRowCreation
        self.browser
            .press_key(Key::Tab)
            .await
            .map_err(CycleFailure::browser(CycleState::TriggerRowCreation))?;
        self.wait_for_new_row(&strategy, rows_before).await?;

        // The entry row was last in the table and now holds the code
        let row = rows_before.total.max(1);

        // LocateModifierCells: new row inputs stay disabled while the code validates
        let mut cells: Vec<(ModifierSlot, &str, ElementId)> = Vec::new();
        for slot in ModifierSlot::ALL {
            let Some(value) = code.modifier(slot) else {
                continue;
            };
            let chain = strategy.modifier_chain(row, slot);
            let cell = chain
                .wait_for_interactable(self.browser, self.wait_timeout)
                .await
                .ok_or_else(|| {
                    CycleFailure::new(
                        CycleState::LocateModifierCells,
                        RowPopulationError::ModifierCellNotFound { slot, row },
                    )
                    .in_row(row, &[])
                })?;
            cells.push((slot, value, cell.element));
        }

        // FillModifiers
        let mut modifiers_written = Vec::with_capacity(cells.len());
        for (slot, value, cell) in cells {
            fill(self.browser, &cell, value).await.map_err(|e| {
                CycleFailure::browser(CycleState::FillModifiers)(e).in_row(row, &modifiers_written)
            })?;
            modifiers_written.push(slot);
        }

        // Advance
        Ok(FilledRow {
            row,
            modifiers_written,
        })
    }

    async fn locate_sentinel(&self) -> Option<(SentinelStrategy, ElementId)> {
        for strategy in SENTINEL_STRATEGIES {
            let Ok(found) = self.browser.find_all(&strategy.input_locator()).await else {
                continue;
            };
            for element in found {
                if is_interactable(self.browser, &element).await {
                    return Some((strategy, element));
                }
            }
        }
        None
    }

    async fn row_count(&self, strategy: &SentinelStrategy) -> Result<RowCount, BrowserError> {
        let rows = self.browser.find_all(&strategy.rows_locator()).await?;
        let mut visible = 0;
        for row in &rows {
            // A row re-rendered mid-count is not counted
            if matches!(self.browser.is_displayed(row).await, Ok(true)) {
                visible += 1;
            }
        }
        Ok(RowCount {
            total: rows.len(),
            visible,
        })
    }

    /// Poll until more rows are displayed than `before` or the wait times out.
    async fn wait_for_new_row(
        &self,
        strategy: &SentinelStrategy,
        before: RowCount,
    ) -> Result<RowCount, CycleFailure> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            let rows = self
                .row_count(strategy)
                .await
                .map_err(CycleFailure::browser(CycleState::TriggerRowCreation))?;
            if rows.visible > before.visible {
                return Ok(rows);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CycleFailure::new(
                    CycleState::TriggerRowCreation,
                    RowPopulationError::RowNotCreated {
                        rows: rows.visible,
                        timeout_ms: self.wait_timeout.as_millis() as u64,
                    },
                ));
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Enter ICD codes through the diagnosis "new entry" field.
    pub async fn enter_icd_codes(&self, codes: &[String]) -> Vec<CodeEntryReport> {
        let chain = selectors::icd_entry_field();
        let mut entries = Vec::with_capacity(codes.len());

        for (position, icd) in codes.iter().enumerate() {
            let index = position + 1;
            let code = PredictedCode::new(icd.clone());
            dismiss_dialogs(self.browser).await;

            let result = match chain.first_interactable(self.browser).await {
                None => Err(CycleFailure::new(
                    CycleState::LocateSentinel,
                    RowPopulationError::SentinelNotFound { tried: chain.len() },
                )),
                Some(field) => {
                    let typed = fill(self.browser, &field.element, icd)
                        .await
                        .map_err(CycleFailure::browser(CycleState::FillCode));
                    match typed {
                        Ok(()) => self
                            .browser
                            .press_key(Key::Tab)
                            .await
                            .map_err(CycleFailure::browser(CycleState::TriggerRowCreation)),
                        Err(e) => Err(e),
                    }
                }
            };

            let entry = match result {
                Ok(()) => {
                    settle().await;
                    info!(event = "icd_entered", index, code = %icd, "ICD code entered");
                    CodeEntryReport::new(index, EntryKind::Icd, &code, EntryStatus::Populated)
                }
                Err(failure) => {
                    warn!(index, code = %icd, error = %failure.error, "ICD entry failed");
                    self.artifacts
                        .capture(self.browser, &format!("debug_icd_{index}"))
                        .await;
                    CodeEntryReport::failed(index, EntryKind::Icd, &code, failure)
                }
            };
            entries.push(entry);
        }
        entries
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::browser::fake::{FakeBrowser, FakeState};

    fn config(max_codes: usize) -> Config {
        Config::parse(&format!(
            "[DEFAULT]\nusername = u\npassword = p\nurl = https://ecw.example.org/\n\
             target_date = 08-14-2025\nclaim_id = 39359\n[BROWSER]\nwait_timeout = 2000\n\
             [PREDICTOR]\nmax_codes = {max_codes}\n"
        ))
        .unwrap()
    }

    /// CPT table with one empty row; tabbing out of a filled entry row appends a row.
    pub(crate) fn claim_table(s: &mut FakeState, strategy: SentinelStrategy, creates_rows: bool) {
        s.add(strategy.input_locator(), "sentinel");
        s.set_elements(strategy.rows_locator(), &["row-1".to_string()]);
        let mut rows = vec!["row-1".to_string()];
        s.on_key(move |s, key| {
            if key != Key::Tab || !creates_rows {
                return;
            }
            if s.focused != Some(ElementId::new("sentinel")) || s.value_of("sentinel").is_empty() {
                return;
            }
            let filled = rows.len();
            for slot in ModifierSlot::ALL {
                s.add(
                    strategy.modifier_chain(filled, slot).steps()[0].clone(),
                    &format!("r{filled}-{slot}"),
                );
            }
            rows.push(format!("row-{}", rows.len() + 1));
            s.set_elements(strategy.rows_locator(), &rows);
            s.set_value("sentinel", "");
        });
    }

    fn codes() -> Vec<PredictedCode> {
        vec![
            PredictedCode::new("97110").with_modifiers(Some("GP"), None),
            PredictedCode::new("97140").with_modifiers(Some("GP"), Some("59")),
            PredictedCode::new("97530"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_codes_entered_in_order_one_row_each() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| claim_table(s, SENTINEL_STRATEGIES[0], true));
        let config = config(12);
        let artifacts = Artifacts::new(".", false);

        let summary = CodePopulator::new(&browser, &config, &artifacts)
            .populate(&codes())
            .await;

        assert_eq!(summary.populated(), 3);
        assert!(summary.is_complete());
        let rows: Vec<Option<usize>> = summary.entries.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![Some(1), Some(2), Some(3)]);

        browser.with_state(|s| {
            assert_eq!(s.typed_into("sentinel"), vec!["97110", "97140", "97530"]);
            assert_eq!(s.typed_into("r1-M1"), vec!["GP"]);
            assert_eq!(s.typed_into("r2-M1"), vec!["GP"]);
            assert_eq!(s.typed_into("r2-M2"), vec!["59"]);
            assert_eq!(s.keys.iter().filter(|k| **k == Key::Tab).count(), 3);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_modifiers_never_written() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| claim_table(s, SENTINEL_STRATEGIES[0], true));
        let config = config(12);
        let artifacts = Artifacts::new(".", false);

        let plain = vec![PredictedCode::new("99213").with_modifiers(Some(""), Some(" "))];
        let summary = CodePopulator::new(&browser, &config, &artifacts)
            .populate(&plain)
            .await;

        assert_eq!(summary.populated(), 1);
        assert!(summary.entries[0].modifiers_written.is_empty());
        browser.with_state(|s| {
            assert!(s.typed_into("r1-M1").is_empty());
            assert!(s.typed_into("r1-M2").is_empty());
            assert_eq!(s.typed.len(), 1);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_new_row_fails_cycle_without_modifier_writes() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| claim_table(s, SENTINEL_STRATEGIES[0], false));
        let config = config(12);
        let artifacts = Artifacts::new(".", false);

        let started = Instant::now();
        let summary = CodePopulator::new(&browser, &config, &artifacts)
            .populate(&codes()[..2])
            .await;

        assert_eq!(summary.failed(), 2);
        for entry in &summary.entries {
            assert_eq!(entry.failed_at, Some(CycleState::TriggerRowCreation));
            assert_eq!(
                entry.error,
                Some(RowPopulationError::RowNotCreated {
                    rows: 1,
                    timeout_ms: 2000
                })
            );
            assert!(entry.modifiers_written.is_empty());
        }
        // Both codes were still attempted
        browser.with_state(|s| {
            assert_eq!(s.typed_into("sentinel"), vec!["97110", "97140"]);
            assert_eq!(s.typed.len(), 2);
        });
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sentinel_screenshots_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let browser = FakeBrowser::new();
        let config = config(12);
        let artifacts = Artifacts::new(dir.path(), true);

        let summary = CodePopulator::new(&browser, &config, &artifacts)
            .populate(&codes()[..2])
            .await;

        assert_eq!(summary.failed(), 2);
        assert_eq!(
            summary.entries[1].error,
            Some(RowPopulationError::SentinelNotFound { tried: 3 })
        );
        assert!(dir.path().join("debug_no_star_row_1.png").exists());
        assert!(dir.path().join("debug_no_star_row_2.png").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_star_row_fallback_strategy() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| claim_table(s, SENTINEL_STRATEGIES[2], true));
        let config = config(12);
        let artifacts = Artifacts::new(".", false);

        let summary = CodePopulator::new(&browser, &config, &artifacts)
            .populate(&codes()[..1])
            .await;

        assert_eq!(summary.populated(), 1);
        browser.with_state(|s| assert_eq!(s.typed_into("r1-M1"), vec!["GP"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_modifier_cell_fails_cycle() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            claim_table(s, SENTINEL_STRATEGIES[0], true);
            // Second modifier input never rendered
            s.hide("r1-M2");
        });
        let config = config(12);
        let artifacts = Artifacts::new(".", false);

        let code = vec![PredictedCode::new("97140").with_modifiers(Some("GP"), Some("59"))];
        let summary = CodePopulator::new(&browser, &config, &artifacts)
            .populate(&code)
            .await;

        let entry = &summary.entries[0];
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.failed_at, Some(CycleState::LocateModifierCells));
        // The code is already in row 1; the reviewer must see where
        assert_eq!(entry.row, Some(1));
        assert!(entry.modifiers_written.is_empty());
        // Nothing written when a needed cell is missing
        browser.with_state(|s| {
            assert!(s.typed_into("r1-M1").is_empty());
            assert_eq!(s.typed_into("sentinel"), vec!["97140"]);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_modifier_cells_waited_on_until_enabled() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| {
            claim_table(s, SENTINEL_STRATEGIES[0], true);
            // Row inputs render disabled until the code validates
            s.enable_after("r1-M1", 3);
        });
        let config = config(12);
        let artifacts = Artifacts::new(".", false);

        let summary = CodePopulator::new(&browser, &config, &artifacts)
            .populate(&codes()[..1])
            .await;

        assert_eq!(summary.populated(), 1);
        assert_eq!(summary.entries[0].modifiers_written, vec![ModifierSlot::First]);
        browser.with_state(|s| assert_eq!(s.typed_into("r1-M1"), vec!["GP"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_codes_over_bound_are_skipped_and_reported() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| claim_table(s, SENTINEL_STRATEGIES[0], true));
        let config = config(2);
        let artifacts = Artifacts::new(".", false);

        let summary = CodePopulator::new(&browser, &config, &artifacts)
            .populate(&codes())
            .await;

        assert_eq!(summary.populated(), 2);
        assert_eq!(summary.skipped(), 1);
        assert!(!summary.is_complete());
        assert_eq!(
            summary.entries[2].error,
            Some(RowPopulationError::OverBound { bound: 2 })
        );
        browser.with_state(|s| assert_eq!(s.typed_into("sentinel"), vec!["97110", "97140"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_icd_codes_entered() {
        let browser = FakeBrowser::new();
        browser.with_state(|s| s.add(selectors::icd_entry_field().steps()[1].clone(), "icd"));
        let config = config(12);
        let artifacts = Artifacts::new(".", false);

        let entries = CodePopulator::new(&browser, &config, &artifacts)
            .enter_icd_codes(&["M54.50".to_string(), "M62.89".to_string()])
            .await;

        assert!(entries
            .iter()
            .all(|e| e.status == EntryStatus::Populated && e.kind == EntryKind::Icd));
        browser.with_state(|s| {
            assert_eq!(s.typed_into("icd"), vec!["M54.50", "M62.89"]);
            assert_eq!(s.keys, vec![Key::Tab, Key::Tab]);
        });
    }
}
