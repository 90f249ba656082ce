//! One automation run: login through code entry, plus the review report.
//!
//! Stages before code entry halt the run on failure. Code entry never
//! halts; each code's outcome lands in the [`RunSummary`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::activity_log;
use crate::artifacts::Artifacts;
use crate::browser::Browser;
use crate::codes::InsurancePlan;
use crate::config::Config;
use crate::ecw::notes::{clean_notes, ExtractionAttempt, NotesSource};
use crate::ecw::population::{CodeEntryReport, EntryStatus};
use crate::ecw::{
    ClaimsLookup, CodePopulator, ExtractedNotes, ExtractionFailed, LoginDriver, NavigationDriver,
    NavigationError, NotesExtractor,
};
use crate::predictor::{
    CodePredictor, Prediction, PredictionError, PredictionWarning, PromptTemplates, TextGenerator,
};

/// Failure that stops the run before code entry
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionFailed),

    #[error(transparent)]
    Prediction(#[from] PredictionError),

    #[error("Could not read notes file {}: {source}", .path.display())]
    NotesFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Login,
    Navigation,
    ClaimLookup,
    NotesExtraction,
    Prediction,
    Population,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Navigation => "navigation",
            Self::ClaimLookup => "claim_lookup",
            Self::NotesExtraction => "notes_extraction",
            Self::Prediction => "prediction",
            Self::Population => "population",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    /// Every code populated and nothing flagged by the predictor
    Complete,
    /// Reached code entry, but something needs review
    Partial,
    /// Stopped before code entry
    Halted,
}

impl RunVerdict {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Complete => 0,
            Self::Halted => 1,
            Self::Partial => 2,
        }
    }
}

impl fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Halted => "halted",
        };
        f.write_str(name)
    }
}

/// Where the notes came from. Never carries the text itself.
#[derive(Debug, Clone, Serialize)]
pub struct NotesReport {
    pub source: NotesSource,
    pub char_count: usize,
    pub attempts: Vec<ExtractionAttempt>,
}

/// Review report written as `run_summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub claim_id: String,
    pub insurance_plan: InsurancePlan,
    pub provider_name: String,
    pub target_date: NaiveDate,
    pub verdict: RunVerdict,
    pub halted_at: Option<Stage>,
    pub error: Option<String>,
    pub notes: Option<NotesReport>,
    pub predictor_warnings: Vec<PredictionWarning>,
    pub cpt_entries: Vec<CodeEntryReport>,
    pub icd_entries: Vec<CodeEntryReport>,
}

impl RunSummary {
    fn new(config: &Config) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            claim_id: config.claim_id.clone(),
            insurance_plan: config.insurance_plan.clone(),
            provider_name: config.provider_name.clone(),
            target_date: config.target_date,
            verdict: RunVerdict::Halted,
            halted_at: None,
            error: None,
            notes: None,
            predictor_warnings: Vec::new(),
            cpt_entries: Vec::new(),
            icd_entries: Vec::new(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = &CodeEntryReport> {
        self.cpt_entries.iter().chain(self.icd_entries.iter())
    }

    pub fn populated(&self) -> usize {
        self.entries()
            .filter(|e| e.status == EntryStatus::Populated)
            .count()
    }

    pub fn attempted(&self) -> usize {
        self.entries().count()
    }

    fn decide_verdict(&self) -> RunVerdict {
        if self.halted_at.is_some() {
            RunVerdict::Halted
        } else if self.predictor_warnings.is_empty() && self.populated() == self.attempted() {
            RunVerdict::Complete
        } else {
            RunVerdict::Partial
        }
    }
}

/// What to do when the notes could not be read from the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorDecision {
    UseNotesFile(PathBuf),
    Quit,
}

/// Human fallback for extraction failures
pub trait Operator: Send + Sync {
    fn recover_notes(&self, failure: &ExtractionFailed) -> OperatorDecision;
}

/// Never asks; extraction failures halt the run
pub struct NonInteractive;

impl Operator for NonInteractive {
    fn recover_notes(&self, _failure: &ExtractionFailed) -> OperatorDecision {
        OperatorDecision::Quit
    }
}

/// Asks on the terminal for a notes file path
pub struct StdinOperator;

impl Operator for StdinOperator {
    fn recover_notes(&self, failure: &ExtractionFailed) -> OperatorDecision {
        eprintln!("\n{failure}.");
        eprint!("Path to a notes file to continue with (empty or 'q' to quit): ");
        let _ = io::stderr().flush();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return OperatorDecision::Quit;
        }
        parse_operator_reply(&line)
    }
}

fn parse_operator_reply(line: &str) -> OperatorDecision {
    let reply = line.trim();
    if reply.is_empty() || reply.eq_ignore_ascii_case("q") || reply.eq_ignore_ascii_case("quit") {
        OperatorDecision::Quit
    } else {
        OperatorDecision::UseNotesFile(PathBuf::from(reply))
    }
}

/// Read operator-supplied notes, normalized like page text.
pub fn read_notes_file(path: &Path) -> Result<String, RunError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RunError::NotesFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(clean_notes(&raw))
}

struct Halt {
    stage: Stage,
    error: RunError,
}

pub struct Runner<'a> {
    config: &'a Config,
    browser: &'a dyn Browser,
    generator: &'a dyn TextGenerator,
    operator: &'a dyn Operator,
    artifacts: Artifacts,
    notes_file: Option<PathBuf>,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a Config,
        browser: &'a dyn Browser,
        generator: &'a dyn TextGenerator,
        operator: &'a dyn Operator,
    ) -> Self {
        Self {
            config,
            browser,
            generator,
            operator,
            artifacts: Artifacts::new(
                config.browser.artifacts_dir.clone(),
                config.browser.screenshot,
            ),
            notes_file: None,
        }
    }

    /// Use notes from `path` instead of reading them from the claim
    pub fn with_notes_file(mut self, path: Option<PathBuf>) -> Self {
        self.notes_file = path;
        self
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Run every stage and write the summary. Always returns a summary, halted or not.
    pub async fn run(&self) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(self.config);
        activity_log::log_run_start(
            &summary.run_id,
            &self.config.claim_id,
            self.config.insurance_plan.tag(),
            self.config.browser.headless,
        );

        match self.pipeline(&mut summary).await {
            Ok(()) => {
                self.artifacts.capture(self.browser, "ecw_final_state").await;
            }
            Err(halt) => {
                error!(stage = %halt.stage, error = %halt.error, "Run halted");
                summary.halted_at = Some(halt.stage);
                summary.error = Some(halt.error.to_string());
                self.artifacts.capture(self.browser, "automation_error").await;
            }
        }

        summary.finished_at = Some(Utc::now());
        summary.verdict = summary.decide_verdict();

        match self.artifacts.write_summary(&summary) {
            Ok(path) => info!(path = %path.display(), "Run summary written"),
            Err(e) => warn!(error = %e, "Failed to write run summary"),
        }

        activity_log::log_run_finished(
            &summary.run_id,
            &summary.verdict.to_string(),
            summary.populated(),
            summary.attempted(),
            started.elapsed().as_millis() as u64,
        );
        summary
    }

    async fn pipeline(&self, summary: &mut RunSummary) -> Result<(), Halt> {
        let run_id = summary.run_id.clone();
        let config = self.config;

        let login = LoginDriver::new(self.browser, config, &self.artifacts);
        self.step(&run_id, Stage::Login, login.login()).await?;

        let navigation = NavigationDriver::new(self.browser, config, &self.artifacts);
        self.step(&run_id, Stage::Navigation, navigate(&navigation, config.target_date))
            .await?;

        let lookup = ClaimsLookup::new(self.browser, config, &self.artifacts);
        self.step(&run_id, Stage::ClaimLookup, lookup.open_claim()).await?;

        let notes = self
            .step(&run_id, Stage::NotesExtraction, self.acquire_notes())
            .await?;
        let char_count = notes.text.chars().count();
        activity_log::log_notes_acquired(
            &run_id,
            &notes.source.to_string(),
            char_count,
            notes.trail.len(),
        );
        summary.notes = Some(NotesReport {
            source: notes.source,
            char_count,
            attempts: notes.trail.clone(),
        });

        let predictor = CodePredictor::new(
            self.generator,
            PromptTemplates::new(config.predictor.prompt_dir.clone()),
            config.predictor.max_codes,
        );
        let prediction: Prediction = self
            .step(
                &run_id,
                Stage::Prediction,
                predictor.predict(&notes.text, &config.insurance_plan),
            )
            .await?;
        summary.predictor_warnings = prediction.warnings.clone();

        let started = Instant::now();
        let populator = CodePopulator::new(self.browser, config, &self.artifacts);
        let population = populator.populate(&prediction.codes).await;
        summary.cpt_entries = population.entries;
        if !config.icd_codes.is_empty() {
            summary.icd_entries = populator.enter_icd_codes(&config.icd_codes).await;
        }

        let needs_review = summary.populated() < summary.attempted();
        let outcome = format!("{}/{} entries populated", summary.populated(), summary.attempted());
        activity_log::log_step(
            &run_id,
            Stage::Population.as_str(),
            !needs_review,
            started.elapsed().as_millis() as u64,
            needs_review.then_some(outcome.as_str()),
        );
        Ok(())
    }

    /// Await one halting stage, logging its outcome.
    async fn step<T, E, F>(&self, run_id: &str, stage: Stage, work: F) -> Result<T, Halt>
    where
        E: Into<RunError>,
        F: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = work.await.map_err(Into::into);
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(value) => {
                activity_log::log_step(run_id, stage.as_str(), true, duration_ms, None);
                Ok(value)
            }
            Err(error) => {
                activity_log::log_step(
                    run_id,
                    stage.as_str(),
                    false,
                    duration_ms,
                    Some(&error.to_string()),
                );
                Err(Halt { stage, error })
            }
        }
    }

    async fn acquire_notes(&self) -> Result<ExtractedNotes, RunError> {
        if let Some(path) = &self.notes_file {
            info!(path = %path.display(), "Using notes file; skipping extraction");
            return from_file(path, Vec::new());
        }

        let extractor = NotesExtractor::new(self.browser, self.config, &self.artifacts);
        match extractor.extract().await {
            Ok(notes) => Ok(notes),
            Err(failure) => {
                warn!(attempts = failure.trail.len(), "Notes extraction failed; asking operator");
                match self.operator.recover_notes(&failure) {
                    OperatorDecision::UseNotesFile(path) => from_file(&path, failure.trail),
                    OperatorDecision::Quit => Err(failure.into()),
                }
            }
        }
    }
}

async fn navigate(
    navigation: &NavigationDriver<'_>,
    date: NaiveDate,
) -> Result<(), NavigationError> {
    navigation.open_claims().await?;
    navigation.set_service_dates(date).await
}

fn from_file(path: &Path, trail: Vec<ExtractionAttempt>) -> Result<ExtractedNotes, RunError> {
    Ok(ExtractedNotes {
        text: read_notes_file(path)?,
        source: NotesSource::File,
        trail,
    })
}
