//! Plan-specific prompt templates.
//!
//! Lookup order for plan `P` in the template directory:
//! 1. `prompt_<p lowercase>.txt`
//! 2. `prompt.txt`, with "Commercial or Medicare plan" narrowed to "P plan"

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::codes::InsurancePlan;

pub const FALLBACK_TEMPLATE: &str = "prompt.txt";
pub const NOTES_PLACEHOLDER: &str = "{notes}";

/// Wording in the shared template that is specialised per plan
const GENERIC_PLAN_PHRASE: &str = "Commercial or Medicare plan";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("No prompt template for plan {plan}: neither {specific} nor {fallback} exists")]
    Missing {
        plan: String,
        specific: PathBuf,
        fallback: PathBuf,
    },

    #[error("Failed to read prompt template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Prompt template {0} is empty")]
    Empty(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub source: PathBuf,
    pub text: String,
}

impl PromptTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn plan_path(&self, plan: &InsurancePlan) -> PathBuf {
        self.dir
            .join(format!("prompt_{}.txt", plan.tag().to_lowercase()))
    }

    pub fn fallback_path(&self) -> PathBuf {
        self.dir.join(FALLBACK_TEMPLATE)
    }

    pub fn load(&self, plan: &InsurancePlan) -> Result<PromptTemplate, TemplateError> {
        let specific = self.plan_path(plan);
        if specific.is_file() {
            info!(
                template = %specific.display(),
                plan = %plan,
                "Using plan-specific prompt template"
            );
            return Ok(PromptTemplate {
                text: read_template(&specific)?,
                source: specific,
            });
        }

        let fallback = self.fallback_path();
        if fallback.is_file() {
            debug!(missing = %specific.display(), "Plan template absent, using fallback");
            info!(template = %fallback.display(), plan = %plan, "Using fallback prompt template");
            let text = read_template(&fallback)?
                .replace(GENERIC_PLAN_PHRASE, &format!("{} plan", plan.tag()));
            return Ok(PromptTemplate {
                text,
                source: fallback,
            });
        }

        Err(TemplateError::Missing {
            plan: plan.tag().to_string(),
            specific,
            fallback,
        })
    }
}

fn read_template(path: &Path) -> Result<String, TemplateError> {
    let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Err(TemplateError::Empty(path.to_path_buf()));
    }
    Ok(text)
}

impl PromptTemplate {
    /// Insert the notes at `{notes}`, or append them when the template has no placeholder.
    pub fn render(&self, notes: &str) -> String {
        if self.text.contains(NOTES_PLACEHOLDER) {
            self.text.replace(NOTES_PLACEHOLDER, notes)
        } else {
            format!("{}\n\nClinical Notes:\n{}", self.text.trim_end(), notes)
        }
    }
}
