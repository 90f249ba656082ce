//! CPT code prediction from progress notes.
//!
//! The notes and a plan-specific template are sent to a text-generation
//! service; the reply is parsed into [`PredictedCode`]s. A result shorter
//! than the plan's expected minimum, or longer than the entry bound, is
//! reported through warnings so the run can flag it for review.

pub mod bedrock;
pub mod parse;
pub mod templates;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use thiserror::Error;

use crate::activity_log;
use crate::codes::{InsurancePlan, PredictedCode};

pub use bedrock::{BedrockAuth, BedrockClient, CredentialSource};
pub use parse::{parse_codes, PredictionParseError};
pub use templates::{PromptTemplates, TemplateError};

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Clinical notes are empty")]
    EmptyNotes,

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Prediction service credentials missing: {0}")]
    MissingCredentials(&'static str),

    #[error("Prediction service request failed: {0}")]
    Service(String),

    #[error("Prediction service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Prediction service returned no text")]
    EmptyResponse,

    #[error(transparent)]
    Parse(#[from] PredictionParseError),

    #[error("Prediction contained no codes")]
    NoCodes,
}

/// Text-generation backend for predictions
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, PredictionError>;
}

/// Non-fatal findings that need a human to look at the claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionWarning {
    BelowPlanMinimum {
        plan: String,
        expected: usize,
        actual: usize,
    },
    DroppedElements {
        count: usize,
    },
    ExceedsBound {
        bound: usize,
        actual: usize,
    },
}

impl fmt::Display for PredictionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowPlanMinimum {
                plan,
                expected,
                actual,
            } => write!(
                f,
                "{plan} claims usually carry at least {expected} codes, prediction has {actual}"
            ),
            Self::DroppedElements { count } => {
                write!(f, "{count} response element(s) had no code and were dropped")
            }
            Self::ExceedsBound { bound, actual } => write!(
                f,
                "prediction has {actual} codes, only the first {bound} will be entered"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prediction {
    pub codes: Vec<PredictedCode>,
    pub warnings: Vec<PredictionWarning>,
}

pub struct CodePredictor<'a> {
    generator: &'a dyn TextGenerator,
    templates: PromptTemplates,
    max_codes: usize,
}

impl<'a> CodePredictor<'a> {
    pub fn new(
        generator: &'a dyn TextGenerator,
        templates: PromptTemplates,
        max_codes: usize,
    ) -> Self {
        Self {
            generator,
            templates,
            max_codes,
        }
    }

    /// Predict the codes for `notes` under `plan`'s rules.
    pub async fn predict(
        &self,
        notes: &str,
        plan: &InsurancePlan,
    ) -> Result<Prediction, PredictionError> {
        if notes.trim().is_empty() {
            return Err(PredictionError::EmptyNotes);
        }

        let template = self.templates.load(plan)?;
        let prompt = template.render(notes);

        let started = Instant::now();
        let result = self.request_codes(&prompt).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let parsed = match result {
            Ok(parsed) => parsed,
            Err(e) => {
                activity_log::log_prediction(
                    self.generator.model(),
                    plan.tag(),
                    prompt.len(),
                    0,
                    elapsed_ms,
                    false,
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        };

        activity_log::log_prediction(
            self.generator.model(),
            plan.tag(),
            prompt.len(),
            parsed.codes.len(),
            elapsed_ms,
            true,
            None,
        );

        let warnings = self.check(&parsed, plan);
        for warning in &warnings {
            activity_log::log_warning("prediction", "prediction_review", &warning.to_string());
        }

        Ok(Prediction {
            codes: parsed.codes,
            warnings,
        })
    }

    async fn request_codes(&self, prompt: &str) -> Result<parse::ParsedCodes, PredictionError> {
        let response = self.generator.generate(prompt).await?;
        let parsed = parse_codes(&response)?;
        if parsed.codes.is_empty() {
            return Err(PredictionError::NoCodes);
        }
        Ok(parsed)
    }

    fn check(&self, parsed: &parse::ParsedCodes, plan: &InsurancePlan) -> Vec<PredictionWarning> {
        let mut warnings = Vec::new();
        let actual = parsed.codes.len();
        let expected = plan.min_expected_codes();
        if actual < expected {
            warnings.push(PredictionWarning::BelowPlanMinimum {
                plan: plan.tag().to_string(),
                expected,
                actual,
            });
        }
        if parsed.dropped > 0 {
            warnings.push(PredictionWarning::DroppedElements {
                count: parsed.dropped,
            });
        }
        if actual > self.max_codes {
            warnings.push(PredictionWarning::ExceedsBound {
                bound: self.max_codes,
                actual,
            });
        }
        warnings
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Generator returning a canned response and recording prompts
    pub(crate) struct CannedGenerator {
        response: Result<String, String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl CannedGenerator {
        pub fn replying(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        fn model(&self) -> &str {
            "canned"
        }

        async fn generate(&self, prompt: &str) -> Result<String, PredictionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.response.clone().map_err(PredictionError::Service)
        }
    }

    const NOTES: &str = "Subjective: low back pain after lifting. Assessment: lumbar strain.";

    fn template_dir(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.txt"), content).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_medicare_three_codes_no_warnings() {
        let dir = template_dir("Code for a Commercial or Medicare plan.\n{notes}\nJSON:");
        let generator = CannedGenerator::replying(
            r#"[{"code":"97110","modifier1":"GP"},
                {"code":"97140","modifier1":"GP","modifier2":"59"},
                {"code":"97530","modifier1":"GP"}]"#,
        );
        let predictor = CodePredictor::new(&generator, PromptTemplates::new(dir.path()), 12);

        let prediction = predictor.predict(NOTES, &InsurancePlan::Medicare).await.unwrap();
        assert_eq!(prediction.codes.len(), 3);
        assert!(prediction.warnings.is_empty());

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Code for a Medicare plan."));
        assert!(prompts[0].contains(NOTES));
    }

    #[tokio::test]
    async fn test_commercial_short_result_warns() {
        let dir = template_dir("{notes}");
        let generator =
            CannedGenerator::replying(r#"[{"code":"99213"},{"code":"97110"},{"code":"97140"}]"#);
        let predictor = CodePredictor::new(&generator, PromptTemplates::new(dir.path()), 12);

        let prediction = predictor.predict(NOTES, &InsurancePlan::Commercial).await.unwrap();
        assert_eq!(prediction.codes.len(), 3);
        assert_eq!(
            prediction.warnings,
            vec![PredictionWarning::BelowPlanMinimum {
                plan: "Commercial".to_string(),
                expected: 4,
                actual: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_over_bound_warns() {
        let dir = template_dir("{notes}");
        let generator = CannedGenerator::replying(
            r#"[{"code":"1"},{"code":"2"},{"code":"3"},{"code":"4"}]"#,
        );
        let predictor = CodePredictor::new(&generator, PromptTemplates::new(dir.path()), 3);
        let prediction = predictor.predict(NOTES, &InsurancePlan::Medicare).await.unwrap();
        assert_eq!(prediction.codes.len(), 4);
        assert!(prediction
            .warnings
            .contains(&PredictionWarning::ExceedsBound { bound: 3, actual: 4 }));
    }

    #[tokio::test]
    async fn test_empty_notes_never_call_service() {
        let dir = template_dir("{notes}");
        let generator = CannedGenerator::replying("[]");
        let predictor = CodePredictor::new(&generator, PromptTemplates::new(dir.path()), 12);
        let err = predictor.predict("   ", &InsurancePlan::Medicare).await.unwrap_err();
        assert!(matches!(err, PredictionError::EmptyNotes));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_service_failure_is_single_attempt() {
        let dir = template_dir("{notes}");
        let generator = CannedGenerator::failing("connection refused");
        let predictor = CodePredictor::new(&generator, PromptTemplates::new(dir.path()), 12);
        let err = predictor.predict(NOTES, &InsurancePlan::Medicare).await.unwrap_err();
        assert!(matches!(err, PredictionError::Service(_)));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_array_is_no_codes() {
        let dir = template_dir("{notes}");
        let generator = CannedGenerator::replying("[]");
        let predictor = CodePredictor::new(&generator, PromptTemplates::new(dir.path()), 12);
        let err = predictor.predict(NOTES, &InsurancePlan::Medicare).await.unwrap_err();
        assert!(matches!(err, PredictionError::NoCodes));
    }

    #[tokio::test]
    async fn test_missing_template_fails_before_service() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CannedGenerator::replying("[]");
        let predictor = CodePredictor::new(&generator, PromptTemplates::new(dir.path()), 12);
        let err = predictor.predict(NOTES, &InsurancePlan::Medicare).await.unwrap_err();
        assert!(matches!(err, PredictionError::Template(TemplateError::Missing { .. })));
        assert_eq!(generator.calls(), 0);
    }
}
