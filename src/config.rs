//! Run configuration loaded from an INI-style properties file.
//!
//! ```text
//! [DEFAULT]
//! username = ...
//! password = ...
//! url = https://ecw.example.org/mobiledoc/jsp/webemr/login/newLogin.jsp
//! provider_name = ...
//! target_date = 08-14-2025
//! claim_id = 39359
//! insurance_plan = Medicare
//! aws_region = us-east-1
//!
//! [BROWSER]
//! headless = false
//! screenshot = true
//! wait_timeout = 10000
//! ```

use chrono::NaiveDate;
use ini::{Ini, ParseOption};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::codes::InsurancePlan;

pub const DEFAULT_SECTION: &str = "DEFAULT";
pub const BROWSER_SECTION: &str = "BROWSER";
pub const CLAIMS_SECTION: &str = "CLAIMS";
pub const PREDICTOR_SECTION: &str = "PREDICTOR";

/// Date format used by `target_date` (MM-DD-YYYY)
pub const TARGET_DATE_FORMAT: &str = "%m-%d-%Y";

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Errors raised while loading configuration. All are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file: {0}")]
    Parse(String),

    #[error("Missing required key '{key}' in [{section}]")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },

    #[error("Invalid value '{value}' for '{key}' in [{section}]: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Login credentials. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub screenshot: bool,
    /// Upper bound for every explicit wait-for-condition
    pub wait_timeout: Duration,
    pub webdriver_url: String,
    /// Where screenshots and the run summary are written
    pub artifacts_dir: PathBuf,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            screenshot: true,
            wait_timeout: Duration::from_millis(10_000),
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            artifacts_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredictorOptions {
    pub model_id: String,
    /// Full invoke URL; derived from the region when unset
    pub endpoint: Option<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Most codes the population driver will type into the claim
    pub max_codes: usize,
    pub prompt_dir: PathBuf,
}

impl Default for PredictorOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            endpoint: None,
            max_tokens: 2000,
            timeout: Duration::from_secs(120),
            max_codes: 12,
            prompt_dir: PathBuf::from("."),
        }
    }
}

/// Immutable settings for one automation run.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub url: String,
    pub provider_name: String,
    pub target_date: NaiveDate,
    pub claim_id: String,
    pub insurance_plan: InsurancePlan,
    pub aws_region: String,
    /// ICD codes entered after the CPT lines (optional)
    pub icd_codes: Vec<String>,
    pub browser: BrowserOptions,
    pub predictor: PredictorOptions,
}

impl Config {
    /// Load config from file. A missing file is an error, not a default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse config from the text of a properties file.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        // Quotes and backslashes in values are literal, as in passwords
        let options = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(content, options)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let sections = Sections { ini: &ini };

        let credentials = Credentials {
            username: sections.required(DEFAULT_SECTION, "username")?.to_string(),
            password: sections.required(DEFAULT_SECTION, "password")?.to_string(),
        };

        let url = sections.required(DEFAULT_SECTION, "url")?.to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                section: DEFAULT_SECTION,
                key: "url",
                value: url,
                reason: "must start with http:// or https://".to_string(),
            });
        }

        let raw_date = sections.required(DEFAULT_SECTION, "target_date")?;
        let target_date = NaiveDate::parse_from_str(raw_date, TARGET_DATE_FORMAT).map_err(|e| {
            ConfigError::InvalidValue {
                section: DEFAULT_SECTION,
                key: "target_date",
                value: raw_date.to_string(),
                reason: format!("expected MM-DD-YYYY ({e})"),
            }
        })?;

        // Older files keep claim settings under [CLAIMS]
        let (claim_section, claim_id) = sections
            .get(DEFAULT_SECTION, "claim_id")
            .map(|v| (DEFAULT_SECTION, v))
            .or_else(|| sections.get(CLAIMS_SECTION, "claim_id").map(|v| (CLAIMS_SECTION, v)))
            .ok_or(ConfigError::MissingKey {
                section: DEFAULT_SECTION,
                key: "claim_id",
            })?;
        if !is_claim_identifier(claim_id) {
            return Err(ConfigError::InvalidValue {
                section: claim_section,
                key: "claim_id",
                value: claim_id.to_string(),
                reason: "only letters, digits and '-' are allowed".to_string(),
            });
        }

        let insurance_plan = sections
            .get(DEFAULT_SECTION, "insurance_plan")
            .or_else(|| sections.get(CLAIMS_SECTION, "insurance_plan"))
            .map(InsurancePlan::parse)
            .unwrap_or_default();

        let icd_codes = sections
            .get(CLAIMS_SECTION, "icd_codes")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let browser_defaults = BrowserOptions::default();
        let browser = BrowserOptions {
            headless: sections.bool_or(BROWSER_SECTION, "headless", browser_defaults.headless)?,
            screenshot: sections.bool_or(
                BROWSER_SECTION,
                "screenshot",
                browser_defaults.screenshot,
            )?,
            wait_timeout: Duration::from_millis(sections.parse_or(
                BROWSER_SECTION,
                "wait_timeout",
                browser_defaults.wait_timeout.as_millis() as u64,
            )?),
            webdriver_url: sections
                .get(BROWSER_SECTION, "webdriver_url")
                .map(str::to_string)
                .unwrap_or(browser_defaults.webdriver_url),
            artifacts_dir: sections
                .get(BROWSER_SECTION, "artifacts_dir")
                .map(PathBuf::from)
                .unwrap_or(browser_defaults.artifacts_dir),
        };

        let predictor_defaults = PredictorOptions::default();
        let max_codes: usize =
            sections.parse_or(PREDICTOR_SECTION, "max_codes", predictor_defaults.max_codes)?;
        if max_codes == 0 {
            return Err(ConfigError::InvalidValue {
                section: PREDICTOR_SECTION,
                key: "max_codes",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let predictor = PredictorOptions {
            model_id: sections
                .get(PREDICTOR_SECTION, "model_id")
                .map(str::to_string)
                .unwrap_or(predictor_defaults.model_id),
            endpoint: sections.get(PREDICTOR_SECTION, "endpoint").map(str::to_string),
            max_tokens: sections.parse_or(
                PREDICTOR_SECTION,
                "max_tokens",
                predictor_defaults.max_tokens,
            )?,
            timeout: Duration::from_secs(sections.parse_or(
                PREDICTOR_SECTION,
                "timeout_secs",
                predictor_defaults.timeout.as_secs(),
            )?),
            max_codes,
            prompt_dir: sections
                .get(PREDICTOR_SECTION, "prompt_dir")
                .map(PathBuf::from)
                .unwrap_or(predictor_defaults.prompt_dir),
        };

        Ok(Self {
            credentials,
            url,
            provider_name: sections
                .get(DEFAULT_SECTION, "provider_name")
                .unwrap_or_default()
                .to_string(),
            target_date,
            claim_id: claim_id.to_string(),
            insurance_plan,
            aws_region: sections
                .get(DEFAULT_SECTION, "aws_region")
                .unwrap_or(DEFAULT_AWS_REGION)
                .to_string(),
            icd_codes,
            browser,
            predictor,
        })
    }

    /// Human-readable summary with secrets redacted
    pub fn redacted_summary(&self) -> String {
        format!(
            "url={} username={} provider={} target_date={} claim_id={} plan={} region={} \
             headless={} screenshot={} wait_timeout_ms={} webdriver={} max_codes={}",
            self.url,
            self.credentials.username,
            self.provider_name,
            self.target_date.format(TARGET_DATE_FORMAT),
            self.claim_id,
            self.insurance_plan,
            self.aws_region,
            self.browser.headless,
            self.browser.screenshot,
            self.browser.wait_timeout.as_millis(),
            self.browser.webdriver_url,
            self.predictor.max_codes,
        )
    }
}

fn is_claim_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Typed accessors over the parsed INI sections.
struct Sections<'a> {
    ini: &'a Ini,
}

impl<'a> Sections<'a> {
    /// Trimmed, non-empty value for `key` in `section`
    fn get(&self, section: &'static str, key: &'static str) -> Option<&'a str> {
        self.ini
            .section(Some(section))
            .and_then(|props| props.get(key))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn required(&self, section: &'static str, key: &'static str) -> Result<&'a str, ConfigError> {
        self.get(section, key)
            .ok_or(ConfigError::MissingKey { section, key })
    }

    fn bool_or(
        &self,
        section: &'static str,
        key: &'static str,
        default: bool,
    ) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(section, key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                section,
                key,
                value: raw.to_string(),
                reason: "expected true/false".to_string(),
            }),
        }
    }

    fn parse_or<T>(
        &self,
        section: &'static str,
        key: &'static str,
        default: T,
    ) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(raw) = self.get(section, key) else {
            return Ok(default);
        };
        raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            section,
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }
}
