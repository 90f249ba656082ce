//! Billing code records shared by the predictor and the population driver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One CPT line predicted for the claim.
///
/// `code` is always non-empty text; numeric codes from the model are
/// normalized before a `PredictedCode` is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedCode {
    pub code: String,
    pub modifier1: Option<String>,
    pub modifier2: Option<String>,
    pub description: String,
}

impl PredictedCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            modifier1: None,
            modifier2: None,
            description: String::new(),
        }
    }

    /// Set both modifiers; blank values are stored as `None`.
    pub fn with_modifiers(mut self, modifier1: Option<&str>, modifier2: Option<&str>) -> Self {
        self.modifier1 = non_blank(modifier1);
        self.modifier2 = non_blank(modifier2);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn modifier(&self, slot: ModifierSlot) -> Option<&str> {
        match slot {
            ModifierSlot::First => self.modifier1.as_deref(),
            ModifierSlot::Second => self.modifier2.as_deref(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// The two modifier columns of a CPT row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierSlot {
    First,
    Second,
}

impl ModifierSlot {
    pub const ALL: [ModifierSlot; 2] = [ModifierSlot::First, ModifierSlot::Second];

    /// 1-based table column holding this modifier's input.
    pub fn column(self) -> usize {
        match self {
            Self::First => 8,
            Self::Second => 9,
        }
    }

    /// Fragments of the `data-fieldname` attribute used by older claim screens.
    pub fn field_hints(self) -> [&'static str; 2] {
        match self {
            Self::First => ["MOD1", "M1"],
            Self::Second => ["MOD2", "M2"],
        }
    }
}

impl fmt::Display for ModifierSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "M1"),
            Self::Second => write!(f, "M2"),
        }
    }
}

/// Insurance plan tag selecting the coding rules for a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum InsurancePlan {
    Commercial,
    Medicare,
    Other(String),
}

impl Default for InsurancePlan {
    fn default() -> Self {
        Self::Commercial
    }
}

impl InsurancePlan {
    /// Parse a plan tag; matching is case-insensitive and blank means Commercial.
    pub fn parse(tag: &str) -> Self {
        let trimmed = tag.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "commercial" => Self::Commercial,
            "medicare" => Self::Medicare,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Commercial => "Commercial",
            Self::Medicare => "Medicare",
            Self::Other(tag) => tag,
        }
    }

    /// Fewest codes a complete prediction is expected to contain for this plan.
    pub fn min_expected_codes(&self) -> usize {
        match self {
            Self::Commercial => 4,
            Self::Medicare | Self::Other(_) => 3,
        }
    }
}

impl fmt::Display for InsurancePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<String> for InsurancePlan {
    fn from(tag: String) -> Self {
        Self::parse(&tag)
    }
}

impl From<InsurancePlan> for String {
    fn from(plan: InsurancePlan) -> Self {
        plan.tag().to_string()
    }
}
