pub mod activity_log;
pub mod artifacts;
pub mod browser;
pub mod codes;
pub mod config;
pub mod ecw;
pub mod predictor;
pub mod retry;
pub mod run;


pub use codes::{InsurancePlan, ModifierSlot, PredictedCode};
pub use config::Config;
pub use run::{RunSummary, RunVerdict, Runner};
