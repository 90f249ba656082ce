use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use ecw_autocoder::activity_log;
use ecw_autocoder::browser::{Browser, WebDriverBrowser};
use ecw_autocoder::codes::InsurancePlan;
use ecw_autocoder::config::Config;
use ecw_autocoder::predictor::{BedrockClient, CodePredictor, PromptTemplates};
use ecw_autocoder::run::{read_notes_file, NonInteractive, Operator, Runner, StdinOperator};

/// Predict CPT codes from eClinicalWorks progress notes and enter them on the claim
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for the JSON activity log (default ~/.ecw-autocoder/logs)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in, open the claim, predict codes from its notes and enter them
    Run(RunArgs),

    /// Predict codes for a notes file and print them as JSON
    Predict {
        #[command(flatten)]
        common: CommonArgs,

        /// Progress notes text file
        #[arg(long)]
        notes: PathBuf,

        /// Insurance plan (overrides the config file)
        #[arg(long)]
        plan: Option<String>,
    },

    /// Validate the configuration file and print it with secrets redacted
    CheckConfig {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Path to the INI configuration file
    #[arg(short, long, default_value = "config.properties")]
    config: PathBuf,

    /// Directory holding prompt_<plan>.txt / prompt.txt (overrides the config file)
    #[arg(long)]
    prompt_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Use this notes file instead of reading the notes from the claim
    #[arg(long)]
    notes_file: Option<PathBuf>,

    /// Never prompt; a notes extraction failure ends the run
    #[arg(long)]
    non_interactive: bool,

    /// Wait for Enter before closing the browser
    #[arg(long)]
    keep_open: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = activity_log::init_logging(cli.log_dir.as_deref(), cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Predict { common, notes, plan } => predict(common, &notes, plan).await,
        Command::CheckConfig { common } => check_config(common),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn load_config(common: &CommonArgs) -> Result<Config> {
    let mut config = Config::load(&common.config)
        .with_context(|| format!("Failed to load config from {}", common.config.display()))?;
    if let Some(dir) = &common.prompt_dir {
        config.predictor.prompt_dir = dir.clone();
    }
    Ok(config)
}

async fn run(args: RunArgs) -> Result<u8> {
    let config = load_config(&args.common)?;
    info!(config = %config.redacted_summary(), "Configuration loaded");

    let generator = BedrockClient::from_options(&config.predictor, &config.aws_region)
        .await
        .context("Failed to set up the prediction service")?;
    let browser = WebDriverBrowser::connect(&config.browser.webdriver_url, config.browser.headless)
        .await
        .with_context(|| {
            format!(
                "Failed to start a browser session at {}",
                config.browser.webdriver_url
            )
        })?;

    let operator: &dyn Operator = if args.non_interactive {
        &NonInteractive
    } else {
        &StdinOperator
    };

    let runner =
        Runner::new(&config, &browser, &generator, operator).with_notes_file(args.notes_file);
    let summary = runner.run().await;

    println!(
        "Claim {}: {} ({}/{} entries populated)",
        summary.claim_id,
        summary.verdict,
        summary.populated(),
        summary.attempted()
    );
    for warning in &summary.predictor_warnings {
        println!("  review: {warning}");
    }
    for entry in summary.cpt_entries.iter().chain(summary.icd_entries.iter()) {
        if let Some(error) = &entry.error {
            println!("  {} #{}: {error}", entry.code, entry.index);
        }
    }
    if let Some(error) = &summary.error {
        println!("  halted: {error}");
    }
    println!(
        "Artifacts in {} ({} screenshot(s))",
        runner.artifacts().dir().display(),
        runner.artifacts().captured().len()
    );

    if args.keep_open {
        println!("Press Enter to close the browser...");
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }
    if let Err(e) = browser.close().await {
        warn!(error = %e, "Failed to close browser session");
    }

    Ok(summary.verdict.exit_code())
}

async fn predict(common: CommonArgs, notes_path: &Path, plan: Option<String>) -> Result<u8> {
    let config = load_config(&common)?;
    let plan = plan
        .map(|p| InsurancePlan::parse(&p))
        .unwrap_or_else(|| config.insurance_plan.clone());
    let notes = read_notes_file(notes_path)?;

    let generator = BedrockClient::from_options(&config.predictor, &config.aws_region)
        .await
        .context("Failed to set up the prediction service")?;
    let predictor = CodePredictor::new(
        &generator,
        PromptTemplates::new(config.predictor.prompt_dir.clone()),
        config.predictor.max_codes,
    );
    let prediction = predictor
        .predict(&notes, &plan)
        .await
        .map_err(|e| anyhow!("Prediction failed: {e}"))?;

    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(if prediction.warnings.is_empty() { 0 } else { 2 })
}

fn check_config(common: CommonArgs) -> Result<u8> {
    let config = load_config(&common)?;
    println!("{}", config.redacted_summary());
    Ok(0)
}
