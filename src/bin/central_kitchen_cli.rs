//! Central Kitchen CLI
//!
//! Commands: run, validate, summary, diff, copy
//! JSON goes to stdout, logs to stderr.
//! Exit codes: 0 ok, 1 error, 2 validation failure or copy conflict

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use central_kitchen::batch_copy::copy_batches;
use central_kitchen::report::{diff_reports, load_report, summary_of};
use central_kitchen::validation::Validator;
use central_kitchen::{
    CentralPipeline, DeviceAssignment, KitchenConfig, KitchenSettings, PriceConfig, ReportBuilder,
};

/// The device fleet is fixed at three phones.
const REQUIRED_DEVICES: usize = 3;

#[derive(Parser)]
#[command(name = "central-kitchen-cli")]
#[command(about = "Central Kitchen - listing batch generator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate batches from raw style folders
    Run(RunArgs),

    /// Check batch manifests and the delivery report
    Validate {
        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value = "reports")]
        report_dir: String,
    },

    /// Print a delivery report summary
    Summary {
        #[arg(long)]
        report: PathBuf,
    },

    /// Compare two delivery reports
    Diff {
        #[arg(long)]
        current: PathBuf,

        #[arg(long)]
        previous: Option<PathBuf>,
    },

    /// Copy Output_Batch_Phone_* directories elsewhere
    Copy {
        #[arg(long)]
        source: PathBuf,

        #[arg(long)]
        target: PathBuf,

        /// Batch number or directory name; repeatable
        #[arg(long = "batch")]
        batches: Vec<String>,

        #[arg(long)]
        overwrite: bool,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Raw asset root, one folder per style
    #[arg(long)]
    input: PathBuf,

    /// Output root for staging, batches and reports
    #[arg(long)]
    output: PathBuf,

    /// Comma separated device ids, e.g. device1,device2,device3
    #[arg(long)]
    devices: String,

    /// Base price in yuan
    #[arg(long)]
    price: f64,

    /// Copy template category
    #[arg(long, default_value = "tee")]
    category: String,

    /// Watermark text
    #[arg(long)]
    watermark: Option<String>,

    /// Report directory, relative to the output root
    #[arg(long, default_value = "reports")]
    report_dir: String,

    /// Keep the base price decimals instead of a random tail
    #[arg(long)]
    fixed_price: bool,

    /// YAML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Description variants per style
    #[arg(long)]
    variations: Option<u32>,

    /// Directory of extra <category>.yaml copy templates
    #[arg(long)]
    templates: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Validate { output, report_dir } => validate(output, &report_dir),
        Commands::Summary { report } => summary(report),
        Commands::Diff { current, previous } => diff(current, previous),
        Commands::Copy { source, target, batches, overwrite, dry_run } => {
            copy(source, target, &batches, overwrite, dry_run)
        }
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            let output = serde_json::json!({"success": false, "error": format!("{:#}", e)});
            println!("{}", output);
            ExitCode::FAILURE
        }
    }
}

fn build_config(args: RunArgs) -> Result<KitchenConfig> {
    let assignment = DeviceAssignment::new(DeviceAssignment::parse_list(&args.devices));
    assignment.require_count(REQUIRED_DEVICES)?;

    let price = if args.fixed_price { PriceConfig::fixed(args.price) } else { PriceConfig::new(args.price) };
    let mut config = KitchenConfig::new(args.input, args.output, price, assignment.device_ids, args.category);
    if let Some(path) = &args.config {
        let settings = KitchenSettings::from_yaml_file(path)
            .with_context(|| format!("loading settings {}", path.display()))?;
        config = config.with_settings(settings);
    }
    let mut config = config.apply_env();
    if let Some(text) = args.watermark {
        config.watermark.text = text;
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(variations) = args.variations {
        config.template.variations = variations;
    }
    if let Some(dir) = args.templates {
        config.templates_dir = Some(dir);
    }
    Ok(config)
}

fn run(args: RunArgs) -> Result<ExitCode> {
    let report_dir = args.report_dir.clone();
    let config = build_config(args)?;
    let report_root = config.output_root.join(report_dir);

    let mut pipeline = CentralPipeline::new(config).context("building pipeline")?;
    let result = pipeline.run().context("pipeline run")?;
    let report = ReportBuilder::new().write(&result, &report_root)?;

    print_json(&serde_json::json!({
        "report": report,
        "success": result.entries.len(),
        "failures": result.failures,
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn validate(output: PathBuf, report_dir: &str) -> Result<ExitCode> {
    if !output.is_dir() {
        bail!("output directory {} does not exist", output.display());
    }
    let result = Validator::new().validate_output(&output, report_dir)?;
    print_json(&result)?;
    Ok(if result.valid { ExitCode::SUCCESS } else { ExitCode::from(2) })
}

fn summary(report: PathBuf) -> Result<ExitCode> {
    let data = load_report(&report)?;
    println!("{}", summary_of(&data));
    Ok(ExitCode::SUCCESS)
}

fn diff(current: PathBuf, previous: Option<PathBuf>) -> Result<ExitCode> {
    let current = load_report(&current)?;
    let previous = previous.map(|path| load_report(&path)).transpose()?;
    print_json(&diff_reports(&current, previous.as_ref()))?;
    Ok(ExitCode::SUCCESS)
}

fn copy(source: PathBuf, target: PathBuf, batches: &[String], overwrite: bool, dry_run: bool) -> Result<ExitCode> {
    if !source.is_dir() {
        bail!("source {} is not a directory", source.display());
    }
    let report = copy_batches(&source, &target, batches, overwrite, dry_run)?;
    print_json(&report)?;
    Ok(if report.is_clean() { ExitCode::SUCCESS } else { ExitCode::from(2) })
}
