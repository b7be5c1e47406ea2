use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regencascade::cli::CommandContext;
use regencascade::cli::commands::{self, RecordsOptions, RepairOptions, RunOptions};
use regencascade::types::JobStatus;

#[derive(Parser)]
#[command(name = "regencascade")]
#[command(
    version,
    about = "Repair, regenerate, and quality-gate structured LLM output"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the global/project chain
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job file through the cascade and seal its records
    Run {
        #[arg(help = "Job file (JSON, or YAML by .yaml/.yml extension)")]
        job: PathBuf,
        #[arg(long, short, help = "Write the assembled document to this path")]
        output: Option<PathBuf>,
        #[arg(long, help = "Write the full report instead of the assembled document")]
        report: bool,
        #[arg(long, help = "Record store path (overrides storage.db_path)")]
        db: Option<PathBuf>,
        #[arg(long = "no-store", help = "Do not persist sealed records")]
        no_store: bool,
        #[arg(long, help = "Print the report as JSON")]
        json: bool,
    },

    /// Classify a raw output against a schema
    Classify {
        #[arg(long, short, help = "Target schema (JSON or YAML)")]
        schema: PathBuf,
        #[arg(long, short, help = "File holding the raw model output")]
        input: PathBuf,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Apply the deterministic repair chain to a raw output
    Repair {
        #[arg(long, short, help = "Target schema (JSON or YAML)")]
        schema: PathBuf,
        #[arg(long, short, help = "File holding the raw model output")]
        input: PathBuf,
        #[arg(long, short, help = "Write the repaired object to this path")]
        output: Option<PathBuf>,
    },

    /// Inspect sealed records
    Records {
        #[arg(long, short, help = "Job id; lists stored jobs when omitted")]
        job: Option<String>,
        #[arg(long, help = "Record store path (overrides storage.db_path)")]
        db: Option<PathBuf>,
        #[arg(long, help = "Print the assembled document")]
        assemble: bool,
        #[arg(long, help = "Include every attempt")]
        attempts: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write a default configuration file
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mregencascade encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` means the command ran but its result is a failure
/// (failed job, invalid output, unrepairable output).
fn run_cli() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "regencascade=debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_file = cli.config.as_deref();

    let ok = match cli.command {
        Commands::Run {
            job,
            output,
            report,
            db,
            no_store,
            json,
        } => {
            let ctx = CommandContext::load(config_file, db)?;
            let rt = Runtime::new()?;
            let status = rt.block_on(commands::run::run(
                &ctx,
                RunOptions {
                    job,
                    output,
                    full_report: report,
                    no_store,
                    json,
                    quiet: cli.quiet,
                },
            ))?;
            status != JobStatus::Failed
        }
        Commands::Classify {
            schema,
            input,
            format,
        } => commands::classify::run(&schema, &input, &format)?,
        Commands::Repair {
            schema,
            input,
            output,
        } => commands::repair::run(&RepairOptions {
            schema,
            input,
            output,
        })?,
        Commands::Records {
            job,
            db,
            assemble,
            attempts,
            format,
        } => {
            let ctx = CommandContext::load(config_file, db)?;
            commands::records::run(
                &ctx,
                &RecordsOptions {
                    job,
                    assemble,
                    attempts,
                    format,
                },
            )?;
            true
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show { format } => {
                    let ctx = CommandContext::load(config_file, None)?;
                    commands::config::show(&ctx.config, &format)?;
                }
                ConfigAction::Path => commands::config::path()?,
                ConfigAction::Init { global, force } => commands::config::init(global, force)?,
            }
            true
        }
    };

    Ok(ok)
}
