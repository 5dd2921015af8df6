//! x-fidelity command line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use xfi_core::{AnalyzeOptions, Analyzer};

/// Policy-driven repository analysis against a named archetype.
#[derive(Debug, Parser)]
#[command(name = "xfi", version, about)]
struct Cli {
    /// Repository to analyze.
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Archetype to evaluate against.
    #[arg(short, long, default_value = "node-fullstack")]
    archetype: String,

    /// Remote config server base URL.
    #[arg(long)]
    config_server: Option<String>,

    /// Local directory holding archetype and rule JSON files.
    #[arg(long)]
    local_config_path: Option<PathBuf>,

    /// Restrict analysis to these files.
    #[arg(long, value_delimiter = ',')]
    zap_files: Option<Vec<String>>,

    /// Extra plugin names to activate on top of the archetype's own.
    #[arg(short = 'e', long, value_delimiter = ',')]
    extra_plugins: Vec<String>,

    /// Prefix forwarded to the config server for log correlation.
    #[arg(long)]
    log_prefix: Option<String>,

    /// Disable the per-file fingerprint cache.
    #[arg(long)]
    no_cache: bool,

    /// Skip writing XFI_RESULT.json and the markdown report.
    #[arg(long)]
    no_reports: bool,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let mut options = AnalyzeOptions::new(&cli.dir);
    options.archetype = cli.archetype;
    options.config_server = cli.config_server;
    options.local_config_path = cli.local_config_path;
    options.zap_files = cli.zap_files;
    options.extra_plugins = cli.extra_plugins;
    options.log_prefix = cli.log_prefix;
    options.use_fingerprint_cache = !cli.no_cache;
    options.write_reports = !cli.no_reports;

    let analyzer = Analyzer::new();
    let result = match analyzer.analyze(options).await {
        Ok(result) => result,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    analyzer.registry().cleanup_all();

    println!(
        "{} issues across {} files ({} warnings, {} errors, {} fatalities, {} exempt)",
        result.total_issues,
        result.file_count,
        result.warning_count,
        result.error_count,
        result.fatality_count,
        result.exempt_count
    );

    if result.fatality_count > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
