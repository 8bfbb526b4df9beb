use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use sepi::app::{App, LogSink, ProgressSink};
use sepi::config::{ConfigLoader, ProteinsEntry, Settings};
use sepi::error::SepiError;
use sepi::ncbi::{EntrezHttpClient, RateLimiter, RetryPolicy};
use sepi::output::{HumanOutput, JsonOutput, OutputMode};
use sepi::report::{ensure_parent, write_reports};

#[derive(Parser)]
#[command(name = "sepi")]
#[command(about = "Retrieve reference protein sequences for an organism from NCBI")]
#[command(
    after_help = "Example: sepi --organism \"Pseudomonas aeruginosa PAO1\" --proteins dnaA,recA --assembly-level complete_genome --output PAO1_refs --email user@example.com"
)]
#[command(version, author)]
struct Cli {
    /// Target organism, or a preset key (ecoli, klebsiella).
    #[arg(long)]
    organism: Option<String>,

    /// Comma-separated protein names, `all` for a preset, or a .txt list.
    #[arg(long)]
    proteins: Option<String>,

    /// File with one protein name per line.
    #[arg(long)]
    protein_list: Option<PathBuf>,

    /// YAML file with run parameters; flags take precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    /// complete_genome, chromosome, scaffold, contig or none.
    #[arg(long)]
    assembly_level: Option<String>,

    /// Extra Entrez clause ANDed to every search (e.g. "host=human").
    #[arg(long)]
    biosample_query: Option<String>,

    /// Base name for output files [default: SEPI_output].
    #[arg(long)]
    output: Option<String>,

    #[arg(long)]
    multi_fasta: bool,

    #[arg(long)]
    html_report: bool,

    /// Contact address sent to NCBI with every request.
    #[arg(long)]
    email: Option<String>,

    /// Maximum search hits considered per protein.
    #[arg(long)]
    retmax: Option<usize>,

    /// Proteins resolved concurrently.
    #[arg(long)]
    workers: Option<usize>,

    /// Per-protein time budget in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Search only the plain query, skipping the RefSeq-first ladder.
    #[arg(long)]
    no_refseq_ladder: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            organism: self.organism.clone(),
            proteins: self.proteins.clone().map(ProteinsEntry::Csv),
            protein_list: self.protein_list.clone(),
            user_email: self.email.clone(),
            assembly_level: self.assembly_level.clone(),
            biosample_query: self.biosample_query.clone(),
            output: self.output.clone(),
            multi_fasta: self.multi_fasta.then_some(true),
            html_report: self.html_report.then_some(true),
            retmax: self.retmax,
            workers: self.workers,
            timeout_secs: self.timeout_secs,
            refseq_first: self.no_refseq_ladder.then_some(false),
            selection_order: None,
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(sepi) = report.downcast_ref::<SepiError>() {
            return ExitCode::from(map_exit_code(sepi));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SepiError) -> u8 {
    match error {
        SepiError::InvalidRequest(_)
        | SepiError::InvalidAssemblyLevel(_)
        | SepiError::ConfigRead(_)
        | SepiError::ConfigParse(_)
        | SepiError::ProteinListRead(_) => 2,
        SepiError::NcbiHttp(_)
        | SepiError::NcbiStatus { .. }
        | SepiError::Unavailable { .. }
        | SepiError::MalformedResponse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let resolved = ConfigLoader::resolve(cli.settings(), cli.config.as_deref())?;
    ensure_parent(&resolved.output.base)?;
    init_logging(&resolved.output.log_path())?;

    let api_key = EntrezHttpClient::api_key_from_env();
    let limiter = Arc::new(RateLimiter::per_second(EntrezHttpClient::rate_limit_for(
        api_key.as_deref(),
    )));
    let client = EntrezHttpClient::new(
        resolved.request.contact(),
        api_key,
        limiter,
        RetryPolicy::default(),
    )?;
    let app = App::new(client);

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };
    let pipeline_run = app.run(&resolved.request, &resolved.run, sink);
    let artifacts = write_reports(&pipeline_run, &resolved.output)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_run(&pipeline_run, &artifacts).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_run(&pipeline_run, &artifacts),
    }
    Ok(())
}

fn init_logging(log_path: &Utf8Path) -> Result<(), SepiError> {
    let log_file = File::create(log_path)
        .map_err(|err| SepiError::Filesystem(format!("create log {log_path}: {err}")))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();
    Ok(())
}
