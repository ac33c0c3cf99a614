use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bold_digger::checkpoint::CheckpointLedger;
use bold_digger::config::{ConfigLoader, ResolvedConfig};
use bold_digger::consensus::{ConsensusResolver, ResolutionMethod};
use bold_digger::domain::Engine;
use bold_digger::error::BoldError;
use bold_digger::fasta::{check_records, modified_path, read_fasta, write_fasta};
use bold_digger::fetch::FetchStrategy;
use bold_digger::output::{
    ConsoleProgress, JsonOutput, LogProgress, OutputMode, StatusReport, print_calls_text,
    print_check_text, print_status_text, print_summary_text,
};
use bold_digger::pipeline::{CancelFlag, Pipeline};
use bold_digger::sink::{JsonlSink, read_hit_table};
use bold_digger::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "bold-digger")]
#[command(about = "Identify DNA barcodes against the BOLD identification engine")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Submit a FASTA file in batches and resolve a call per record")]
    Identify(IdentifyArgs),
    #[command(about = "Check headers and residues of a FASTA file")]
    Check(CheckArgs),
    #[command(about = "Resolve calls from a previously written hit table")]
    Resolve(ResolveArgs),
    #[command(about = "Show the checkpoint of a FASTA file")]
    Status(StatusArgs),
}

#[derive(Args)]
struct IdentifyArgs {
    fasta: Utf8PathBuf,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    engine: Option<Engine>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    method: Option<ResolutionMethod>,

    #[arg(long)]
    strategy: Option<FetchStrategy>,

    #[arg(long)]
    output_dir: Option<Utf8PathBuf>,

    /// Discard the checkpoint and previous output, start from the first record.
    #[arg(long)]
    restart: bool,

    /// Skip specimen metadata lookups.
    #[arg(long)]
    no_specimens: bool,
}

#[derive(Args)]
struct CheckArgs {
    fasta: Utf8PathBuf,

    /// Write a corrected copy next to the input when anything changed.
    #[arg(long)]
    write: bool,
}

#[derive(Args)]
struct ResolveArgs {
    hits: Utf8PathBuf,

    #[arg(long, default_value = "cascade")]
    method: ResolutionMethod,
}

#[derive(Args)]
struct StatusArgs {
    fasta: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BoldError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BoldError) -> u8 {
    match error {
        BoldError::InvalidConfiguration(_)
        | BoldError::ConfigRead(_)
        | BoldError::ConfigParse(_)
        | BoldError::InvalidFasta(_)
        | BoldError::CheckpointMismatch(_) => 2,
        BoldError::Http(_)
        | BoldError::Timeout(_)
        | BoldError::Submission(_)
        | BoldError::SubmissionStatus { .. }
        | BoldError::ServiceTimeout { .. }
        | BoldError::FetchFailed { .. }
        | BoldError::MalformedPage(_)
        | BoldError::TooManyBadConnections { .. }
        | BoldError::SpecimenParse(_) => 3,
        BoldError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Identify(args) => run_identify(args, output_mode),
        Commands::Check(args) => run_check(args, output_mode),
        Commands::Resolve(args) => run_resolve(args, output_mode),
        Commands::Status(args) => run_status(args, output_mode),
    }
}

fn run_identify(args: IdentifyArgs, output_mode: OutputMode) -> miette::Result<()> {
    let mut resolved = ConfigLoader::resolve(args.config.as_deref())?;
    apply_overrides(&mut resolved, &args);

    let records = read_fasta(&args.fasta)?;
    let mut ledger = if args.restart {
        CheckpointLedger::open_fresh(&args.fasta, &records)?
    } else {
        CheckpointLedger::open(&args.fasta, &records)?
    };

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| resolved.output_dir.clone())
        .unwrap_or_else(|| default_output_dir(&args.fasta));
    let stem = args.fasta.file_stem().unwrap_or("bold-digger");
    let mut sink = JsonlSink::open(&output_dir, stem, ledger.checkpoint().sink)?;
    info!(hits = %sink.hits_path(), calls = %sink.calls_path(), "writing results");

    let transport = HttpTransport::new(&resolved.base_url)?;
    let pipeline = Pipeline::new(&transport, resolved.pipeline)?;
    let cancel = CancelFlag::new();

    match output_mode {
        OutputMode::NonInteractive => {
            let summary = pipeline.run(&records, &mut ledger, &mut sink, &LogProgress, &cancel)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let progress = ConsoleProgress::new();
            let result = pipeline.run(&records, &mut ledger, &mut sink, &progress, &cancel);
            progress.finish();
            let summary = result?;
            print_summary_text(&summary);
            println!("hits:  {}", sink.hits_path());
            println!("calls: {}", sink.calls_path());
        }
    }
    Ok(())
}

fn apply_overrides(resolved: &mut ResolvedConfig, args: &IdentifyArgs) {
    let pipeline = &mut resolved.pipeline;
    if let Some(engine) = args.engine {
        pipeline.engine = engine;
    }
    if let Some(batch_size) = args.batch_size {
        pipeline.batch_size = batch_size;
    }
    if let Some(method) = args.method {
        pipeline.method = method;
    }
    if let Some(strategy) = args.strategy {
        pipeline.strategy = strategy;
    }
    if args.no_specimens {
        pipeline.specimen_lookup = false;
    }
}

fn default_output_dir(fasta: &Utf8Path) -> Utf8PathBuf {
    match fasta.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    }
}

fn run_check(args: CheckArgs, output_mode: OutputMode) -> miette::Result<()> {
    let records = read_fasta(&args.fasta)?;
    let report = check_records(&records)?;

    let written = if args.write && !report.is_clean() {
        let path = modified_path(&args.fasta);
        write_fasta(&path, &report.normalized)?;
        Some(path)
    } else {
        None
    };

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_check(&report).into_diagnostic()?,
        OutputMode::Interactive => print_check_text(&report, written.as_ref().map(|p| p.as_str())),
    }
    Ok(())
}

fn run_resolve(args: ResolveArgs, output_mode: OutputMode) -> miette::Result<()> {
    let records = read_hit_table(&args.hits)?;
    let resolver = ConsensusResolver::new(args.method);
    let calls: Vec<_> = records.iter().map(|record| resolver.resolve(record)).collect();

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_calls(&calls).into_diagnostic()?,
        OutputMode::Interactive => print_calls_text(&calls),
    }
    Ok(())
}

fn run_status(args: StatusArgs, output_mode: OutputMode) -> miette::Result<()> {
    let checkpoint = CheckpointLedger::load(&args.fasta)?;
    let status = StatusReport {
        input: args.fasta.to_string(),
        complete: checkpoint.as_ref().is_some_and(|checkpoint| checkpoint.is_complete()),
        checkpoint,
    };

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_status(&status).into_diagnostic()?,
        OutputMode::Interactive => print_status_text(&status),
    }
    Ok(())
}
