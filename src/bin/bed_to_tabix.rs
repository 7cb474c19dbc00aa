use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bed_to_tabix::config::{ConfigLoader, Overrides};
use bed_to_tabix::domain::Transport;
use bed_to_tabix::error::TabixError;
use bed_to_tabix::fetch::TabixFetcher;
use bed_to_tabix::merge::BcftoolsMerger;
use bed_to_tabix::output::{JsonOutput, LogProgress, OutputMode, ProgressSink, print_summary};
use bed_to_tabix::pipeline::{
    FailedRun, Pipeline, PipelineOptions, default_output_name, with_vcf_suffix,
};
use bed_to_tabix::tools::{ToolOverrides, ToolPaths};

#[derive(Parser)]
#[command(name = "bed-to-tabix")]
#[command(
    about = "Download the 1000 Genomes genotypes in the regions of one or more BED files into a single VCF"
)]
#[command(version, author)]
struct Cli {
    /// Input BED file(s); repeat the flag for more than one.
    #[arg(long = "in", value_name = "BEDFILE", required = true)]
    inputs: Vec<PathBuf>,

    /// Output VCF path. Defaults to the input names joined with `__`.
    #[arg(long, value_name = "VCFFILE")]
    out: Option<PathBuf>,

    /// Number of chromosomes downloaded in parallel.
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Write a plain VCF instead of a bgzipped one.
    #[arg(long)]
    unzipped: bool,

    /// Overwrite the output file if it exists.
    #[arg(short, long)]
    force: bool,

    /// Print the commands that would run instead of running them.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    debug: bool,

    /// Keep the temporary per-chromosome files.
    #[arg(long)]
    no_cleanup: bool,

    /// Remote protocol; use http where FTP is blocked.
    #[arg(long, value_enum)]
    transport: Option<Transport>,

    #[arg(long, value_name = "PATH")]
    path_to_tabix: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    path_to_bgzip: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    path_to_bcftools: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TabixError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TabixError) -> u8 {
    match error {
        TabixError::InvalidRegion { .. }
        | TabixError::RegionsRead(..)
        | TabixError::NoRegions
        | TabixError::InvalidChromosome(_)
        | TabixError::InvalidConcurrency
        | TabixError::OutputExists(_)
        | TabixError::ConfigRead(_)
        | TabixError::ConfigParse(_) => 2,
        TabixError::MissingTool(_)
        | TabixError::TransientFetch { .. }
        | TabixError::FatalFetch { .. }
        | TabixError::RetriesExhausted { .. }
        | TabixError::FetchFailed { .. }
        | TabixError::Http(_) => 3,
        TabixError::Merge(_) => 4,
        TabixError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let resolved = ConfigLoader::resolve(
        cli.config.as_deref(),
        Overrides {
            concurrency: cli.threads,
            unzipped: cli.unzipped,
            transport: cli.transport,
            tools: ToolOverrides {
                tabix: cli.path_to_tabix,
                bgzip: cli.path_to_bgzip,
                bcftools: cli.path_to_bcftools,
            },
        },
    )?;

    let output = match cli.out {
        Some(path) => with_vcf_suffix(path, resolved.compressed),
        None => {
            let cwd = std::env::current_dir().into_diagnostic()?;
            default_output_name(&cli.inputs, &cwd, resolved.compressed)
        }
    };

    let tools = ToolPaths::resolve(&resolved.tools)?;
    tracing::debug!(tools = ?tools.tool_info(), "external tools");
    let fetcher = TabixFetcher::new(
        tools.clone(),
        resolved.archive.clone(),
        resolved.attempt_timeout,
    )?;
    let merger = BcftoolsMerger::new(tools.bcftools.clone());

    let options = PipelineOptions {
        concurrency: resolved.concurrency,
        compressed: resolved.compressed,
        transport: resolved.transport,
        retry: resolved.retry,
        // A dry run never writes the output, so an existing file is no obstacle.
        force: cli.force || cli.dry_run,
        keep_intermediates: cli.no_cleanup,
        ..PipelineOptions::new(output.clone())
    };
    let pipeline = Pipeline::from_files(&cli.inputs, &resolved.archive.contigs(), options)?;

    if cli.dry_run {
        let mut commands = pipeline.dry_run(&fetcher);
        let inputs = pipeline
            .jobs()
            .iter()
            .map(|job| job.output_path.clone())
            .collect::<Vec<_>>();
        commands.push(merger.describe(&inputs, &output, resolved.compressed));
        match output_mode {
            OutputMode::Json => JsonOutput::print_commands(&commands).into_diagnostic()?,
            OutputMode::Human => {
                for command in commands {
                    println!("{command}");
                }
            }
        }
        return Ok(());
    }

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogProgress,
    };
    let (report, error) = match pipeline.run(&fetcher, &merger, sink) {
        Ok(report) => (report, None),
        Err(failed) => {
            let FailedRun { report, error } = *failed;
            (report, Some(error))
        }
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Human => print_summary(&report),
    }
    match error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
