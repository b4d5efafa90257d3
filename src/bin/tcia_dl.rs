use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use tcia_downloader::app::{App, ProgressSink, RunContext, RunSummary};
use tcia_downloader::config::{ConfigLoader, ResolvedConfig};
use tcia_downloader::error::TciaError;
use tcia_downloader::local::LocalArchiveSource;
use tcia_downloader::manifest::Manifest;
use tcia_downloader::metadata::DicomMetadataReader;
use tcia_downloader::nifti::NiftiWriter;
use tcia_downloader::output::{ConsoleProgress, JsonOutput, OutputMode};
use tcia_downloader::tcia::TciaHttpClient;

#[derive(Parser)]
#[command(name = "tcia-dl")]
#[command(about = "Download TCIA series and sort DICOM slices into a patient/study/series tree")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every series listed in a TCIA manifest")]
    Download(DownloadArgs),
    #[command(about = "Classify zip archives already present in a local folder")]
    Classify(ClassifyArgs),
}

#[derive(Args)]
struct DownloadArgs {
    /// TCIA manifest (.tcia) file.
    #[arg(long, short)]
    manifest: PathBuf,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct ClassifyArgs {
    /// Folder searched recursively for .zip archives.
    #[arg(long, short)]
    input: PathBuf,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Destination root; created if missing, must be empty otherwise.
    #[arg(long, short)]
    dest: Utf8PathBuf,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, short)]
    workers: Option<usize>,

    /// Keep only original CT/MR/PT (attenuation corrected) and RTSTRUCT/SEG slices.
    #[arg(long)]
    filter_slices: bool,

    /// Drop series with fewer slices than --min-series-len.
    #[arg(long)]
    filter_small_series: bool,

    #[arg(long)]
    min_series_len: Option<usize>,

    /// Write one .nii.gz volume per series.
    #[arg(long)]
    volumes: bool,

    /// Also write the run summary as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn resolve(&self) -> Result<ResolvedConfig, TciaError> {
        let mut config = ConfigLoader::resolve(self.config.as_deref())?;
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err(TciaError::ConfigParse(
                    "workers must be at least 1".to_string(),
                ));
            }
            config.workers = workers;
        }
        config.filters.slice_type |= self.filter_slices;
        config.filters.small_series |= self.filter_small_series;
        if let Some(min) = self.min_series_len {
            config.filters.min_series_len = min;
        }
        config.volumes |= self.volumes;
        Ok(config)
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TciaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TciaError) -> u8 {
    match error {
        TciaError::MissingManifest(_)
        | TciaError::ManifestRead(_)
        | TciaError::DirectoryNotEmpty(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Download(args) => {
            let config = args.run.resolve()?;
            let manifest = Manifest::from_path(&args.manifest)?;
            let mut client = TciaHttpClient::new(&config.endpoint, config.timeout)?;
            if let Some(dir) = &config.staging_dir {
                client = client.with_staging_dir(dir);
            }
            let ctx = RunContext::new(args.run.dest.clone(), &config);
            let app = App::new(client, DicomMetadataReader, NiftiWriter::default());
            let summary = app.run(manifest.series, &ctx, sink(output_mode))?;
            finish(&summary, output_mode, args.run.report.as_deref())
        }
        Commands::Classify(args) => {
            let config = args.run.resolve()?;
            let mut source = LocalArchiveSource::discover(&args.input)?;
            if let Some(dir) = &config.staging_dir {
                source = source.with_staging_dir(dir);
            }
            let ids = source.ids();
            let ctx = RunContext::new(args.run.dest.clone(), &config);
            let app = App::new(source, DicomMetadataReader, NiftiWriter::default());
            let summary = app.run(ids, &ctx, sink(output_mode))?;
            finish(&summary, output_mode, args.run.report.as_deref())
        }
    }
}

fn sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &ConsoleProgress,
    }
}

fn finish(
    summary: &RunSummary,
    mode: OutputMode,
    report: Option<&std::path::Path>,
) -> miette::Result<()> {
    if let Some(path) = report {
        JsonOutput::write_report(path, summary)?;
    }
    match mode {
        OutputMode::Json => JsonOutput::print_summary(summary).into_diagnostic(),
        OutputMode::Human => {
            print_run_summary(summary);
            Ok(())
        }
    }
}

fn print_run_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}TCIA download summary{reset}");
    println!(
        "{green}Series: {} attempted, {} succeeded{reset}",
        summary.attempted, summary.succeeded
    );
    println!(
        "{green}Files placed: {}, volumes written: {}{reset}",
        summary.files_placed, summary.volumes_written
    );
    if summary.series_filtered > 0 || summary.files_filtered > 0 {
        println!(
            "{yellow}Filtered: {} series, {} files{reset}",
            summary.series_filtered, summary.files_filtered
        );
    }
    if summary.files_unreadable > 0 {
        println!(
            "{yellow}Unreadable files skipped: {}{reset}",
            summary.files_unreadable
        );
    }

    println!("{yellow}Collisions: {}{reset}", summary.collided);
    for collision in &summary.collisions {
        let kept = collision
            .kept
            .as_ref()
            .map(|claimant| format!("{} ({})", claimant.source.display(), claimant.series))
            .unwrap_or_else(|| "file already on disk".to_string());
        println!(
            "  {} kept {kept}, rejected {} ({})",
            collision.destination.display(),
            collision.rejected.source.display(),
            collision.rejected.series
        );
    }

    println!("{red}Failures: {}{reset}", summary.failures.len());
    for failure in &summary.failures {
        println!(
            "{red}  {} [{} while {}]: {}{reset}",
            failure.series, failure.kind, failure.stage, failure.message
        );
    }
}
