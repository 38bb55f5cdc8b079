//! batch-img-convert CLI - Resumable Batch Image Converter
//!
//! Converts a directory tree of TIFF images into PNG, JPEG or BMP files,
//! mirroring the tree into an output directory.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use console::style;
use tracing::{info, warn};

use batch_img_convert::{
    init_logging, level_for_verbosity, log_system_info, BatchConverter, Config, ConsoleProgress,
    ConvertError, JobSpec, ProgressObserver, ResizeFilter, ResumeMode, RunStatus, ScaleSpec,
    SilentProgress, Summary, TargetFormat,
};

/// batch-img-convert - Resumable Batch Image Converter
#[derive(Parser)]
#[command(
    name = "batch-img-convert",
    version,
    about = "Convert a tree of TIFF images to PNG, JPEG or BMP in parallel",
    long_about = "batch-img-convert walks an input directory, converts every TIFF image it finds \
                  into one or more target formats and writes the results into an output tree \
                  that mirrors the input. Interrupted runs can be resumed with --mode skip-existing.",
    subcommand_negates_reqs = true,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input directory
    #[arg(value_name = "INPATH", required = true)]
    input: Option<PathBuf>,

    /// Output directory [default: <INPATH>/converted]
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Also convert images in subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// What to do when output already exists
    #[arg(short, long, value_enum, value_name = "MODE")]
    mode: Option<CliResumeMode>,

    /// Target format; repeat or separate with commas [default: png]
    #[arg(
        short,
        long = "format",
        value_enum,
        ignore_case = true,
        value_name = "FORMAT",
        value_delimiter = ',',
        action = ArgAction::Append
    )]
    formats: Vec<CliTargetFormat>,

    /// Relative scale factor (0.1-4.0)
    #[arg(short, long, value_name = "FACTOR", conflicts_with = "size")]
    scale: Option<f64>,

    /// Absolute size of the longest edge in pixels (at least 160)
    #[arg(short = 'S', long, value_name = "PIXELS", conflicts_with = "scale")]
    size: Option<u32>,

    /// Number of worker threads [default: number of CPUs]
    #[arg(short, long = "poolsize", value_name = "COUNT")]
    pool_size: Option<usize>,

    /// JPEG quality (1-100) [default: 90]
    #[arg(short = 'Q', long, value_name = "QUALITY")]
    jpeg_quality: Option<u8>,

    /// Resampling filter used when scaling [default: lanczos3]
    #[arg(long, value_enum, value_name = "FILTER")]
    filter: Option<CliFilter>,

    /// Source file extensions, comma separated [default: tif,tiff]
    #[arg(long = "ext", value_name = "EXT", value_delimiter = ',')]
    extensions: Vec<String>,

    /// Configuration file (TOML or YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Show what would be converted without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// More output; repeat for more detail
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Errors only, no progress bar
    #[arg(short, long)]
    quiet: bool,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration to a file
    ExampleConfig {
        /// Output file path; the extension selects TOML or YAML
        #[arg(short, long, default_value = "batch-img-convert.toml")]
        output: PathBuf,
    },
    /// Validate a configuration file
    CheckConfig {
        /// Configuration file to validate
        file: PathBuf,
    },
}

/// CLI-compatible target format enum
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliTargetFormat {
    Png,
    #[value(alias = "jpg")]
    Jpeg,
    Bmp,
}

impl From<CliTargetFormat> for TargetFormat {
    fn from(format: CliTargetFormat) -> Self {
        match format {
            CliTargetFormat::Png => TargetFormat::Png,
            CliTargetFormat::Jpeg => TargetFormat::Jpeg,
            CliTargetFormat::Bmp => TargetFormat::Bmp,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliResumeMode {
    SkipExisting,
    Overwrite,
    FailIfExists,
}

impl From<CliResumeMode> for ResumeMode {
    fn from(mode: CliResumeMode) -> Self {
        match mode {
            CliResumeMode::SkipExisting => ResumeMode::SkipExisting,
            CliResumeMode::Overwrite => ResumeMode::Overwrite,
            CliResumeMode::FailIfExists => ResumeMode::FailIfExists,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<CliFilter> for ResizeFilter {
    fn from(filter: CliFilter) -> Self {
        match filter {
            CliFilter::Nearest => ResizeFilter::Nearest,
            CliFilter::Triangle => ResizeFilter::Triangle,
            CliFilter::CatmullRom => ResizeFilter::CatmullRom,
            CliFilter::Gaussian => ResizeFilter::Gaussian,
            CliFilter::Lanczos3 => ResizeFilter::Lanczos3,
        }
    }
}

impl Cli {
    /// Verbosity as carried by the job: -1 quiet, 0 default, then one per -v
    fn verbosity(&self) -> i8 {
        if self.quiet {
            -1
        } else {
            i8::try_from(self.verbose).unwrap_or(i8::MAX)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        if let Err(e) = handle_subcommand(command) {
            eprintln!("{}: {}", style("Error").red().bold(), describe(&e));
            process::exit(1);
        }
        return;
    }

    if let Err(e) = run(cli).await {
        eprintln!("{}: {}", style("Error").red().bold(), describe(&e));
        process::exit(1);
    }
}

/// Prefer the friendly message for our own errors
fn describe(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ConvertError>() {
        Some(e) => e.user_message(),
        None => format!("{:#}", error),
    }
}

/// Handle subcommands
fn handle_subcommand(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::ExampleConfig { output } => generate_example_config(&output),
        Commands::CheckConfig { file } => validate_config_file(&file),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => {
            let config = Config::from_file(path)?;
            config.validate()?;
            config
        }
        None => Config::default(),
    };

    let verbosity = cli.verbosity();
    let level = match (&config.logging.level, verbosity) {
        (Some(level), 0) => level.parse().unwrap_or_else(|_| level_for_verbosity(0)),
        _ => level_for_verbosity(verbosity),
    };
    init_logging(level, config.logging.json_format);

    if let Some(path) = &cli.config {
        info!("Loaded configuration from: {:?}", path);
    }
    log_system_info();

    let job = build_job(&cli, &config)?;
    let converter = BatchConverter::new();

    if cli.dry_run {
        return print_plan(&converter, &job, cli.json);
    }

    let stop = converter.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing files in progress");
            eprintln!(
                "{}: stopping after the files in progress (press Ctrl-C again to abort)",
                style("Interrupted").yellow().bold()
            );
            stop.store(true, Ordering::SeqCst);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            process::exit(130);
        }
    });

    let show_progress = !cli.json && !job.is_silent();
    let show_details = verbosity >= 1;
    let summary = tokio::task::spawn_blocking(move || {
        let mut observer: Box<dyn ProgressObserver> = if show_progress {
            Box::new(ConsoleProgress::new(show_details))
        } else {
            Box::new(SilentProgress)
        };
        converter.run(job, observer.as_mut())
    })
    .await
    .context("conversion task failed")??;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if verbosity >= 0 {
        print_summary(&summary, verbosity);
    }

    Ok(())
}

/// Apply command line overrides on top of the configuration file
fn build_job(cli: &Cli, config: &Config) -> batch_img_convert::Result<JobSpec> {
    let input = cli
        .input
        .clone()
        .ok_or_else(|| ConvertError::config("An input directory is required"))?;

    let mut builder = config
        .conversion
        .to_builder(input)
        .verbosity(cli.verbosity());

    if let Some(output) = &cli.output {
        builder = builder.output(output.clone());
    }
    if cli.recursive {
        builder = builder.recursive(true);
    }
    if let Some(mode) = cli.mode {
        builder = builder.mode(mode.into());
    }
    if !cli.formats.is_empty() {
        builder = builder.formats(cli.formats.iter().copied().map(TargetFormat::from));
    }
    if let Some(factor) = cli.scale {
        builder = builder.scale(ScaleSpec::Relative(factor));
    }
    if let Some(pixels) = cli.size {
        builder = builder.scale(ScaleSpec::Absolute(pixels));
    }
    if let Some(pool_size) = cli.pool_size {
        builder = builder.pool_size(pool_size);
    }
    if let Some(quality) = cli.jpeg_quality {
        builder = builder.jpeg_quality(quality);
    }
    if let Some(filter) = cli.filter {
        builder = builder.filter(filter.into());
    }
    if !cli.extensions.is_empty() {
        builder = builder.source_extensions(cli.extensions.clone());
    }

    builder.build()
}

/// List what a run would do, without creating the output directory
fn print_plan(converter: &BatchConverter, job: &JobSpec, json: bool) -> anyhow::Result<()> {
    let plan = converter.plan(job)?;
    let pending: Vec<_> = plan.pending(job).collect();

    if json {
        let files: Vec<_> = pending
            .iter()
            .map(|(file, formats)| {
                serde_json::json!({
                    "source": file.path(),
                    "collides_with": file.collides_with(),
                    "outputs": formats
                        .iter()
                        .map(|&format| file.output_path(&plan.paths.output_root, format))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        let report = serde_json::json!({
            "input_root": plan.paths.input_root,
            "output_root": plan.paths.output_root,
            "files": files,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if pending.is_empty() {
        print_nothing_to_convert(&plan.paths.input_root, job);
        return Ok(());
    }

    println!(
        "{} files would be converted into {}:",
        style(pending.len()).bold(),
        plan.paths.output_root.display()
    );
    for (file, formats) in &pending {
        if let Some(owner) = file.collides_with() {
            println!(
                "  {} {}",
                file.relative().display(),
                style(format!("(same outputs as {}, will fail)", owner.display())).yellow()
            );
        } else if formats.is_empty() {
            println!("  {} {}", file.relative().display(), style("(up to date)").dim());
        } else {
            let names: Vec<String> = formats.iter().map(ToString::to_string).collect();
            println!("  {} -> {}", file.relative().display(), names.join(", "));
        }
    }
    Ok(())
}

fn print_nothing_to_convert(input_root: &Path, job: &JobSpec) {
    println!(
        "{}: nothing to convert, no .{} files in {}{}",
        style("Info").blue().bold(),
        job.source_extensions().join("/."),
        input_root.display(),
        if job.recursive() { "" } else { " (use --recursive to include subdirectories)" }
    );
}

/// Print processing summary
fn print_summary(summary: &Summary, verbosity: i8) {
    if summary.status == RunStatus::NothingToConvert {
        println!(
            "{}: nothing to convert in {}",
            style("Info").blue().bold(),
            summary.input_root.display()
        );
        return;
    }

    println!();
    println!("{}", style("Conversion Summary:").bold());
    println!("  {}: {}", style("Converted").green(), summary.converted);
    println!("  {}: {}", style("Skipped").cyan(), summary.skipped);
    if summary.failed > 0 {
        println!("  {}: {}", style("Failed").red(), summary.failed);
    } else {
        println!("  Failed: 0");
    }
    if summary.cancelled > 0 {
        println!("  {}: {}", style("Not started").yellow(), summary.cancelled);
    }
    println!(
        "  {}: {} ({:.2} MB)",
        style("Files written").cyan(),
        summary.files_written,
        summary.bytes_written as f64 / 1024.0 / 1024.0
    );
    println!("  {}: {:.2}s", style("Duration").blue(), summary.duration_secs);
    if summary.duration_secs > 0.0 {
        println!(
            "  {}: {:.1} files/sec",
            style("Speed").cyan(),
            summary.files_per_second()
        );
    }
    println!("  {}: {}", style("Output").blue(), summary.output_root.display());

    if summary.status == RunStatus::Interrupted {
        println!();
        println!(
            "{}: run again with --mode skip-existing to convert the remaining files",
            style("Interrupted").yellow().bold()
        );
    }

    if !summary.failures.is_empty() {
        println!();
        if verbosity >= 1 {
            println!("{}", style("Failed files:").red().bold());
            for failure in &summary.failures {
                println!("  {}: {}", failure.path.display(), failure.reason);
            }
        } else {
            println!(
                "{} files failed; run with -v to list them",
                style(summary.failures.len()).red().bold()
            );
        }
    }
}

/// Validate configuration file
fn validate_config_file(file_path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(file_path)?;
    config.validate()?;

    let formats: Vec<String> = config
        .conversion
        .formats
        .iter()
        .map(ToString::to_string)
        .collect();

    println!("{}: Configuration file is valid", style("Success").green().bold());
    println!("Formats: {}", formats.join(", "));
    println!("Mode: {}", config.conversion.mode);
    match config.conversion.scale {
        Some(scale) => println!("Scale: {}", scale),
        None => println!("Scale: none"),
    }

    Ok(())
}

/// Generate example configuration file
fn generate_example_config(output_path: &Path) -> anyhow::Result<()> {
    let config = Config::default();
    config
        .to_file(output_path)
        .with_context(|| format!("writing {}", output_path.display()))?;

    println!(
        "{}: Generated example configuration: {}",
        style("Success").green().bold(),
        output_path.display()
    );

    Ok(())
}
