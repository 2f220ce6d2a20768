mod config;
mod distributed;
mod executors;
mod sync;

#[cfg(test)]
mod config_test;

use clap::{ArgAction, Parser, Subcommand};
use config::{ConfigErrors, RunnerConfig};
use distributed::SchedulerIds;
use executors::{
    slurm::{ArrayJob, SlurmSubmitter},
    Submitter,
};
use std::{
    env,
    io::Write,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{exit, ExitStatus},
};
use sync::coordinator::ArrayJobCoordinator;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Coordinate a slurm array job whose tasks share per node working directories
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the yaml config
    #[arg(short, long, env = "NODESHARE_CONFIG")]
    config: PathBuf,

    /// Increase verbosity, can be repeated
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single array task, identifiers default to the slurm environment
    Task {
        #[arg(long)]
        job_id: Option<String>,
        #[arg(long)]
        index: Option<usize>,
        #[arg(long)]
        node: Option<String>,
    },
    /// Print the array job script
    Render,
    /// Submit the array job with sbatch
    Submit,
    /// Print all work items with their array index
    List,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// shells report signals as 128 + signal, do the same
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

fn load_config(path: &Path) -> Result<(RunnerConfig, Vec<String>), ConfigErrors> {
    let config = RunnerConfig::load(path)?;
    config.preflight_checks()?;
    let work_items = config.resolve_work_items()?;

    Ok((config, work_items))
}

fn render_array_job(
    config: &RunnerConfig,
    config_path: &Path,
    work_items: &[String],
) -> Result<String, ConfigErrors> {
    let program = env::current_exe().map_err(|_| ConfigErrors::MissingParameter("program"))?;
    let config_path = config_path
        .canonicalize()
        .map_err(|source| ConfigErrors::ReadConfig {
            path: config_path.to_path_buf(),
            source,
        })?;

    ArrayJob {
        work_items: work_items.len(),
        program: &program,
        config: &config_path,
        slurm: &config.slurm,
    }
    .render()
    .ok_or(ConfigErrors::NoWorkItems)
}

fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let (config, work_items) = load_config(&cli.config)?;
    let submitter = SlurmSubmitter::load(&config.slurm);

    match cli.command {
        Commands::Task {
            job_id,
            index,
            node,
        } => {
            let ids = SchedulerIds::collect(job_id, index, node)?;
            let coordinator = ArrayJobCoordinator::new(&config, &submitter);
            let status = coordinator.execute(ids, &work_items)?;

            Ok(exit_code(status))
        }
        Commands::Render => {
            let script = render_array_job(&config, &cli.config, &work_items)?;
            std::io::stdout().write_all(script.as_bytes())?;

            Ok(0)
        }
        Commands::Submit => {
            let script = render_array_job(&config, &cli.config, &work_items)?;
            let mut file = tempfile::Builder::new()
                .prefix("nodeshare-array-")
                .suffix(".sh")
                .tempfile()?;
            file.write_all(script.as_bytes())?;
            file.flush()?;

            let job_id = submitter.submit(file.path())?;
            info!(job_id = %job_id, "Submitted array job with {} tasks", work_items.len());
            println!("{job_id}");

            Ok(0)
        }
        Commands::List => {
            let mut stdout = std::io::stdout().lock();
            for (index, item) in work_items.iter().enumerate() {
                writeln!(stdout, "{index}\t{item}")?;
            }

            Ok(0)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error}");

            let mut source = error.source();
            while let Some(cause) = source {
                error!("caused by: {cause}");
                source = cause.source();
            }

            exit(1)
        }
    }
}
