mod check_cmd;
mod config;
mod init_cmd;
mod run_cmd;
mod scan_cmd;

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use run_cmd::RunOverrides;

#[derive(Parser)]
#[command(
    name = "tandem",
    version,
    about = "Run processes side by side, interleave their output, fail on crashes or error markers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every process in a harness file
    Run {
        /// Harness file (defaults to TANDEM_CONFIG, then ./tandem.toml)
        file: Option<PathBuf>,
        #[command(flatten)]
        overrides: RunOverrides,
        /// Write a JSON report of the run to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Supervise a single command
    Exec {
        /// Tag for the command's output lines
        #[arg(long, default_value = "exec")]
        name: String,
        #[command(flatten)]
        overrides: RunOverrides,
        /// Write a JSON report of the run to this path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Command and arguments
        #[arg(last = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// Scan a log file (or stdin) for failure markers
    Scan {
        /// File to scan (defaults to stdin)
        file: Option<PathBuf>,
        /// Literal marker (repeatable)
        #[arg(long = "marker", value_name = "TEXT")]
        markers: Vec<String>,
        /// Regex marker (repeatable)
        #[arg(long = "marker-regex", value_name = "REGEX")]
        marker_regex: Vec<String>,
    },
    /// Validate a harness file and show what it would run
    Check {
        /// Harness file (defaults to TANDEM_CONFIG, then ./tandem.toml)
        file: Option<PathBuf>,
    },
    /// Write a harness file from a built-in preset
    Init {
        /// Preset to start from
        #[arg(long, default_value = tandem_core::presets::DEFAULT_PRESET)]
        preset: String,
        /// Output path
        #[arg(long, default_value = config::DEFAULT_HARNESS_FILE)]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
        /// List the available presets instead
        #[arg(long)]
        list: bool,
    },
    /// Print shell completions
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Merged process output owns stdout; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            file,
            overrides,
            report,
        } => run_cmd::run_harness(file, &overrides, report.as_deref()).await?,
        Commands::Exec {
            name,
            overrides,
            report,
            command,
        } => run_cmd::run_exec(&name, command, &overrides, report.as_deref()).await?,
        Commands::Scan {
            file,
            markers,
            marker_regex,
        } => scan_cmd::run_scan(file.as_deref(), &markers, &marker_regex).await?,
        Commands::Check { file } => {
            check_cmd::run_check(file.as_deref())?;
            0
        }
        Commands::Init {
            preset,
            output,
            force,
            list,
        } => {
            if list {
                init_cmd::list_presets();
            } else {
                init_cmd::run_init(&preset, &output, force)?;
            }
            0
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "tandem", &mut io::stdout());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
