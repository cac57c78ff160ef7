use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use freshpack_installer::{read_install_receipt, AppLayout};
use freshpack_remote::CancellationToken;
use tracing_subscriber::EnvFilter;

mod completion;
mod config;
mod render;
mod update_flow;

use completion::{
    invoked_bin_name, resolve_completion_shell, write_completions_script, CliCompletionShell,
};
use config::{resolve_config, ConfigOverrides, ResolvedConfig, CONFIG_ENV_VAR};
use render::{current_output_style, format_outcome_lines, TerminalRenderer};
use update_flow::{UpdateOptions, UpdateOrchestrator};

const EXIT_UPDATE_FAILED: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "freshpack", version)]
#[command(about = "Keeps one application installed at its latest published release", long_about = None)]
struct Cli {
    /// TOML config file (defaults to $FRESHPACK_CONFIG, then <user base>/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    manifest_url: Option<String>,
    /// Application name to look up in the manifest.
    #[arg(long = "app", global = true)]
    app_name: Option<String>,
    /// Per-application base directory.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the manifest and install the published release.
    Update {
        /// Skip the download when the recorded install is already at the manifest version.
        #[arg(long)]
        skip_if_current: bool,
        /// Disable progress bars and colors.
        #[arg(long)]
        plain: bool,
    },
    /// Show the recorded install.
    Status,
    /// Print resolved configuration and paths.
    Doctor,
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Option<CliCompletionShell>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    let overrides = ConfigOverrides {
        config_path: cli.config,
        manifest_url: cli.manifest_url,
        app_name: cli.app_name,
        base_dir: cli.base_dir,
    };

    match cli.command {
        Commands::Update {
            skip_if_current,
            plain,
        } => {
            let resolved = resolve_config(&overrides)?;
            let style = current_output_style(plain);
            let renderer = TerminalRenderer::from_style(style);

            let cancel = CancellationToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || handler_token.cancel())
                .context("failed to install Ctrl-C handler")?;

            let orchestrator = UpdateOrchestrator::new(resolved.config);
            let mut reporter = renderer.start_download("download");
            let result = orchestrator.run(
                UpdateOptions { skip_if_current },
                &mut reporter,
                &cancel,
            );
            reporter.finish();

            match result {
                Ok(outcome) => {
                    renderer.print_lines(&format_outcome_lines(&outcome, style));
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    renderer.print_failure(&failure);
                    let code = if failure.is_cancelled() {
                        EXIT_CANCELLED
                    } else {
                        EXIT_UPDATE_FAILED
                    };
                    Ok(ExitCode::from(code))
                }
            }
        }
        Commands::Status => {
            let resolved = resolve_config(&overrides)?;
            let layout = AppLayout::new(resolved.config.base_dir.clone());
            let app = resolved.config.app_name.as_str();
            match read_install_receipt(&layout, app)? {
                Some(receipt) => {
                    println!("app: {}", receipt.name);
                    println!(
                        "version: {}",
                        receipt.version.as_deref().unwrap_or("unknown")
                    );
                    println!("install_root: {}", receipt.install_root.display());
                    println!(
                        "executable: {} ({})",
                        receipt.executable.display(),
                        if receipt.executable.is_file() {
                            "present"
                        } else {
                            "missing"
                        }
                    );
                    println!("archive: {}", receipt.archive_url);
                    println!("archive_sha256: {}", receipt.archive_sha256);
                    println!("installed_at_unix: {}", receipt.installed_at_unix);
                }
                None => println!("{app} is not installed"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor => {
            let resolved = resolve_config(&overrides)?;
            for line in format_doctor_lines(&resolved) {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            let shell_env = std::env::var("SHELL").ok();
            let shell = resolve_completion_shell(shell, shell_env.as_deref(), cfg!(windows));
            let mut stdout = std::io::stdout().lock();
            write_completions_script(shell, &invoked_bin_name(), &mut stdout)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn format_doctor_lines(resolved: &ResolvedConfig) -> Vec<String> {
    let config = &resolved.config;
    let layout = AppLayout::new(config.base_dir.clone());
    let config_source = match &resolved.source {
        Some(path) => path.display().to_string(),
        None => format!("none (set --config or {CONFIG_ENV_VAR})"),
    };
    let lock_path = layout.lock_path(&config.app_name);
    let lock_state = if lock_path.exists() { "held" } else { "free" };

    vec![
        format!("config: {config_source}"),
        format!("app: {}", config.app_name),
        format!("manifest_url: {}", config.manifest_url),
        format!("manifest_timeout: {}s", config.manifest_timeout.as_secs()),
        format!("download_timeout: {}s", config.download_timeout.as_secs()),
        format!("base: {}", layout.base().display()),
        format!("downloads: {}", layout.downloads_dir().display()),
        format!("tools: {}", layout.tools_dir().display()),
        format!("state: {}", layout.state_dir().display()),
        format!("lock: {} ({lock_state})", lock_path.display()),
    ]
}

#[cfg(test)]
mod tests;
