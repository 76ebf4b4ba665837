use anyhow::Context;
use clap::{Parser, Subcommand};
use podboot::env::PublishedEnvironment;
use podboot::logging::init_logging;
use podboot::{BootConfig, BootStatus, Bootstrap, StatusReport, exit_code_for_error, shutdown_signal};
use std::collections::BTreeMap;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "podboot", version, about = "Staged container bootstrap and service supervisor")]
struct Cli {
    /// Config file (defaults to /etc/podboot/config.json when present)
    #[arg(long, global = true, env = "PODBOOT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the state directory from the config
    #[arg(long, global = true, env = "PODBOOT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run init, then start and supervise services (container entrypoint, behind an init shim)
    Run,

    /// Run init steps only
    Init,

    /// Print the current boot status; exit code reflects readiness
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Print the published environment
    Env {
        #[arg(long)]
        json: bool,
    },

    /// Run a command with the published environment
    Exec {
        #[arg(trailing_var_arg = true, required = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("podboot: {:#}", e);
            e.downcast_ref::<podboot::PodbootError>()
                .map(exit_code_for_error)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

fn load_config(cli: &Cli) -> anyhow::Result<BootConfig> {
    let mut config = BootConfig::load(cli.config.as_deref())?;
    if let Some(state_dir) = &cli.state_dir {
        config.state_dir = state_dir.clone();
    }
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    match &cli.cmd {
        Command::Run | Command::Init => {
            let config = load_config(&cli)?;
            let _guard = init_logging(config.log_to_file.then(|| config.logs_dir()).as_deref());
            let process_env: BTreeMap<String, String> = std::env::vars().collect();
            let bootstrap = Bootstrap::new(config, process_env);
            let init_only = matches!(cli.cmd, Command::Init);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            let outcome = runtime.block_on(async {
                if init_only {
                    bootstrap.init_only(shutdown_signal()).await
                } else {
                    bootstrap.run(shutdown_signal()).await
                }
            })?;
            tracing::info!(outcome = ?outcome, "podboot exiting");
            Ok(outcome.exit_code())
        }
        Command::Status { json } => {
            let _guard = init_logging(None);
            let config = load_config(&cli)?;
            let report = StatusReport::load(&config.state_dir)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} (boot {}, {})",
                    report.status.as_str(),
                    report.boot_id,
                    if report.healthy { "healthy" } else { "unhealthy" }
                );
                if let Some(failure) = &report.failure {
                    println!("failure: {}", failure);
                }
                for (name, service) in &report.services {
                    println!(
                        "  {:<16} {:?} restarts={} ready={}",
                        name, service.phase, service.restarts, service.ready
                    );
                }
            }
            Ok(match (report.status, report.healthy) {
                (BootStatus::Ready, true) => 0,
                (BootStatus::Failed, _) => 2,
                (BootStatus::StartingServices, false) => 3,
                _ => 1,
            })
        }
        Command::Env { json } => {
            let _guard = init_logging(None);
            let config = load_config(&cli)?;
            let published = PublishedEnvironment::load_from_dir(&config.state_dir)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&published)?);
            } else {
                for (key, value) in published.to_env(&config.base_path) {
                    println!("{}={}", key, value);
                }
            }
            Ok(0)
        }
        Command::Exec { command } => {
            let _guard = init_logging(None);
            let config = load_config(&cli)?;
            let published = PublishedEnvironment::load_from_dir(&config.state_dir)?;
            let (program, args) = command
                .split_first()
                .context("no command given")?;

            let mut child = std::process::Command::new(program);
            child.args(args).env_clear().envs(published.to_env(&config.base_path));
            if !published.vars.contains_key("HOME") {
                child.env("HOME", &config.home_dir);
            }
            // Only returns on failure.
            let err = child.exec();
            Err(anyhow::Error::new(err).context(format!("Failed to exec {}", program)))
        }
    }
}
