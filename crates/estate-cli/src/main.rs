//! CLI entrypoint (spec §4.10, §4.11, §6 "Exit codes"): a one-shot `run`
//! that writes a single `data/latest.json` and exits, a `serve` that hosts
//! the background [`estate_scheduler::Scheduler`] behind the Control API,
//! and a `validate` that loads every `configs/*.yaml` without running the
//! pipeline. Mirrors `shipper-cli`'s shape: `clap` derive,
//! `anyhow::Result` at the boundary, plain `eprintln!` progress lines.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use estate::PipelineConfig;
use estate_credentials::Credentials;

#[derive(Parser, Debug)]
#[command(name = "estate", version)]
#[command(about = "Periodic operational snapshot pipeline over VCS, CI, monitoring and tracker integrations")]
struct Cli {
    /// Directory containing one `*.yaml` file per project (spec §6).
    #[arg(long, default_value = "configs")]
    configs_dir: PathBuf,

    /// Directory for `latest.json`, history and scheduler state (spec §6).
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline once and exit (spec §6 "Exit codes").
    Run,
    /// Start the background scheduler and the read-only Control API (spec §4.10, §4.11).
    Serve {
        /// Address to bind the Control API to.
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
        /// Scheduler cadence in minutes (spec §4.10 default 30).
        #[arg(long, default_value_t = estate_scheduler::DEFAULT_INTERVAL_MINUTES)]
        interval_minutes: u32,
    },
    /// Load and validate every project config without fetching anything.
    Validate,
}

fn init_tracing() {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    let is_tty = std::io::stderr().is_terminal();
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if is_tty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.cmd {
        Commands::Run => run_once_cmd(&cli.configs_dir, &cli.data_dir),
        Commands::Serve { bind, interval_minutes } => serve_cmd(cli.configs_dir, cli.data_dir, bind, interval_minutes),
        Commands::Validate => validate_cmd(&cli.configs_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "estate run failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_once_cmd(configs_dir: &PathBuf, data_dir: &PathBuf) -> Result<()> {
    let cfg = PipelineConfig::from_env(configs_dir.clone(), data_dir.clone());
    let snapshot = estate::run_once(&cfg).map_err(|e| anyhow::anyhow!(e))?;
    let projects = snapshot.projects.len();
    let warnings = snapshot.warnings.len();
    tracing::info!(projects, warnings, generated_at = %snapshot.generated_at, "snapshot written");
    println!("wrote {} ({projects} project(s), {warnings} warning(s))", data_dir.join("latest.json").display());
    Ok(())
}

fn serve_cmd(configs_dir: PathBuf, data_dir: PathBuf, bind: String, interval_minutes: u32) -> Result<()> {
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let credentials = Credentials::from_env();
    let pipeline_cfg = Arc::new(PipelineConfig::from_env(configs_dir.clone(), data_dir.clone()));
    let run_pipeline = estate::scheduler_closure(pipeline_cfg);

    let scheduler = Arc::new(estate_scheduler::Scheduler::new(data_dir.clone(), interval_minutes, run_pipeline));
    scheduler.start();

    let state = estate_api::AppState::new(Arc::clone(&scheduler), configs_dir, credentials);
    let router = estate_api::build_router(state);

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("building tokio runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("binding {bind}"))?;
        tracing::info!(%bind, interval_minutes, "control API listening");
        axum::serve(listener, router).await.context("serving control API")?;
        Ok::<(), anyhow::Error>(())
    })?;

    scheduler.stop();
    Ok(())
}

fn validate_cmd(configs_dir: &PathBuf) -> Result<()> {
    let configs = estate_config::load_all(configs_dir).map_err(|e| anyhow::anyhow!(e))?;
    for cfg in &configs {
        println!(
            "{}: {} environment(s), {} service(s)",
            cfg.project.key,
            cfg.environments.len(),
            cfg.services.len()
        );
    }
    println!("{} project config(s) valid", configs.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn validate_reports_loaded_projects() {
        let td = TempDir::new().unwrap();
        std::fs::create_dir_all(td.path()).unwrap();
        std::fs::write(
            td.path().join("acme.yaml"),
            r#"
project:
  key: acme
  name: Acme
  githubOwner: acme-corp
environments:
  - key: qa
    name: QA
services:
  - key: web
    codeRepo: web
    infraRepo: web-infra
"#,
        )
        .unwrap();

        let configs = estate_config::load_all(td.path()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].project.key, "acme");
    }

    #[test]
    #[serial]
    fn run_once_cmd_propagates_fatal_config_error() {
        temp_env::with_var("GITHUB_TOKEN", Some("ghp_xxx"), || {
            let td = TempDir::new().unwrap();
            let err = run_once_cmd(&td.path().join("nonexistent"), &td.path().join("data")).unwrap_err();
            assert!(err.to_string().contains("configuration error"));
        });
    }
}
