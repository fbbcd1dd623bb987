//! Line-oriented review loop over the content pipeline.
//!
//! Each stdin line is one reviewer turn. Stage outputs and the next prompt
//! go to stdout; diagnostics go to stderr (see `RUST_LOG`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tsuzuri::collaborators::{CommandGenerator, DirectoryScanner, EchoGenerator, FileExporter};
use tsuzuri::config::{load_config, PipelineConfig};
use tsuzuri::pipeline::content_pipeline;
use tsuzuri::{logging, Generator, Orchestrator, RunSnapshot, RunStatus, TurnReport};

#[derive(Parser)]
#[command(
    name = "tsuzuri",
    version,
    about = "Write with generated drafts and human review checkpoints"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start or resume a run, reading reviewer turns from stdin.
    Run {
        /// Pipeline config (TOML). Defaults apply if the file is missing.
        #[arg(short, long, default_value = "tsuzuri.toml")]
        config: PathBuf,
        /// Resume from a saved snapshot.
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Save the run here after every turn.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Validate the config and print the effective settings.
    CheckConfig {
        #[arg(short, long, default_value = "tsuzuri.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            resume,
            snapshot,
        } => cmd_run(&config, resume.as_deref(), snapshot.as_deref()).await,
        Command::CheckConfig { config } => cmd_check_config(&config),
    }
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = load_config(path).with_context(|| format!("load {}", path.display()))?;
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn cmd_run(config_path: &Path, resume: Option<&Path>, snapshot: Option<&Path>) -> Result<()> {
    let config =
        load_config(config_path).with_context(|| format!("load {}", config_path.display()))?;
    let definition = Arc::new(
        content_pipeline(
            &config,
            generator(&config)?,
            Arc::new(DirectoryScanner::new()),
            Arc::new(FileExporter::new(&config.export_dir)),
        )
        .context("build pipeline")?,
    );

    let mut run = match resume {
        Some(path) => {
            let saved = RunSnapshot::load(path)
                .await
                .with_context(|| format!("resume from {}", path.display()))?;
            Orchestrator::resume(definition, saved)?
        }
        None => Orchestrator::new(definition),
    };

    match run.prompt() {
        Some(prompt) => println!("{}", prompt),
        None => {
            println!("Run is already {}.", run.status());
            return Ok(());
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let report = run.handle_turn(&line).await?;
        print_report(&report);
        if let Some(path) = snapshot {
            run.snapshot()
                .save(path)
                .await
                .with_context(|| format!("save snapshot {}", path.display()))?;
        }
        if report.status != RunStatus::AwaitingInput {
            break;
        }
    }
    Ok(())
}

fn generator(config: &PipelineConfig) -> Result<Arc<dyn Generator>> {
    if config.generator.command.is_empty() {
        return Ok(Arc::new(EchoGenerator));
    }
    let command = CommandGenerator::from_argv(&config.generator.command)?;
    Ok(Arc::new(command))
}

fn print_report(report: &TurnReport) {
    for output in &report.outputs {
        println!("{}\n", output);
    }
    if let Some(reason) = &report.reprompt {
        println!("Not understood: {}", reason);
    }
    if let Some(error) = &report.error {
        println!("Failed: {}", error);
    }
    match report.status {
        RunStatus::AwaitingInput => {
            if let Some(prompt) = &report.prompt {
                println!("{}", prompt);
            }
        }
        RunStatus::Completed => println!("Done."),
        RunStatus::Cancelled => println!("Cancelled; nothing was kept."),
    }
}
