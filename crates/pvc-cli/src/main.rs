//! `pvc`: drive the prompt release pipeline from the command line

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use pvc_lineage::{diff_prompt_content, render_diff};
use pvc_release::ReleaseConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod simulate;

use simulate::{run_simulation, SimulationOptions};

fn cli() -> Command {
    Command::new("pvc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Prompt version control and release pipeline")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run an end-to-end release scenario against the in-memory store")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML or YAML release configuration"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducible metrics"),
                )
                .arg(
                    Arg::new("regress")
                        .long("regress")
                        .action(ArgAction::SetTrue)
                        .help("Degrade metrics after the second deployment"),
                ),
        )
        .subcommand(
            Command::new("diff")
                .about("Line diff of two prompt files")
                .arg(Arg::new("old").required(true).value_parser(value_parser!(PathBuf)))
                .arg(Arg::new("new").required(true).value_parser(value_parser!(PathBuf))),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a release configuration")
                .arg(Arg::new("file").required(true).value_parser(value_parser!(PathBuf))),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = match args.get_one::<PathBuf>("config") {
                Some(path) => ReleaseConfig::from_path(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ReleaseConfig::default(),
            };
            let options = SimulationOptions {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                regress: args.get_flag("regress"),
                config,
            };
            let summary = run_simulation(options).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some(("diff", args)) => {
            let (Some(old), Some(new)) = (
                args.get_one::<PathBuf>("old"),
                args.get_one::<PathBuf>("new"),
            ) else {
                anyhow::bail!("diff needs two files");
            };
            let spans = diff_prompt_content(&read(old)?, &read(new)?);
            print!("{}", render_diff(&spans));
        }
        Some(("check-config", args)) => {
            let Some(path) = args.get_one::<PathBuf>("file") else {
                anyhow::bail!("check-config needs a file");
            };
            let config = ReleaseConfig::from_path(path)
                .with_context(|| format!("loading {}", path.display()))?;
            tracing::info!("{} is valid", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Some((other, _)) => anyhow::bail!("unknown command {other}"),
        None => anyhow::bail!("no command given"),
    }
    Ok(())
}
