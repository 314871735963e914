mod auth;
mod cli;
mod commands;
mod config;
mod desired;
mod observability;
mod output;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, OutputFormat};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing(&cli.log_level);

    let profile = &cli.profile;
    let format = resolve_format(&cli)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping before the next remote call");
            on_signal.cancel();
        }
    });

    match &cli.command {
        Commands::Plan(args) => {
            let settings = config::load_settings(&cli)?;
            commands::reconcile::plan(&settings, &args.file, cancel, format).await?;
        }
        Commands::Apply(args) => {
            let mut settings = config::load_settings(&cli)?;
            if args.prune {
                settings.reconcile.prune_detached_credentials = true;
            }
            let timeout = args.timeout_secs.map(Duration::from_secs);
            commands::reconcile::apply(&settings, &args.desired.file, cancel, timeout, format)
                .await?;
        }
        Commands::Show(args) => {
            let settings = config::load_settings(&cli)?;
            commands::reconcile::show(&settings, &args.client_id, cancel, format).await?;
        }
        Commands::Teardown(args) => {
            let settings = config::load_settings(&cli)?;
            commands::reconcile::teardown(&settings, &args.client_id, args.yes, cancel, format)
                .await?;
        }
        Commands::Login(args) => {
            let server = config::resolve_server(cli.server.as_deref(), profile)?;
            commands::auth::login(&server, args, profile)?;
        }
        Commands::Logout => {
            commands::auth::logout(profile)?;
        }
        Commands::Config(args) => match &args.command {
            cli::ConfigCommands::Show => {
                let cfg = config::load_profile(profile)?;
                println!("{}: {}", "Profile".cyan(), profile);
                println!(
                    "{}: {}",
                    "Server".cyan(),
                    cfg.server.as_deref().unwrap_or("(not set)")
                );
                println!(
                    "{}: {}",
                    "Format".cyan(),
                    cfg.format.as_deref().unwrap_or("table")
                );
                println!("{}: {}", "Prune".cyan(), cfg.prune.unwrap_or(false));
                let token = auth::load_token(profile)?;
                println!(
                    "{}: {}",
                    "Token".cyan(),
                    token.map_or_else(|| "(not set)".to_string(), |t| t.masked())
                );
            }
            cli::ConfigCommands::Set(set_args) => {
                let mut cfg = config::load_profile(profile)?;
                match set_args.key.as_str() {
                    "server" => cfg.server = Some(set_args.value.clone()),
                    "format" => {
                        parse_format(&set_args.value)?;
                        cfg.format = Some(set_args.value.clone());
                    }
                    "prune" => {
                        let prune = set_args.value.parse::<bool>().map_err(|_| {
                            anyhow::anyhow!("prune must be true or false, got {}", set_args.value)
                        })?;
                        cfg.prune = Some(prune);
                    }
                    other => {
                        anyhow::bail!("Unknown config key: {other}. Valid keys: server, format, prune")
                    }
                }
                config::save_profile(profile, &cfg)?;
                output::print_success(&format!("Set {} = {}", set_args.key, set_args.value));
            }
        },
    }

    Ok(())
}

fn resolve_format(cli: &Cli) -> Result<OutputFormat> {
    if let Some(format) = cli.format {
        return Ok(format);
    }
    match config::load_profile(&cli.profile)?.format {
        Some(format) => parse_format(&format),
        None => Ok(OutputFormat::default()),
    }
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    match value {
        "table" => Ok(OutputFormat::Table),
        "json" => Ok(OutputFormat::Json),
        other => anyhow::bail!("Unknown format: {other}. Valid formats: table, json"),
    }
}
