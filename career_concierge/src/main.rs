//! Main entry point for the career concierge CLI.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use career_concierge::{cli, coordinator::Coordinator, settings::Settings, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let settings = Settings::load()?;

    telemetry::init(&settings.logging, settings.otlp_endpoint.as_deref())?;

    let coordinator = Coordinator::offline(&settings)?;

    match args.command {
        cli::Commands::Ask { student, query, input } => {
            let extra = match input {
                Some(raw) => {
                    serde_json::from_str(&raw).context("--input is not valid JSON")?
                }
                None => Value::Null,
            };
            let response = coordinator.process(&student, &query, extra).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        cli::Commands::History { student, window } => {
            let context = coordinator.context(&student, window)?;
            println!("{}", serde_json::to_string_pretty(&context)?);
        }
    }

    Ok(())
}
