//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand};

/// Career concierge CLI
#[derive(Parser)]
#[command(name = "concierge-cli")]
#[command(about = "Career coaching concierge over a closed agent set")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process one request for a student
    Ask {
        /// Student identifier (memory partition key)
        #[arg(short, long)]
        student: String,
        /// The request text
        query: String,
        /// Optional structured inputs as JSON, e.g. '{"resume": "..."}'
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Show a student's profile, summary, and recent interactions
    History {
        /// Student identifier
        #[arg(short, long)]
        student: String,
        /// How many recent interactions to show
        #[arg(short, long, default_value_t = 10)]
        window: usize,
    },
}
