pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "autoquote",
    about = "Carrier quote automation operator CLI",
    long_about = "Route, execute, and audit carrier portal quote jobs across the browser agent and RPA backends.",
    after_help = "Examples:\n  autoquote doctor --json\n  autoquote route progressive --samples 1000 --seed 7\n  autoquote run --carrier progressive --input job.json\n  autoquote report --carrier progressive"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, runner prerequisites, RPA credentials, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Dry-run the routing decision for a carrier without executing anything")]
    Route {
        #[arg(help = "Carrier code, e.g. progressive")]
        carrier: String,
        #[arg(long, default_value_t = 1, help = "Number of routing draws to tally")]
        samples: u32,
        #[arg(long, help = "Seed for reproducible A/B draws")]
        seed: Option<u64>,
    },
    #[command(about = "Execute one quote job end to end and print the result as JSON")]
    Run {
        #[arg(long, help = "Carrier code, e.g. progressive")]
        carrier: String,
        #[arg(long, help = "Path to a JSON file with the client data")]
        input: PathBuf,
        #[arg(long, help = "Force an agent (browser_use|skyvern), bypassing the A/B split")]
        agent: Option<String>,
        #[arg(long, help = "Job id to use instead of a generated one")]
        job_id: Option<String>,
    },
    #[command(about = "Summarize recorded assignments by agent and A/B cohort")]
    Report {
        #[arg(long, help = "Restrict the summary to one carrier")]
        carrier: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Migrate => commands::migrate::run(),
        Command::Route { carrier, samples, seed } => {
            commands::route::run(&carrier, samples, seed)
        }
        Command::Run { carrier, input, agent, job_id } => {
            commands::run::run(commands::run::RunArgs { carrier, input, agent, job_id })
        }
        Command::Report { carrier } => commands::report::run(carrier.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
