pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Inspect configuration, apply migrations, and run conversation turns locally.",
    after_help = "Examples:\n  parley config\n  parley migrate\n  parley chat --session demo \"what's the weather in Toronto?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Run one conversation turn against the configured session store")]
    Chat {
        #[arg(long, help = "Session identifier; reuse it to continue a conversation")]
        session: String,
        #[arg(help = "User message for this turn")]
        message: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Chat { session, message } => commands::chat::run(&session, &message),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
