pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use skillrelay_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "skillrelay",
    about = "skillrelay operator CLI",
    long_about = "Inspect configuration, validate the skill registry, and manage the correlation store.",
    after_help = "Examples:\n  skillrelay doctor --json\n  skillrelay skills\n  skillrelay --config ./skillrelay.toml migrate"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of ./skillrelay.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending correlation store migrations")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, skill registry, auth setup, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Build the skill registry and report intent-to-skill routing")]
    Skills,
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config.clone(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Skills => commands::skills::run(options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(options, json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
