use std::process::ExitCode;

use clap::{CommandFactory, FromArgMatches, Parser};
use log::debug;

use oi::config_file::DEFAULT_CONFIG_PATH;
use oi::registry::StaticPlugins;

#[derive(Parser, Debug)]
#[command(name = "oi", version, about = "Extensible command runner")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Path to the JSON config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override a config entry for this run
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    set: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Logging has to be up before modules are resolved, so look for the flag ahead of parsing
    let debug = std::env::args().any(|arg| arg == "-d" || arg == "--debug");
    oi::logger::init(debug)?;

    let registry = oi::build_registry(&StaticPlugins::default())?;
    let matches = registry
        .register_all_commands(Cli::command())?
        .subcommand_required(true)
        .arg_required_else_help(true)
        .get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let options = oi::load_options(&cli.config, &cli.set)?;
    debug!("Invoking with options {options:?}");
    let outcome = registry.dispatch(&matches, options)?;

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
