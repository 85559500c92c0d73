mod cli;
mod config_cmd;
mod doctor;
mod logging;

use std::collections::HashMap;

use clap::Parser;

use cli::{Cli, Command, ConfigCommand};
use cm_lifecycle::controller::LifecycleController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = Cli::parse();

    match parsed.command {
        // `run` is the functionally default subcommand, but it always needs
        // a program to spawn, so there's no sensible zero-argument default
        // the way the teacher's `serve` has.
        None => {
            anyhow::bail!("no assistant program given; usage: cm run [--agent NAME] <program> [args...]")
        }
        Some(Command::Run { agent, program, args }) => {
            let (config, _path) = cli::load_config()?;
            logging::init(std::path::Path::new(&config.data_root));
            tracing::info!(agent = %agent, program = %program, "codemie-core starting");

            let controller = LifecycleController::new(config);
            let outcome = controller.run(&program, args, &agent, HashMap::new()).await?;
            std::process::exit(outcome.exit_code);
        }
        Some(Command::Doctor) => {
            let (config, path) = cli::load_config()?;
            let passed = doctor::run(&config, &path);
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config()?;
            if !config_cmd::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config()?;
            config_cmd::show(&config);
            Ok(())
        }
    }
}
