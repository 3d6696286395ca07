// FILE: crates/cli/src/main.rs

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use cloudsync_config::ConfigManager;
use std::path::PathBuf;

mod commands;

fn build_cli() -> Command {
    Command::new("cloudsync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Keeps watched state, resume points and favorites in sync across Kodi devices")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the config file")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log at debug level")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("init").about("Write a default config file with a new device id"))
        .subcommand(Command::new("sync").about("Run one snapshot sync cycle and exit"))
        .subcommand(Command::new("run").about("Run the sync service until interrupted"))
        .subcommand(Command::new("status").about("Show local store, tracker and peer state"))
        .subcommand(Command::new("check").about("Check that the host, storage and config are usable"))
        .subcommand(
            Command::new("publish-favorites")
                .about("Announce every local favorite to the other devices")
                .arg(
                    Arg::new("wait")
                        .short('w')
                        .long("wait")
                        .value_name("SECONDS")
                        .help("How long to wait for the broker connection")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                ),
        )
        .subcommand(
            Command::new("remove-favorite")
                .about("Remove a favorite on this device only")
                .arg(Arg::new("title").required(true).value_name("TITLE").help("Favorite title")),
        )
        .subcommand(
            Command::new("config")
                .about("Inspect or reset the configuration")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Print the effective configuration"))
                .subcommand(Command::new("path").about("Print the config file location"))
                .subcommand(Command::new("reset").about("Restore defaults, keeping the device id")),
        )
}

fn config_manager(path: Option<&String>) -> Result<ConfigManager> {
    let manager = match path {
        Some(path) => ConfigManager::with_file(&PathBuf::from(path)),
        None => ConfigManager::new(),
    };
    manager.context("Failed to resolve the config location")
}

fn init_logging(manager: &ConfigManager, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        manager.load_or_default().app.log_level.to_string()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let manager = config_manager(matches.get_one::<String>("config"))?;
    init_logging(&manager, matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("init", _)) => commands::init(&manager),
        Some(("sync", _)) => commands::sync_once(&manager).await,
        Some(("run", _)) => commands::run_service(&manager).await,
        Some(("status", _)) => commands::show_status(&manager).await,
        Some(("check", _)) => commands::check(&manager).await,
        Some(("publish-favorites", sub_matches)) => {
            let wait = sub_matches.get_one::<u64>("wait").copied().unwrap_or(10);
            commands::publish_favorites(&manager, wait).await
        }
        Some(("remove-favorite", sub_matches)) => {
            let title = sub_matches
                .get_one::<String>("title")
                .ok_or_else(|| anyhow::anyhow!("Favorite title is required"))?;
            commands::remove_favorite(&manager, title).await
        }
        Some(("config", sub_matches)) => match sub_matches.subcommand() {
            Some(("show", _)) => commands::show_config(&manager),
            Some(("path", _)) => {
                println!("{}", manager.config_path().display());
                Ok(())
            }
            Some(("reset", _)) => commands::reset_config(&manager),
            _ => Ok(()),
        },
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}
