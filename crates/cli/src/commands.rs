// FILE: crates/cli/src/commands.rs

use anyhow::{bail, Context, Result};
use cloudsync_config::{CloudProvider, Config, ConfigManager};
use cloudsync_core::transport::SNAPSHOT_NAME;
use cloudsync_core::MediaHost;
use cloudsync_network::{DropboxSettings, DropboxStorage};
use cloudsync_sync_engine::{
    build_host, build_storage, ServiceStatus, SyncOutcome, SyncReport, SyncService,
};
use console::style;
use std::time::Duration;
use tokio::sync::watch;

const MASK: &str = "********";

/// Write a default config file
pub fn init(manager: &ConfigManager) -> Result<()> {
    let path = manager.config_path().display().to_string();
    if !manager.initialize().context("Failed to write the config file")? {
        println!("Config already exists at {}", path);
        return Ok(());
    }

    let config = manager.load().context("Failed to read the new config file")?;
    println!("{} Created {}", style("✓").green().bold(), path);
    println!("  Device id: {}", config.device.device_id);
    println!("  Fill in the [host], [cloud] and [broker] sections, then run 'cloudsync check'.");
    Ok(())
}

/// Run one snapshot cycle
pub async fn sync_once(manager: &ConfigManager) -> Result<()> {
    let service = start_service(manager).await?;
    match service.sync_now().await {
        SyncOutcome::Completed(report) => {
            print_report(&report);
            if !report.is_clean() {
                bail!("Sync finished with {} error(s)", report.errors.len());
            }
        }
        SyncOutcome::Skipped => println!("A sync is already running"),
    }
    Ok(())
}

/// Run the service until Ctrl-C
pub async fn run_service(manager: &ConfigManager) -> Result<()> {
    let service = start_service(manager).await?;
    let (stop, stopped) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Interrupt received, shutting down");
                let _ = stop.send(true);
            }
            Err(e) => {
                log::error!("Cannot listen for Ctrl-C: {}", e);
                // keep the sender alive so the service is not stopped
                std::future::pending::<()>().await;
            }
        }
    });

    service.run(stopped).await.context("Sync service failed")
}

/// Print the local state
pub async fn show_status(manager: &ConfigManager) -> Result<()> {
    let service = start_service(manager).await?;
    let status = service.status().await.context("Failed to read sync status")?;
    print_status(&status);
    Ok(())
}

/// Connect to the broker once and republish every favorite
pub async fn publish_favorites(manager: &ConfigManager, wait_secs: u64) -> Result<()> {
    let service = start_service(manager).await?;
    let published = service
        .publish_favorites(Duration::from_secs(wait_secs))
        .await
        .context("Failed to publish favorites")?;
    println!("{} Published {} favorite(s)", style("✓").green().bold(), published);
    Ok(())
}

/// Remove a favorite on this device
pub async fn remove_favorite(manager: &ConfigManager, title: &str) -> Result<()> {
    let service = start_service(manager).await?;
    if service
        .remove_favorite(title)
        .await
        .context("Failed to remove favorite")?
    {
        println!("{} Removed '{}'", style("✓").green().bold(), title);
    } else {
        println!("No favorite titled '{}'", title);
    }
    Ok(())
}

/// Probe every configured collaborator
pub async fn check(manager: &ConfigManager) -> Result<()> {
    let config = manager
        .load_with_device_id()
        .context("Failed to load the configuration")?;
    let mut failures = 0;

    match config.validate() {
        Ok(()) => passed("config", manager.config_path().display()),
        Err(errors) => {
            for error in errors {
                failed("config", error);
                failures += 1;
            }
        }
    }

    let host = build_host(&config).context("Invalid host settings")?;
    match host.ping().await {
        Ok(()) => passed("host", &config.host.rpc_url),
        Err(e) => {
            failed("host", e);
            failures += 1;
        }
    }
    match host.probe_paths().await {
        Ok(paths) => passed("userdata", paths.userdata_dir.display()),
        Err(e) => {
            failed("userdata", e);
            failures += 1;
        }
    }

    if !config.cloud.enabled {
        skipped("cloud", "disabled");
    } else {
        failures += check_cloud(&config).await;
    }

    if config.broker.enabled {
        passed(
            "broker",
            format!(
                "{}:{} (connected by 'run' and 'publish-favorites')",
                config.broker.host, config.broker.port
            ),
        );
    } else {
        skipped("broker", "disabled");
    }

    if failures > 0 {
        bail!("{} check(s) failed", failures);
    }
    Ok(())
}

async fn check_cloud(config: &Config) -> usize {
    let mut failures = 0;
    if config.cloud.provider == CloudProvider::Dropbox {
        let settings = DropboxSettings::new(config.cloud.access_token.trim(), &config.cloud.folder);
        match DropboxStorage::new(settings) {
            Ok(dropbox) => match dropbox.account_name().await {
                Ok(name) => passed("dropbox", format!("signed in as {}", name)),
                Err(e) => {
                    failed("dropbox", e);
                    failures += 1;
                }
            },
            Err(e) => {
                failed("dropbox", e);
                failures += 1;
            }
        }
    }

    match build_storage(config) {
        Ok(Some(storage)) => {
            if storage.create_folder().await {
                passed("storage", format!("{} {}", storage.provider(), config.cloud.folder));
                if storage.exists(SNAPSHOT_NAME).await {
                    passed("snapshot", "present");
                } else {
                    skipped("snapshot", "none yet; the first sync uploads it");
                }
            } else {
                failed("storage", format!("cannot create {}", config.cloud.folder));
                failures += 1;
            }
        }
        Ok(None) => skipped("storage", "disabled"),
        Err(e) => {
            failed("storage", e);
            failures += 1;
        }
    }
    failures
}

/// Print the configuration with secrets masked
pub fn show_config(manager: &ConfigManager) -> Result<()> {
    let config = manager
        .load_with_env_overrides()
        .context("Failed to load the configuration")?;
    println!("# {}", manager.config_path().display());
    println!("{}", render_config(&config)?);
    Ok(())
}

pub fn reset_config(manager: &ConfigManager) -> Result<()> {
    manager.reset().context("Failed to reset the configuration")?;
    println!(
        "{} Restored defaults in {}",
        style("✓").green().bold(),
        manager.config_path().display()
    );
    Ok(())
}

fn render_config(config: &Config) -> Result<String> {
    toml::to_string_pretty(&redact(config)).context("Failed to render the configuration")
}

/// Copy of `config` with credentials replaced
fn redact(config: &Config) -> Config {
    let mut config = config.clone();
    for secret in [
        &mut config.cloud.access_token,
        &mut config.broker.password,
        &mut config.host.password,
    ] {
        if !secret.is_empty() {
            *secret = MASK.to_string();
        }
    }
    config
}

async fn start_service(manager: &ConfigManager) -> Result<SyncService> {
    let config = load_config(manager)?;
    let data_dir = manager
        .data_dir(&config)
        .context("Failed to resolve the data directory")?;
    let service = SyncService::build(&config, data_dir)
        .await
        .context("Failed to start the sync service")?;
    Ok(service.reload_from(manager.clone()))
}

fn load_config(manager: &ConfigManager) -> Result<Config> {
    let config = manager
        .load_with_device_id()
        .context("Failed to load the configuration")?;
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("{} {}", style("config:").yellow().bold(), error);
        }
        bail!(
            "The configuration has {} problem(s); fix {}",
            errors.len(),
            manager.config_path().display()
        );
    }
    Ok(config)
}

fn print_report(report: &SyncReport) {
    println!("\n{}", style("Sync Report").bold().cyan());
    println!("{}", "=".repeat(60));
    println!("  Remote snapshot: {}", if report.remote_found { "found" } else { "none" });
    println!("  Merged:          {} watched, {} resume", report.merged_watched, report.merged_resume);
    println!("  Pulled:          {} watched, {} resume", report.pulled_watched, report.pulled_resume);
    println!("  Pushed to host:  {} watched, {} resume", report.pushed_watched, report.pushed_resume);
    println!("  Files:           {} up, {} down", report.files_uploaded, report.files_downloaded);
    println!("  Snapshot upload: {}", if report.snapshot_uploaded { "yes" } else { "no" });
    for error in &report.errors {
        println!("  {} {}", style("error:").red().bold(), error);
    }
}

fn print_status(status: &ServiceStatus) {
    println!("\n{} {}", style("Device").bold().cyan(), status.device_id);
    println!("{}", "=".repeat(60));
    println!("  Phase:          {}", status.phase);
    println!("  Watched rows:   {}", status.watched_rows);
    println!("  Resume rows:    {}", status.resume_rows);
    println!("  Waiting for host: {}", status.pending_host_rows);
    println!("  Tracked files:  {}", status.tracked.total);
    for (category, count) in &status.tracked.by_category {
        println!("    {}: {}", category, count);
    }
    println!("  Conflicts:      {}", status.conflicts.total);
    println!(
        "  Broker:         {}",
        if status.broker_connected { "connected" } else { "not connected" }
    );
    for peer in &status.peers {
        println!("    {} ({}) {:?}", peer.device_id, peer.name, peer.status);
    }
    if status.store_recreated {
        println!(
            "  {} the local store was corrupt and has been recreated",
            style("warning:").yellow().bold()
        );
    }
}

fn passed(label: &str, detail: impl std::fmt::Display) {
    println!("{} {:<9} {}", style("✓").green().bold(), label, detail);
}

fn failed(label: &str, detail: impl std::fmt::Display) {
    println!("{} {:<9} {}", style("✗").red().bold(), label, detail);
}

fn skipped(label: &str, detail: impl std::fmt::Display) {
    println!("{} {:<9} {}", style("-").dim(), label, detail);
}

#[cfg(test)]
mod tests;
