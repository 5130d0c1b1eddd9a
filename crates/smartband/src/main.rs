//! `smartband` - CLI for the wearable health and fall monitor
//!
//! Runs the monitor loop with its dashboard and alert dispatcher, replays
//! recorded traces through the classifier and inspects the event journal.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{info, warn};

use smartband::alert::{spawn_dispatcher, AlertDispatcher};
use smartband::cli::{
    Cli, Command, ConfigCommand, HistoryCommand, ReplayCommand, RunCommand, StatusCommand,
};
use smartband::monitor::{self, Monitor, Transition};
use smartband::sensors::ReplaySensors;
use smartband::{classifier, init_logging, server, Config, Journal, SharedTelemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    // `config validate` reports load errors itself.
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        handle_validate(file.clone().or_else(|| cli.config.clone()))?;
        return Ok(());
    }

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Run(cmd) => handle_run(config, cmd).await?,
        Command::Replay(cmd) => handle_replay(&config, &cmd)?,
        Command::History(cmd) => handle_history(&config, &cmd)?,
        Command::Status(cmd) => handle_status(&config, &cmd)?,
        Command::Config(cmd) => handle_config(&config, cmd)?,
    }
    Ok(())
}

async fn handle_run(config: Config, cmd: RunCommand) -> anyhow::Result<()> {
    let Some(trace) = &cmd.trace else {
        bail!("no sensor drivers on this host; use --trace FILE to replay a recording");
    };
    let replay = ReplaySensors::load(trace)
        .with_context(|| format!("failed to load trace {}", trace.display()))?;
    if replay.is_empty() {
        bail!("trace {} has no frames", trace.display());
    }
    let frame_count = u64::try_from(replay.len()).unwrap_or(u64::MAX);
    info!(frames = frame_count, looping = cmd.loop_trace, "Loaded trace");

    let telemetry = SharedTelemetry::new(config.default_location());
    let mut monitor = Monitor::new(&config, replay.into_suite(cmd.loop_trace), telemetry.clone());
    if !cmd.loop_trace {
        monitor = monitor.with_max_ticks(frame_count);
    }

    if config.storage.journal_enabled {
        match Journal::open(&config.database_path()) {
            Ok(journal) => {
                let max_age = config
                    .max_age()
                    .and_then(|age| chrono::Duration::from_std(age).ok());
                if let Some(age) = max_age {
                    if let Err(e) = journal.prune_older_than(age) {
                        warn!(error = %e, "Failed to prune journal");
                    }
                }
                monitor = monitor.with_journal(journal);
            }
            Err(e) => warn!(error = %e, "Journal unavailable, continuing without it"),
        }
    }

    if config.relay.enabled {
        let dispatcher = AlertDispatcher::from_config(&config.relay)
            .context("failed to set up notification relay")?;
        monitor = monitor.with_alerts(spawn_dispatcher(dispatcher));
    } else {
        info!("Notification relay disabled, confirmed falls are only logged");
    }

    let bind = cmd.bind.unwrap_or_else(|| config.network.bind_address.clone());
    let listener = server::bind(&bind).await?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server::serve(listener, telemetry, async move {
        let _ = shutdown_rx.await;
    }));

    let stop = monitor.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            stop.stop();
        }
    });

    monitor.run().await;

    let _ = shutdown_tx.send(());
    server_task.await.context("dashboard task failed")??;

    let stats = monitor.stats();
    println!(
        "Processed {} ticks: {} fall episode(s), {} alert(s) sent, {} sensor error(s)",
        stats.ticks, stats.episodes, stats.alerts_sent, stats.sensor_errors
    );
    Ok(())
}

fn handle_replay(config: &Config, cmd: &ReplayCommand) -> anyhow::Result<()> {
    let replay = ReplaySensors::load(&cmd.file)
        .with_context(|| format!("failed to load trace {}", cmd.file.display()))?;
    let mut detector = classifier::from_config(&config.classifier);
    let report = monitor::replay(replay.frames(), detector.as_mut());

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Replaying {} ({} policy)",
        cmd.file.display(),
        config.classifier.policy
    );
    for transition in &report.transitions {
        println!("{}", format_transition(transition));
    }
    println!(
        "{} frames, {} with motion, {} fall episode(s)",
        report.frames, report.motion_frames, report.episodes
    );
    Ok(())
}

fn format_transition(transition: &Transition) -> String {
    #[allow(clippy::cast_precision_loss)]
    let seconds = transition.t_ms as f64 / 1000.0;
    let event = match transition.event {
        Some(smartband::FallEvent::Confirmed { .. }) => "  <- fall confirmed",
        Some(smartband::FallEvent::Cleared { .. }) => "  <- cleared",
        None => "",
    };
    format!("{seconds:>9.3}s  {}{event}", transition.state)
}

fn handle_history(config: &Config, cmd: &HistoryCommand) -> anyhow::Result<()> {
    let path = config.database_path();
    if !path.exists() {
        println!("No journal at {}", path.display());
        return Ok(());
    }
    let journal = Journal::open(&path)?;
    let episodes = journal.recent(cmd.limit)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&episodes)?);
        return Ok(());
    }
    if episodes.is_empty() {
        println!("No fall episodes recorded.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<20}  {:<11}  {:<24}  {:<20}  alert",
        "id", "confirmed", "policy", "location", "cleared"
    );
    for episode in episodes {
        let cleared = episode.cleared_at.map_or_else(
            || "-".to_string(),
            |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        println!(
            "{:>5}  {:<20}  {:<11}  {:<24}  {:<20}  {}",
            episode.id,
            episode.confirmed_at.format("%Y-%m-%d %H:%M:%S"),
            episode.policy,
            format!(
                "{:.6},{:.6}",
                episode.location.latitude, episode.location.longitude
            ),
            cleared,
            episode.alert_outcome.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn handle_status(config: &Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let path = config.database_path();
    let stats = if config.storage.journal_enabled && path.exists() {
        Some(Journal::open(&path)?.stats()?)
    } else {
        None
    };

    if cmd.json {
        let status = serde_json::json!({
            "policy": config.classifier.policy,
            "poll_interval_ms": config.monitor.poll_interval_ms,
            "bind_address": config.network.bind_address,
            "relay_enabled": config.relay.enabled,
            "journal_enabled": config.storage.journal_enabled,
            "database_path": path,
            "journal": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("smartband status");
    println!("----------------");
    println!("Policy:        {}", config.classifier.policy);
    println!("Poll interval: {} ms", config.monitor.poll_interval_ms);
    println!("Dashboard:     {}", config.network.bind_address);
    println!(
        "Relay:         {}",
        if config.relay.enabled { "enabled" } else { "disabled" }
    );
    println!("Journal:       {}", path.display());
    match stats {
        Some(stats) => {
            println!("Episodes:      {}", stats.total_episodes);
            println!("  open:        {}", stats.open_episodes);
            println!("  unalerted:   {}", stats.unalerted_episodes);
            if let Some(newest) = stats.newest_episode {
                println!("Last fall:     {}", newest.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!("Size:          {} bytes", stats.db_size_bytes);
        }
        None => println!("Episodes:      (no journal)"),
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let shown = config.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                let envelope = &shown.classifier.envelope;
                let orientation = &shown.classifier.orientation;
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Network]");
                println!("  Bind address:       {}", shown.network.bind_address);
                println!("  Hostname:           {}", shown.network.hostname);
                println!(
                    "  Wi-Fi SSID:         {}",
                    shown.network.wifi_ssid.as_deref().unwrap_or("-")
                );
                println!();
                println!("[Classifier]");
                println!("  Policy:             {}", shown.classifier.policy);
                println!(
                    "  Envelope:           {} g / {} g, rotation {}..{} deg/s, latch {} s",
                    envelope.low_threshold_g,
                    envelope.high_threshold_g,
                    envelope.rotation_min_dps,
                    envelope.rotation_max_dps,
                    envelope.latch_secs
                );
                println!(
                    "  Orientation:        accZ < {} m/s² for {} ms",
                    orientation.inverted_threshold_ms2, orientation.confirm_after_ms
                );
                println!();
                println!("[Relay]");
                println!("  Enabled:            {}", shown.relay.enabled);
                println!("  URL:                {}", shown.relay.url);
                println!(
                    "  API key:            {}",
                    shown.relay.api_key.as_deref().unwrap_or("-")
                );
                println!("  Cooldown (s):       {}", shown.relay.cooldown_secs);
                println!("  Max attempts:       {}", shown.relay.max_attempts);
                println!();
                println!("[Storage]");
                println!("  Journal:            {}", shown.storage.journal_enabled);
                println!("  Database path:      {}", shown.database_path().display());
                println!("  Max age (days):     {}", shown.storage.max_age_days);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => handle_validate(file)?,
    }
    Ok(())
}

fn handle_validate(file: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    Config::load_from(Some(path.clone()))
        .with_context(|| format!("configuration in {} is invalid", path.display()))?;
    println!("Configuration is valid.");
    Ok(())
}
