// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod config;
mod device_task;
mod schedule;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppConfig;
use device_task::DeviceTask;
use fluxion_control::{
    Clock, ControlChannel, HostPlatform, LocalWriteVerifyEngine, PlanSource, RetryPolicy,
    ScheduleWindowManager, ServiceCallDedup, SystemClock,
};
use fluxion_ha::{HaHost, HaPlanSource, HomeAssistantClient, StatusTarget};
use fluxion_solis::{CloudRegisterBackend, SolisClient};
use schedule::TickSchedule;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Battery schedule control for Home Assistant
#[derive(Debug, Parser)]
#[command(name = "fluxion-control", version, about)]
struct Args {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Poll and report, never write to the devices
    #[arg(long)]
    read_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if args.read_only {
        config.system.read_only = true;
    }

    // RUST_LOG wins over the configured level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.system.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let timezone = config.timezone()?;
    info!("🚀 Starting FluxION control");
    info!("📋 Configuration Summary:");
    info!("   Devices: {}", config.devices.len());
    for device in &config.devices {
        info!(
            "     - {} ({}) {}",
            device.id,
            device.inverter_type,
            device
                .serial
                .as_deref()
                .or(device.entity_prefix.as_deref())
                .unwrap_or("-")
        );
    }
    info!("   Timezone: {}", timezone);
    info!(
        "   Tiers: tick {}s, reconcile {}s, telemetry {}s, settings {}s",
        config.system.tick_secs,
        config.system.reconcile_secs,
        config.system.telemetry_secs,
        config.system.settings_secs
    );
    info!("   Read-only: {}", config.system.read_only);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ha_client = if std::env::var("SUPERVISOR_TOKEN").is_ok() {
        info!("🏠 Initializing HA client using Supervisor API...");
        HomeAssistantClient::from_supervisor()?
    } else {
        info!("🏠 Initializing HA client from configuration...");
        HomeAssistantClient::from_config(
            config.home_assistant.base_url.clone(),
            config.home_assistant.token.clone(),
        )?
    };
    let ha_client = Arc::new(
        ha_client
            .with_clock(clock.clone())
            .with_retry_policy(RetryPolicy::host()),
    );
    if !ha_client.ping().await {
        warn!("⚠️ Home Assistant is not reachable yet, continuing");
    }

    let status = config
        .system
        .status_entity
        .clone()
        .map_or(StatusTarget::Notification, StatusTarget::InputText);
    let host: Arc<dyn HostPlatform> = Arc::new(HaHost::new(ha_client.clone(), status));

    let solis = if config.devices.iter().any(config::DeviceConfig::is_cloud) {
        let key_id = config.solis.key_id.clone().unwrap_or_default();
        let secret = config.solis.secret.clone().unwrap_or_default();
        info!("☁️ Connecting to Solis cloud at {}", config.solis.base_url);
        Some(
            SolisClient::connect(config.solis.base_url.clone(), key_id, secret, clock.clone())?
                .with_policy(config.solis.retry.clone()),
        )
    } else {
        None
    };

    let mut plan_source = HaPlanSource::new(ha_client.clone());
    for device in &config.devices {
        if let Some(entity) = &device.plan_entity {
            plan_source = plan_source.with_device(device.id.clone(), entity.clone());
        }
    }
    let plans: Arc<dyn PlanSource> = Arc::new(plan_source);

    let dedup = Arc::new(ServiceCallDedup::new());
    let schedule = TickSchedule::from_config(&config.system);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    for (index, device_config) in config.devices.iter().enumerate() {
        let device = device_config.to_device(index);
        let channel = match &solis {
            Some(client) if device_config.is_cloud() => {
                let serial = device_config.serial.clone().unwrap_or_default();
                let backend = CloudRegisterBackend::new(
                    device_config.id.clone(),
                    serial,
                    client.clone(),
                    device_config.backend_settings(),
                );
                ControlChannel::Cloud(Arc::new(backend))
            }
            Some(_) | None => ControlChannel::Local {
                engine: LocalWriteVerifyEngine::new(
                    host.clone(),
                    clock.clone(),
                    device_config.poll_delay(),
                ),
                entities: device_config.entity_map(),
            },
        };

        let manager = ScheduleWindowManager::new(
            device,
            channel,
            host.clone(),
            clock.clone(),
            dedup.clone(),
            device_config.manager_settings(timezone),
        )
        .with_context(|| format!("Failed to set up device '{}'", device_config.id))?;

        let task = DeviceTask::new(
            manager,
            plans.clone(),
            schedule,
            clock.clone(),
            config.system.read_only,
        );
        let device_id = device_config.id.clone();
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = task.run(shutdown).await {
                error!("❌ [{}] Device stopped: {}", device_id, e);
            }
        }));
    }

    info!("✅ {} device loop(s) running", handles.len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Shutdown requested");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!("❌ Device task panicked: {}", e);
        }
    }

    info!("👋 FluxION control stopped");
    Ok(())
}
