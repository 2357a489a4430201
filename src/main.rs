use anyhow::Context;
use flic_switch_bridge::accessory::{AccessoryAdapter, AccessoryRegistry, BridgeServer};
use flic_switch_bridge::domain::settings::SettingsService;
use flic_switch_bridge::infrastructure::bluetooth::{ButtonClient, FlicClient};
use flic_switch_bridge::infrastructure::logging::init_logger;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _logging_guard = init_logger(&settings.log_settings)?;
    info!("Starting Flic switch bridge");

    let client = FlicClient::open((settings.flicd_host.as_str(), settings.flicd_port))
        .await
        .with_context(|| {
            format!(
                "Could not reach flicd at {}:{}",
                settings.flicd_host, settings.flicd_port
            )
        })?;
    let verified = client.get_device_list().await?;

    let (events, _) = broadcast::channel(64);
    let mut registry = AccessoryRegistry::new();
    let mut listeners = Vec::new();

    for config in &settings.accessories {
        let adapter = Arc::new(AccessoryAdapter::new(
            config,
            settings.debounce(),
            events.clone(),
        )?);
        if !verified.contains(&adapter.address()) {
            warn!(
                "{} is not a verified button in flicd, connecting anyway",
                adapter.address()
            );
        }

        match adapter.attach(&client, settings.latency_mode).await {
            Ok(listener) => listeners.push(listener),
            Err(e) => error!("Could not listen to {}: {}", adapter.address(), e),
        }
        registry.register(adapter)?;
    }

    if registry.is_empty() {
        warn!(
            "No accessories configured in {}",
            settings_service.path().display()
        );
    } else {
        info!("Serving {} accessory(ies)", registry.len());
    }

    let listener = TcpListener::bind(&settings.bridge_listen)
        .await
        .with_context(|| format!("Could not bind bridge socket {}", settings.bridge_listen))?;
    let server = BridgeServer::new(Arc::new(registry), events);

    tokio::select! {
        result = server.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    for listener in listeners {
        listener.abort();
    }
    Ok(())
}
