use crate::accessory::{AccessoryInfo, StateChange, SwitchAccessory, MANUFACTURER, MODEL};
use crate::domain::gestures::GestureClassifier;
use crate::domain::models::{BdAddr, LatencyMode};
use crate::domain::settings::AccessoryConfig;
use crate::domain::toggle::ToggleController;
use crate::infrastructure::bluetooth::{ButtonClient, EdgeStream, FlicError};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// One Flic button bound to its own classifier and switch state
pub struct AccessoryAdapter {
    info: AccessoryInfo,
    address: BdAddr,
    controller: ToggleController,
    debounce: Duration,
}

impl AccessoryAdapter {
    pub fn new(
        config: &AccessoryConfig,
        debounce: Duration,
        notifier: broadcast::Sender<StateChange>,
    ) -> anyhow::Result<Self> {
        let address: BdAddr = config
            .mac
            .parse()
            .with_context(|| format!("Accessory '{}' has an invalid mac", config.name))?;

        let info = AccessoryInfo {
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
            serial: address.to_string(),
            name: config.name.clone(),
            protocol: config.protocol.clone(),
        };

        let serial = info.serial.clone();
        let controller = ToggleController::new(Arc::new(move |on: bool| {
            // No subscribers just means no bridge client is connected
            let _ = notifier.send(StateChange {
                serial: serial.clone(),
                on,
            });
        }));

        Ok(Self {
            info,
            address,
            controller,
            debounce,
        })
    }

    pub fn address(&self) -> BdAddr {
        self.address
    }

    /// Classify an edge stream into gestures that drive this switch.
    ///
    /// The task ends when the stream does.
    pub fn listen(&self, edges: EdgeStream) -> JoinHandle<()> {
        let controller = self.controller.clone();
        let classifier = GestureClassifier::new(self.debounce);
        let name = self.info.name.clone();

        tokio::spawn(async move {
            classifier
                .run(edges, |record| {
                    controller.handle_press(record.press_type());
                })
                .await;
            info!("Stopped listening to '{}'", name);
        })
    }

    /// Open a channel for this button and start listening on it
    pub async fn attach<C: ButtonClient>(
        &self,
        client: &C,
        latency_mode: LatencyMode,
    ) -> Result<JoinHandle<()>, FlicError> {
        let edges = client.connect(self.address, latency_mode).await?;
        info!("Listening to '{}' ({})", self.info.name, self.address);
        Ok(self.listen(edges))
    }
}

impl SwitchAccessory for AccessoryAdapter {
    fn info(&self) -> &AccessoryInfo {
        &self.info
    }

    fn get_state(&self) -> bool {
        self.controller.get_state()
    }

    fn set_state(&self, on: bool) {
        info!("Bridge set '{}' {}", self.info.name, if on { "on" } else { "off" });
        self.controller.set_state(on);
    }

    fn identify(&self) {
        info!("Identify requested for '{}' ({})", self.info.name, self.info.serial);
    }
}

/// Accessories by serial, in registration order
#[derive(Default)]
pub struct AccessoryRegistry {
    accessories: Vec<Arc<dyn SwitchAccessory>>,
}

/// Serials are bluetooth addresses, so match them case-insensitively
fn normalize_serial(serial: &str) -> String {
    serial
        .parse::<BdAddr>()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| serial.to_string())
}

impl AccessoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, accessory: Arc<dyn SwitchAccessory>) -> anyhow::Result<()> {
        let serial = &accessory.info().serial;
        if self.get(serial).is_some() {
            anyhow::bail!("Accessory {} is configured more than once", serial);
        }
        self.accessories.push(accessory);
        Ok(())
    }

    pub fn get(&self, serial: &str) -> Option<&Arc<dyn SwitchAccessory>> {
        let serial = normalize_serial(serial);
        self.accessories
            .iter()
            .find(|accessory| normalize_serial(&accessory.info().serial) == serial)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SwitchAccessory>> {
        self.accessories.iter()
    }

    pub fn len(&self) -> usize {
        self.accessories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessories.is_empty()
    }
}
