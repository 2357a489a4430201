use crate::domain::models::PressType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Receives the new switch state after a gesture flipped it
pub trait SwitchObserver: Send + Sync {
    fn on_state_changed(&self, on: bool);
}

impl<F> SwitchObserver for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_state_changed(&self, on: bool) {
        self(on)
    }
}

/// Owns the on/off state of one button's switch.
///
/// Only an exact single press flips the state. Multi-press and hold
/// gestures are accepted and ignored so they can be bound later. The state
/// can be read or overwritten at any time, including while the classifier
/// is mid-window.
#[derive(Clone)]
pub struct ToggleController {
    state: Arc<AtomicBool>,
    observer: Arc<dyn SwitchObserver>,
}

impl ToggleController {
    pub fn new(observer: Arc<dyn SwitchObserver>) -> Self {
        Self {
            state: Arc::new(AtomicBool::new(false)),
            observer,
        }
    }

    /// Apply a classified gesture. Returns true if the state changed.
    pub fn handle_press(&self, press: PressType) -> bool {
        if press != PressType::SINGLE {
            debug!("Ignoring {} gesture", press);
            return false;
        }

        let on = !self.state.fetch_xor(true, Ordering::SeqCst);
        info!("Single press, switch toggled {}", if on { "on" } else { "off" });
        self.observer.on_state_changed(on);
        true
    }

    pub fn get_state(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    /// Overwrite the state from the bridge side; no notification is sent back
    pub fn set_state(&self, on: bool) {
        self.state.store(on, Ordering::SeqCst);
    }
}
