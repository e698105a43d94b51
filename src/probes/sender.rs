use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use super::trap::Trap;
use super::{sleep_while_running, CaptureDevice, DeviceFactory, ProbeStatus, ProbeStatusSnapshot};
use crate::config::{ProbeConfig, SenderProbeConfig};
use crate::error::ProbeError;

/// Shortest pause between trap rounds.
pub const MIN_SEND_DELAY: Duration = Duration::from_millis(100);

/// Same loop shape as the monitor probe, but transmits its trap's frames
/// every `trap.delay()` instead of listening.
pub struct SenderProbe {
    config: ProbeConfig,
    trap: Arc<dyn Trap>,
    factory: Arc<dyn DeviceFactory>,
    status: Arc<ProbeStatus>,
}

impl SenderProbe {
    pub fn new(config: &SenderProbeConfig, trap: Arc<dyn Trap>, factory: Arc<dyn DeviceFactory>) -> Self {
        let config = config.as_probe_config();
        let status = Arc::new(ProbeStatus::new(&config.name, &config.interface));
        Self {
            config,
            trap,
            factory,
            status,
        }
    }

    pub fn status(&self) -> Arc<ProbeStatus> {
        Arc::clone(&self.status)
    }

    pub fn trap(&self) -> Arc<dyn Trap> {
        Arc::clone(&self.trap)
    }

    pub fn snapshot(&self) -> ProbeStatusSnapshot {
        self.status.snapshot(Some(self.trap.describe()))
    }

    pub fn spawn(self: Arc<Self>, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("sender-{}", self.config.name))
            .spawn(move || self.run(&running))
    }

    pub fn run(&self, running: &AtomicBool) {
        info!(
            "Starting sender probe [{}] on [{}] with trap: {}",
            self.config.name,
            self.config.interface,
            self.trap.description()
        );
        let retry = Duration::from_secs(self.config.retry_seconds);

        while running.load(Ordering::Acquire) {
            let mut device = match self.factory.open(&self.config) {
                Ok(device) => device,
                Err(e) => {
                    error!("Could not initialize sender probe [{}]: {}", self.config.name, e);
                    self.status.set_active(false);
                    sleep_while_running(running, retry);
                    continue;
                }
            };

            self.status.set_active(true);
            self.status.set_in_loop(true);
            let result = self.send_loop(device.as_mut(), running);
            self.status.set_in_loop(false);

            if let Err(e) = device.close() {
                warn!("Could not cleanly close sender probe [{}]: {}", self.config.name, e);
            }

            match result {
                Ok(()) => break,
                Err(e) => {
                    error!("Sender probe [{}] failed, retrying: {}", self.config.name, e);
                    self.status.set_active(false);
                    sleep_while_running(running, retry);
                }
            }
        }

        self.status.set_active(false);
        self.status.set_in_loop(false);
        info!("Sender probe [{}] stopped", self.config.name);
    }

    fn send_loop(&self, device: &mut dyn CaptureDevice, running: &AtomicBool) -> Result<(), ProbeError> {
        if let Some(&channel) = self.config.channels.first() {
            device.set_channel(channel)?;
            self.status.set_current_channel(channel);
        }

        while running.load(Ordering::Acquire) {
            for frame in self.trap.frames() {
                device.send(&frame)?;
                self.status.increment_total_frames();
            }
            sleep_while_running(running, self.trap.delay().max(MIN_SEND_DELAY));
        }
        Ok(())
    }
}
