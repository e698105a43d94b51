use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, trace, warn};

use super::{sleep_while_running, CaptureDevice, DeviceFactory, ProbeStatus};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::processor::FrameProcessor;

/// Listens on one interface, hops channels and hands every decoded frame
/// to the processor in capture order.
pub struct MonitorProbe {
    config: ProbeConfig,
    factory: Arc<dyn DeviceFactory>,
    processor: Arc<FrameProcessor>,
    status: Arc<ProbeStatus>,
}

impl MonitorProbe {
    pub fn new(config: ProbeConfig, factory: Arc<dyn DeviceFactory>, processor: Arc<FrameProcessor>) -> Self {
        let status = Arc::new(ProbeStatus::new(&config.name, &config.interface));
        Self {
            config,
            factory,
            processor,
            status,
        }
    }

    pub fn status(&self) -> Arc<ProbeStatus> {
        Arc::clone(&self.status)
    }

    pub fn spawn(self: Arc<Self>, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("probe-{}", self.config.name))
            .spawn(move || self.run(&running))
    }

    /// Runs until `running` goes false. Device failures mark the probe
    /// inactive and it retries after `retry_seconds`.
    pub fn run(&self, running: &AtomicBool) {
        info!(
            "Starting monitor probe [{}] on [{}]",
            self.config.name, self.config.interface
        );
        let retry = Duration::from_secs(self.config.retry_seconds);

        while running.load(Ordering::Acquire) {
            let mut device = match self.factory.open(&self.config) {
                Ok(device) => device,
                Err(e) => {
                    error!("Could not initialize probe [{}]: {}", self.config.name, e);
                    self.status.set_active(false);
                    sleep_while_running(running, retry);
                    continue;
                }
            };

            self.status.set_active(true);
            self.status.set_in_loop(true);
            let result = self.capture_loop(device.as_mut(), running);
            self.status.set_in_loop(false);

            if let Err(e) = device.close() {
                warn!("Could not cleanly close probe [{}]: {}", self.config.name, e);
            }

            match result {
                Ok(()) => break,
                Err(e) => {
                    error!("Probe [{}] failed, retrying: {}", self.config.name, e);
                    self.status.set_active(false);
                    sleep_while_running(running, retry);
                }
            }
        }

        self.status.set_active(false);
        self.status.set_in_loop(false);
        info!("Monitor probe [{}] stopped", self.config.name);
    }

    fn capture_loop(&self, device: &mut dyn CaptureDevice, running: &AtomicBool) -> Result<(), ProbeError> {
        let channels = &self.config.channels;
        let hop_interval = self.config.hop_interval();
        let mut channel_index = 0;

        if let Some(&first) = channels.first() {
            self.hop(device, first);
        }
        let mut last_hop = Instant::now();

        while running.load(Ordering::Acquire) {
            if channels.len() > 1 && last_hop.elapsed() >= hop_interval {
                channel_index = (channel_index + 1) % channels.len();
                self.hop(device, channels[channel_index]);
                last_hop = Instant::now();
            }

            let Some(mut frame) = device.next_frame()? else {
                continue;
            };

            let meta = frame.meta_mut();
            if meta.channel == 0 {
                meta.channel = self.status.current_channel();
            }

            self.status.increment_total_frames();
            trace!("Probe [{}] read {:?} frame", self.config.name, frame.subtype());
            self.processor.process(&frame);
        }

        Ok(())
    }

    /// A failed hop is logged and capture continues on the old channel.
    fn hop(&self, device: &mut dyn CaptureDevice, channel: u16) {
        match device.set_channel(channel) {
            Ok(()) => self.status.set_current_channel(channel),
            Err(e) => warn!(
                "Probe [{}] could not hop to channel {}: {}",
                self.config.name, channel, e
            ),
        }
    }
}
