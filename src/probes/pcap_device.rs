use chrono::Utc;
use log::{info, warn};
use pcap::{Active, Capture, Linktype};

use super::interface::WifiInterface;
use super::{CaptureDevice, DeviceFactory};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::frame::Dot11Frame;
use crate::parser::parse_packet;

const LINKTYPE_IEEE802_11_RADIOTAP: i32 = 127;
const READ_TIMEOUT_MS: i32 = 1000;

/// Opens libpcap live captures, switching the interface to monitor mode
/// first unless the probe is configured to skip that.
#[derive(Debug, Default)]
pub struct PcapDeviceFactory;

impl DeviceFactory for PcapDeviceFactory {
    fn open(&self, config: &ProbeConfig) -> Result<Box<dyn CaptureDevice>, ProbeError> {
        let interface = WifiInterface::new(&config.interface);

        let mut enabled_monitor = false;
        if !config.skip_enable_monitor && !interface.is_monitor_mode()? {
            info!("Setting [{}] to monitor mode", interface.name());
            interface.set_monitor_mode()?;
            enabled_monitor = true;
        }

        let capture = Capture::from_device(config.interface.as_str())
            .and_then(|c| {
                c.promisc(true)
                    .snaplen(65535)
                    .timeout(READ_TIMEOUT_MS)
                    .immediate_mode(true)
                    .open()
            });

        let mut capture = match capture {
            Ok(capture) => capture,
            Err(e) => {
                if enabled_monitor {
                    if let Err(restore) = interface.set_managed_mode() {
                        warn!("Could not restore managed mode on [{}]: {}", interface.name(), restore);
                    }
                }
                return Err(e.into());
            }
        };

        if let Err(e) = capture.set_datalink(Linktype(LINKTYPE_IEEE802_11_RADIOTAP)) {
            warn!("Could not select radiotap link type on [{}]: {}", interface.name(), e);
        }

        Ok(Box::new(PcapDevice {
            capture,
            interface,
            probe: config.name.clone(),
            hop_command: config.hop_command.clone(),
            enabled_monitor,
            closed: false,
        }))
    }
}

pub struct PcapDevice {
    capture: Capture<Active>,
    interface: WifiInterface,
    probe: String,
    hop_command: String,
    enabled_monitor: bool,
    closed: bool,
}

impl CaptureDevice for PcapDevice {
    fn next_frame(&mut self) -> Result<Option<Dot11Frame>, ProbeError> {
        if self.closed {
            return Err(ProbeError::Closed);
        }
        match self.capture.next_packet() {
            Ok(packet) => Ok(parse_packet(packet.data, &self.probe, Utc::now())),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_channel(&mut self, channel: u16) -> Result<(), ProbeError> {
        self.interface.set_channel(&self.hop_command, channel)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), ProbeError> {
        self.capture.sendpacket(frame)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProbeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.enabled_monitor {
            info!("Restoring [{}] to managed mode", self.interface.name());
            self.interface.set_managed_mode()?;
        }
        Ok(())
    }
}

impl Drop for PcapDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Could not release [{}]: {}", self.interface.name(), e);
        }
    }
}
