//! Capture loops, one OS thread per configured interface.

pub mod interface;
pub mod monitor;
pub mod pcap_device;
pub mod scripted;
pub mod sender;
pub mod trap;

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::frame::Dot11Frame;

pub use monitor::MonitorProbe;
pub use pcap_device::PcapDeviceFactory;
pub use scripted::{DeviceLog, ScriptStep, ScriptedDeviceFactory, ScriptedOpen};
pub use sender::SenderProbe;
pub use trap::{ProbeRequestTrap, Trap, TrapDescription};

/// An opened capture source. Owned by exactly one probe thread.
pub trait CaptureDevice: Send {
    /// Next decoded frame. `Ok(None)` on read timeout or for packets that
    /// did not decode into a tracked frame.
    fn next_frame(&mut self) -> Result<Option<Dot11Frame>, ProbeError>;

    fn set_channel(&mut self, channel: u16) -> Result<(), ProbeError>;

    fn send(&mut self, frame: &[u8]) -> Result<(), ProbeError>;

    /// Releases the device. Restores managed mode if opening it enabled
    /// monitor mode.
    fn close(&mut self) -> Result<(), ProbeError>;
}

pub trait DeviceFactory: Send + Sync {
    fn open(&self, config: &ProbeConfig) -> Result<Box<dyn CaptureDevice>, ProbeError>;
}

#[derive(Debug)]
pub struct ProbeStatus {
    name: String,
    interface: String,
    active: AtomicBool,
    in_loop: AtomicBool,
    current_channel: AtomicU16,
    total_frames: AtomicU64,
}

impl ProbeStatus {
    pub fn new(name: &str, interface: &str) -> Self {
        Self {
            name: name.to_string(),
            interface: interface.to_string(),
            active: AtomicBool::new(false),
            in_loop: AtomicBool::new(false),
            current_channel: AtomicU16::new(0),
            total_frames: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_in_loop(&self) -> bool {
        self.in_loop.load(Ordering::Acquire)
    }

    pub fn current_channel(&self) -> u16 {
        self.current_channel.load(Ordering::Acquire)
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn set_in_loop(&self, in_loop: bool) {
        self.in_loop.store(in_loop, Ordering::Release);
    }

    pub(crate) fn set_current_channel(&self, channel: u16) {
        self.current_channel.store(channel, Ordering::Release);
    }

    pub(crate) fn increment_total_frames(&self) {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, trap: Option<TrapDescription>) -> ProbeStatusSnapshot {
        ProbeStatusSnapshot {
            name: self.name.clone(),
            interface: self.interface.clone(),
            active: self.is_active(),
            in_loop: self.is_in_loop(),
            current_channel: self.current_channel(),
            total_frames: self.total_frames(),
            trap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeStatusSnapshot {
    pub name: String,
    pub interface: String,
    pub active: bool,
    pub in_loop: bool,
    pub current_channel: u16,
    pub total_frames: u64,
    pub trap: Option<TrapDescription>,
}

/// Sleeps in short slices so a stop request is honoured quickly.
pub(crate) fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
