//! A capture device that replays a fixed script. Drives probe loops in
//! tests and dry runs without radio hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{CaptureDevice, DeviceFactory};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::frame::Dot11Frame;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Frame(Dot11Frame),
    /// A read timeout.
    Idle,
    /// A read error, ending this device session.
    Fail(String),
}

/// What happens on each `open` call, in order. Once the list runs out,
/// every further open fails.
#[derive(Debug, Clone)]
pub enum ScriptedOpen {
    Device(Vec<ScriptStep>),
    Fail(String),
}

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub channels: Mutex<Vec<u16>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

pub struct ScriptedDeviceFactory {
    opens: Mutex<VecDeque<ScriptedOpen>>,
    log: Arc<DeviceLog>,
}

impl ScriptedDeviceFactory {
    pub fn new(opens: Vec<ScriptedOpen>) -> Self {
        Self {
            opens: Mutex::new(opens.into()),
            log: Arc::new(DeviceLog::default()),
        }
    }

    /// One device that replays `frames` and then idles.
    pub fn replaying(frames: Vec<Dot11Frame>) -> Self {
        Self::new(vec![ScriptedOpen::Device(
            frames.into_iter().map(ScriptStep::Frame).collect(),
        )])
    }

    pub fn log(&self) -> Arc<DeviceLog> {
        Arc::clone(&self.log)
    }
}

impl DeviceFactory for ScriptedDeviceFactory {
    fn open(&self, config: &ProbeConfig) -> Result<Box<dyn CaptureDevice>, ProbeError> {
        let next = self.opens.lock().pop_front();
        match next {
            Some(ScriptedOpen::Device(steps)) => {
                self.log.opened.fetch_add(1, Ordering::AcqRel);
                Ok(Box::new(ScriptedDevice {
                    steps: steps.into(),
                    log: Arc::clone(&self.log),
                }))
            }
            Some(ScriptedOpen::Fail(message)) => Err(ProbeError::Interface {
                interface: config.interface.clone(),
                message,
            }),
            None => Err(ProbeError::Interface {
                interface: config.interface.clone(),
                message: "no scripted device left".to_string(),
            }),
        }
    }
}

struct ScriptedDevice {
    steps: VecDeque<ScriptStep>,
    log: Arc<DeviceLog>,
}

impl CaptureDevice for ScriptedDevice {
    fn next_frame(&mut self) -> Result<Option<Dot11Frame>, ProbeError> {
        match self.steps.pop_front() {
            Some(ScriptStep::Frame(frame)) => Ok(Some(frame)),
            Some(ScriptStep::Idle) => Ok(None),
            Some(ScriptStep::Fail(message)) => Err(ProbeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                message,
            ))),
            None => {
                thread::sleep(Duration::from_millis(5));
                Ok(None)
            }
        }
    }

    fn set_channel(&mut self, channel: u16) -> Result<(), ProbeError> {
        self.log.channels.lock().push(channel);
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), ProbeError> {
        self.log.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProbeError> {
        self.log.closed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
