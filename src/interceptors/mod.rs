//! Interceptors wiring the trackers and detectors into the frame processor.

pub mod expected;

use std::sync::Arc;

use log::trace;

use crate::alerts::{Alert, AlertsService};
use crate::bandits::{BanditRegistry, ContactManager};
use crate::config::NetworkDefinition;
use crate::deauth::DeauthenticationMonitor;
use crate::error::InterceptorError;
use crate::frame::{AdvertisementFrame, Dot11Frame, FrameSubtype};
use crate::networks::sentry::Sentry;
use crate::networks::Networks;
use crate::processor::Interceptor;

pub use expected::{
    CryptoChangeInterceptor, ExpectedNetworks, UnexpectedBssidInterceptor,
    UnexpectedChannelInterceptor, UnexpectedFingerprintInterceptor, UnexpectedSsidInterceptor,
};

const ADVERTISEMENTS: [FrameSubtype; 2] = [FrameSubtype::Beacon, FrameSubtype::ProbeResponse];

pub(crate) fn advertisement(frame: &Dot11Frame) -> Result<&AdvertisementFrame, InterceptorError> {
    frame
        .advertisement()
        .ok_or(InterceptorError::MissingField(frame.subtype(), "advertisement body"))
}

/// Feeds beacons and probe responses into the network tracker.
pub struct NetworksInterceptor {
    networks: Arc<Networks>,
}

impl NetworksInterceptor {
    pub fn new(networks: Arc<Networks>) -> Self {
        Self { networks }
    }
}

impl Interceptor for NetworksInterceptor {
    fn name(&self) -> &str {
        "networks"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        ADVERTISEMENTS.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        match frame {
            Dot11Frame::Beacon(f) => self.networks.register_beacon(f),
            Dot11Frame::ProbeResponse(f) => self.networks.register_probe_response(f),
            _ => {}
        }
        Ok(())
    }
}

/// Ticks every advertised SSID and raises an unknown-SSID alert the first
/// time an SSID outside the monitored networks shows up.
pub struct SentryInterceptor {
    sentry: Arc<Sentry>,
    monitored: Arc<Vec<NetworkDefinition>>,
    alerts: Arc<AlertsService>,
}

impl SentryInterceptor {
    pub fn new(sentry: Arc<Sentry>, monitored: Arc<Vec<NetworkDefinition>>, alerts: Arc<AlertsService>) -> Self {
        Self {
            sentry,
            monitored,
            alerts,
        }
    }
}

impl Interceptor for SentryInterceptor {
    fn name(&self) -> &str {
        "sentry"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        ADVERTISEMENTS.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let advertisement = advertisement(frame)?;
        let Some(ssid) = advertisement.ssid.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(());
        };

        if !self.sentry.tick_ssid(ssid, advertisement.meta.timestamp) {
            return Ok(());
        }

        if self.monitored.iter().any(|n| n.ssid == ssid) {
            trace!("Monitored SSID [{}] entered sentry", ssid);
            return Ok(());
        }

        self.alerts.handle_at(
            Alert::UnknownSsid {
                bssid: advertisement.transmitter,
                ssid: ssid.to_string(),
                channel: advertisement.meta.channel,
                antenna_signal: advertisement.meta.antenna_signal,
            },
            advertisement.meta.timestamp,
        );
        Ok(())
    }
}

pub struct DeauthInterceptor {
    monitor: Arc<DeauthenticationMonitor>,
}

impl DeauthInterceptor {
    pub fn new(monitor: Arc<DeauthenticationMonitor>) -> Self {
        Self { monitor }
    }
}

impl Interceptor for DeauthInterceptor {
    fn name(&self) -> &str {
        "deauth"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        vec![FrameSubtype::Deauthentication, FrameSubtype::Disassociation]
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        match frame {
            Dot11Frame::Deauthentication(f) | Dot11Frame::Disassociation(f) => {
                self.monitor.record_frame(f);
                Ok(())
            }
            other => Err(InterceptorError::MissingField(other.subtype(), "disconnect body")),
        }
    }
}

pub struct PwnagotchiInterceptor {
    alerts: Arc<AlertsService>,
}

impl PwnagotchiInterceptor {
    pub fn new(alerts: Arc<AlertsService>) -> Self {
        Self { alerts }
    }
}

impl Interceptor for PwnagotchiInterceptor {
    fn name(&self) -> &str {
        "pwnagotchi"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        vec![FrameSubtype::Beacon]
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let advertisement = advertisement(frame)?;
        if let Some(pwnagotchi) = &advertisement.tagged.pwnagotchi {
            self.alerts.handle_at(
                Alert::PwnagotchiAdvertisement {
                    identity: pwnagotchi.identity.clone(),
                    name: pwnagotchi.name.clone(),
                    version: pwnagotchi.version.clone(),
                    channel: advertisement.meta.channel,
                    antenna_signal: advertisement.meta.antenna_signal,
                },
                advertisement.meta.timestamp,
            );
        }
        Ok(())
    }
}

/// Evaluates every loaded bandit against every frame.
pub struct BanditInterceptor {
    bandits: Arc<BanditRegistry>,
    contacts: Arc<ContactManager>,
}

impl BanditInterceptor {
    pub fn new(bandits: Arc<BanditRegistry>, contacts: Arc<ContactManager>) -> Self {
        Self { bandits, contacts }
    }
}

impl Interceptor for BanditInterceptor {
    fn name(&self) -> &str {
        "bandits"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        FrameSubtype::ALL.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let mut result = Ok(());
        for bandit in self.bandits.all() {
            if let Some(identifier) = bandit.matching_identifier(frame) {
                trace!("Bandit [{}] matched frame from [{}]", bandit.name, frame.transmitter());
                if let Err(e) = self.contacts.register_match(&bandit, identifier, frame) {
                    result = Err(e);
                }
            }
        }
        result
    }
}
