//! Checks advertisements against the configured (expected) networks.

use std::sync::Arc;

use crate::alerts::{Alert, AlertsService};
use crate::config::{BssidDefinition, NetworkDefinition};
use crate::error::InterceptorError;
use crate::frame::{AdvertisementFrame, Dot11Frame, FrameSubtype, MacAddr};
use crate::processor::Interceptor;

use super::{advertisement, ADVERTISEMENTS};

/// Lookups over the `[[networks]]` configuration.
#[derive(Debug, Clone, Default)]
pub struct ExpectedNetworks {
    networks: Vec<NetworkDefinition>,
}

impl ExpectedNetworks {
    pub fn new(networks: Vec<NetworkDefinition>) -> Self {
        Self { networks }
    }

    pub fn definitions(&self) -> &[NetworkDefinition] {
        &self.networks
    }

    pub fn by_ssid(&self, ssid: &str) -> Option<&NetworkDefinition> {
        self.networks.iter().find(|n| n.ssid == ssid)
    }

    /// Networks that list `address` as one of their BSSIDs.
    pub fn listing(&self, address: &MacAddr) -> impl Iterator<Item = &NetworkDefinition> + '_ {
        let address = *address;
        self.networks.iter().filter(move |n| n.bssid(&address).is_some())
    }

    /// The definition for this SSID and BSSID pair, if both are monitored
    /// and the BSSID belongs to the SSID.
    fn monitored_pair(&self, frame: &AdvertisementFrame) -> Option<(&NetworkDefinition, &BssidDefinition)> {
        let ssid = frame.ssid.as_deref()?;
        let network = self.by_ssid(ssid)?;
        let bssid = network.bssid(&frame.transmitter)?;
        Some((network, bssid))
    }
}

/// A monitored SSID advertised by a BSSID that is not listed for it.
pub struct UnexpectedBssidInterceptor {
    expected: Arc<ExpectedNetworks>,
    alerts: Arc<AlertsService>,
}

impl UnexpectedBssidInterceptor {
    pub fn new(expected: Arc<ExpectedNetworks>, alerts: Arc<AlertsService>) -> Self {
        Self { expected, alerts }
    }
}

impl Interceptor for UnexpectedBssidInterceptor {
    fn name(&self) -> &str {
        "unexpected_bssid"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        ADVERTISEMENTS.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let frame = advertisement(frame)?;
        let Some(ssid) = frame.ssid.as_deref() else {
            return Ok(());
        };
        let Some(network) = self.expected.by_ssid(ssid) else {
            return Ok(());
        };

        if network.bssid(&frame.transmitter).is_none() {
            self.alerts.handle_at(
                Alert::UnexpectedBssid {
                    bssid: frame.transmitter,
                    ssid: ssid.to_string(),
                    channel: frame.meta.channel,
                    antenna_signal: frame.meta.antenna_signal,
                },
                frame.meta.timestamp,
            );
        }
        Ok(())
    }
}

/// A listed BSSID advertising an SSID none of its networks use.
pub struct UnexpectedSsidInterceptor {
    expected: Arc<ExpectedNetworks>,
    alerts: Arc<AlertsService>,
}

impl UnexpectedSsidInterceptor {
    pub fn new(expected: Arc<ExpectedNetworks>, alerts: Arc<AlertsService>) -> Self {
        Self { expected, alerts }
    }
}

impl Interceptor for UnexpectedSsidInterceptor {
    fn name(&self) -> &str {
        "unexpected_ssid"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        ADVERTISEMENTS.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let frame = advertisement(frame)?;
        // Hidden SSIDs are fine.
        let Some(ssid) = frame.ssid.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(());
        };

        let mut listed = false;
        for network in self.expected.listing(&frame.transmitter) {
            if network.ssid == ssid {
                return Ok(());
            }
            listed = true;
        }

        if listed {
            self.alerts.handle_at(
                Alert::UnexpectedSsid {
                    bssid: frame.transmitter,
                    ssid: ssid.to_string(),
                    channel: frame.meta.channel,
                    antenna_signal: frame.meta.antenna_signal,
                },
                frame.meta.timestamp,
            );
        }
        Ok(())
    }
}

pub struct UnexpectedChannelInterceptor {
    expected: Arc<ExpectedNetworks>,
    alerts: Arc<AlertsService>,
}

impl UnexpectedChannelInterceptor {
    pub fn new(expected: Arc<ExpectedNetworks>, alerts: Arc<AlertsService>) -> Self {
        Self { expected, alerts }
    }
}

impl Interceptor for UnexpectedChannelInterceptor {
    fn name(&self) -> &str {
        "unexpected_channel"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        ADVERTISEMENTS.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let frame = advertisement(frame)?;
        let Some((network, _)) = self.expected.monitored_pair(frame) else {
            return Ok(());
        };

        if !network.channels.contains(&frame.meta.channel) {
            self.alerts.handle_at(
                Alert::UnexpectedChannel {
                    bssid: frame.transmitter,
                    ssid: network.ssid.clone(),
                    channel: frame.meta.channel,
                    antenna_signal: frame.meta.antenna_signal,
                },
                frame.meta.timestamp,
            );
        }
        Ok(())
    }
}

/// Only checked for BSSIDs with a non-empty fingerprint list.
pub struct UnexpectedFingerprintInterceptor {
    expected: Arc<ExpectedNetworks>,
    alerts: Arc<AlertsService>,
}

impl UnexpectedFingerprintInterceptor {
    pub fn new(expected: Arc<ExpectedNetworks>, alerts: Arc<AlertsService>) -> Self {
        Self { expected, alerts }
    }
}

impl Interceptor for UnexpectedFingerprintInterceptor {
    fn name(&self) -> &str {
        "unexpected_fingerprint"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        ADVERTISEMENTS.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let frame = advertisement(frame)?;
        let Some((network, bssid)) = self.expected.monitored_pair(frame) else {
            return Ok(());
        };
        if bssid.fingerprints.is_empty() {
            return Ok(());
        }
        let Some(fingerprint) = frame.tagged.fingerprint.as_deref() else {
            return Ok(());
        };

        if !bssid.fingerprints.iter().any(|f| f == fingerprint) {
            self.alerts.handle_at(
                Alert::UnexpectedFingerprint {
                    bssid: frame.transmitter,
                    ssid: network.ssid.clone(),
                    fingerprint: fingerprint.to_string(),
                    channel: frame.meta.channel,
                },
                frame.meta.timestamp,
            );
        }
        Ok(())
    }
}

/// Security configuration outside the expected list, compared on the
/// canonical form (`WPA2-PSK-CCMP`). Networks without a list are skipped.
pub struct CryptoChangeInterceptor {
    expected: Arc<ExpectedNetworks>,
    alerts: Arc<AlertsService>,
}

impl CryptoChangeInterceptor {
    pub fn new(expected: Arc<ExpectedNetworks>, alerts: Arc<AlertsService>) -> Self {
        Self { expected, alerts }
    }
}

impl Interceptor for CryptoChangeInterceptor {
    fn name(&self) -> &str {
        "crypto_change"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        ADVERTISEMENTS.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let frame = advertisement(frame)?;
        let Some((network, _)) = self.expected.monitored_pair(frame) else {
            return Ok(());
        };
        if network.security.is_empty() {
            return Ok(());
        }

        let unexpected: Vec<String> = frame
            .tagged
            .security_configuration()
            .iter()
            .map(|s| s.to_string())
            .filter(|s| !network.security.iter().any(|e| e.eq_ignore_ascii_case(s)))
            .collect();

        if !unexpected.is_empty() {
            self.alerts.handle_at(
                Alert::CryptoChange {
                    bssid: frame.transmitter,
                    ssid: network.ssid.clone(),
                    encountered: unexpected.join(","),
                    channel: frame.meta.channel,
                },
                frame.meta.timestamp,
            );
        }
        Ok(())
    }
}
