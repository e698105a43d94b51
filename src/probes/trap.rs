//! Deception transmissions sent by sender probes, plus the interceptors
//! that catch whoever takes the bait.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alerts::{Alert, AlertsService};
use crate::config::TrapDefinition;
use crate::error::{InterceptorError, TrapError};
use crate::frame::{Dot11Frame, FrameSubtype, MacAddr};
use crate::processor::Interceptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapType {
    ProbeRequest,
}

impl TrapType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "probe_request" | "probe_request_1" => Some(TrapType::ProbeRequest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrapDescription {
    pub trap_type: TrapType,
    pub description: String,
}

pub trait Trap: Send + Sync {
    fn trap_type(&self) -> TrapType;

    fn description(&self) -> String;

    /// Raw radiotap-framed packets transmitted once per round.
    fn frames(&self) -> Vec<Vec<u8>>;

    /// Pause between rounds.
    fn delay(&self) -> Duration;

    /// Interceptors to register with the frame processor at startup.
    fn interceptors(&self) -> Vec<Arc<dyn Interceptor>>;

    fn describe(&self) -> TrapDescription {
        TrapDescription {
            trap_type: self.trap_type(),
            description: self.description(),
        }
    }
}

pub fn build_trap(definition: &TrapDefinition, alerts: Arc<AlertsService>) -> Result<Arc<dyn Trap>, TrapError> {
    match TrapType::from_name(&definition.trap_type) {
        Some(TrapType::ProbeRequest) => {
            let config: ProbeRequestTrapConfig =
                serde_json::from_value(Value::Object(definition.configuration.clone())).map_err(|e| {
                    TrapError::Mapping {
                        trap_type: definition.trap_type.clone(),
                        reason: e.to_string(),
                    }
                })?;
            if config.ssids.is_empty() {
                return Err(TrapError::Mapping {
                    trap_type: definition.trap_type.clone(),
                    reason: "at least one SSID is required".to_string(),
                });
            }
            if config.delay_seconds == 0 {
                return Err(TrapError::Mapping {
                    trap_type: definition.trap_type.clone(),
                    reason: "delay_seconds must be at least one second".to_string(),
                });
            }
            Ok(Arc::new(ProbeRequestTrap::new(config, alerts)))
        }
        None => Err(TrapError::NoSuchType(definition.trap_type.clone())),
    }
}

fn default_transmitter() -> MacAddr {
    // Locally administered.
    MacAddr([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01])
}

fn default_delay_seconds() -> u64 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeRequestTrapConfig {
    pub ssids: Vec<String>,
    #[serde(default = "default_transmitter")]
    pub transmitter: MacAddr,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
}

/// Probes for decoy SSIDs that no legitimate access point around here
/// serves. Any probe response for one of them comes from a responder that
/// answers every probe (karma style).
pub struct ProbeRequestTrap {
    config: ProbeRequestTrapConfig,
    alerts: Arc<AlertsService>,
}

impl ProbeRequestTrap {
    pub fn new(config: ProbeRequestTrapConfig, alerts: Arc<AlertsService>) -> Self {
        Self { config, alerts }
    }

    pub fn ssids(&self) -> &[String] {
        &self.config.ssids
    }
}

impl Trap for ProbeRequestTrap {
    fn trap_type(&self) -> TrapType {
        TrapType::ProbeRequest
    }

    fn description(&self) -> String {
        format!(
            "Probe requests for [{}] from {} every {}s",
            self.config.ssids.join(", "),
            self.config.transmitter,
            self.config.delay_seconds
        )
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        self.config
            .ssids
            .iter()
            .map(|ssid| build_probe_request(&self.config.transmitter, ssid))
            .collect()
    }

    fn delay(&self) -> Duration {
        Duration::from_secs(self.config.delay_seconds)
    }

    fn interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        vec![Arc::new(ProbeResponseTrapInterceptor {
            ssids: self.config.ssids.clone(),
            alerts: Arc::clone(&self.alerts),
        })]
    }
}

pub struct ProbeResponseTrapInterceptor {
    ssids: Vec<String>,
    alerts: Arc<AlertsService>,
}

impl Interceptor for ProbeResponseTrapInterceptor {
    fn name(&self) -> &str {
        "probe_response_trap"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        vec![FrameSubtype::ProbeResponse]
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        let Dot11Frame::ProbeResponse(response) = frame else {
            return Err(InterceptorError::MissingField(frame.subtype(), "probe response body"));
        };
        let Some(ssid) = response.ssid.as_deref() else {
            return Ok(());
        };

        if self.ssids.iter().any(|s| s == ssid) {
            self.alerts.handle_at(
                Alert::ProbeResponseTrap {
                    bssid: response.transmitter,
                    ssid: ssid.to_string(),
                    channel: response.meta.channel,
                    antenna_signal: response.meta.antenna_signal,
                },
                response.meta.timestamp,
            );
        }
        Ok(())
    }
}

const SUPPORTED_RATES: [u8; 8] = [0x82, 0x84, 0x8b, 0x96, 0x0c, 0x12, 0x18, 0x24];

/// Minimal radiotap header (no fields) followed by a broadcast probe
/// request carrying the SSID and supported rates tags.
pub fn build_probe_request(transmitter: &MacAddr, ssid: &str) -> Vec<u8> {
    let ssid = &ssid.as_bytes()[..ssid.len().min(32)];
    let mut frame = Vec::with_capacity(8 + 24 + 2 + ssid.len() + 2 + SUPPORTED_RATES.len());

    // radiotap: version, pad, length (LE), present flags
    frame.extend_from_slice(&[0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]);

    // frame control (probe request), duration
    frame.extend_from_slice(&[0x40, 0x00, 0x00, 0x00]);
    frame.extend_from_slice(&MacAddr::BROADCAST.octets());
    frame.extend_from_slice(&transmitter.octets());
    frame.extend_from_slice(&MacAddr::BROADCAST.octets());
    // sequence control
    frame.extend_from_slice(&[0x00, 0x00]);

    frame.push(0);
    frame.push(ssid.len() as u8);
    frame.extend_from_slice(ssid);

    frame.push(1);
    frame.push(SUPPORTED_RATES.len() as u8);
    frame.extend_from_slice(&SUPPORTED_RATES);

    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::alerts::{AlertType, MemoryAlertSink};
    use crate::frame::{AdvertisementFrame, FrameMeta, TaggedParameters};
    use crate::parser::parse_packet;

    fn definition(trap_type: &str, configuration: Value) -> TrapDefinition {
        TrapDefinition {
            trap_type: trap_type.to_string(),
            configuration: configuration.as_object().cloned().unwrap_or_default(),
        }
    }

    fn alerts(sink: Arc<MemoryAlertSink>) -> Arc<AlertsService> {
        Arc::new(AlertsService::all_enabled(sink))
    }

    #[test]
    fn transmitted_frames_decode_as_probe_requests() {
        let trap = build_trap(
            &definition("probe_request_1", json!({"ssids": ["decoy"]})),
            alerts(Arc::new(MemoryAlertSink::new())),
        )
        .unwrap();

        let frames = trap.frames();
        assert_eq!(frames.len(), 1);
        match parse_packet(&frames[0], "sender", Utc::now()) {
            Some(Dot11Frame::ProbeRequest(request)) => {
                assert_eq!(request.ssid.as_deref(), Some("decoy"));
                assert_eq!(request.requester, default_transmitter());
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn bad_definitions_are_rejected() {
        let sink = Arc::new(MemoryAlertSink::new());
        assert!(matches!(
            build_trap(&definition("beacon_9", json!({})), alerts(sink.clone())),
            Err(TrapError::NoSuchType(_))
        ));
        assert!(matches!(
            build_trap(&definition("probe_request", json!({})), alerts(sink.clone())),
            Err(TrapError::Mapping { .. })
        ));
        assert!(matches!(
            build_trap(&definition("probe_request", json!({"ssids": []})), alerts(sink)),
            Err(TrapError::Mapping { .. })
        ));
    }

    #[test]
    fn responses_to_decoys_raise_alert() {
        let sink = Arc::new(MemoryAlertSink::new());
        let trap = build_trap(
            &definition("probe_request", json!({"ssids": ["decoy"]})),
            alerts(sink.clone()),
        )
        .unwrap();
        let interceptor = &trap.interceptors()[0];

        for ssid in ["decoy", "CorpNet"] {
            let response = Dot11Frame::ProbeResponse(AdvertisementFrame {
                transmitter: MacAddr([0, 0x13, 0x37, 0, 0, 1]),
                destination: default_transmitter(),
                ssid: Some(ssid.to_string()),
                tagged: TaggedParameters::default(),
                meta: FrameMeta::new(6, -30, Utc::now()),
            });
            interceptor.intercept(&response).unwrap();
        }

        assert_eq!(sink.count(AlertType::ProbeResponseTrap), 1);
    }
}
