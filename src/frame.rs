//! Parsed 802.11 management frames and their radio metadata.
//!
//! Everything here is an immutable value type. Frames are produced by the
//! decoder at the capture seam and then shared read-only with every
//! interceptor.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(MacAddr(octets))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// First three octets, used for vendor lookups.
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMacError(String);

impl fmt::Display for ParseMacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address [{}]", self.0)
    }
}

impl std::error::Error for ParseMacError {}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(|c| c == ':' || c == '-');

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }

        Ok(MacAddr(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSubtype {
    AssociationRequest,
    AssociationResponse,
    ProbeRequest,
    ProbeResponse,
    Beacon,
    Disassociation,
    Authentication,
    Deauthentication,
}

impl FrameSubtype {
    pub const ALL: [FrameSubtype; 8] = [
        FrameSubtype::AssociationRequest,
        FrameSubtype::AssociationResponse,
        FrameSubtype::ProbeRequest,
        FrameSubtype::ProbeResponse,
        FrameSubtype::Beacon,
        FrameSubtype::Disassociation,
        FrameSubtype::Authentication,
        FrameSubtype::Deauthentication,
    ];

    /// Management subtype code from the frame control field.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FrameSubtype::AssociationRequest),
            1 => Some(FrameSubtype::AssociationResponse),
            4 => Some(FrameSubtype::ProbeRequest),
            5 => Some(FrameSubtype::ProbeResponse),
            8 => Some(FrameSubtype::Beacon),
            10 => Some(FrameSubtype::Disassociation),
            11 => Some(FrameSubtype::Authentication),
            12 => Some(FrameSubtype::Deauthentication),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            FrameSubtype::AssociationRequest => 0,
            FrameSubtype::AssociationResponse => 1,
            FrameSubtype::ProbeRequest => 4,
            FrameSubtype::ProbeResponse => 5,
            FrameSubtype::Beacon => 8,
            FrameSubtype::Disassociation => 10,
            FrameSubtype::Authentication => 11,
            FrameSubtype::Deauthentication => 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMeta {
    pub channel: u16,
    pub frequency: Option<u16>,
    /// Antenna signal in dBm.
    pub antenna_signal: i32,
    pub timestamp: DateTime<Utc>,
    /// Name of the probe that captured the frame.
    pub probe: String,
}

impl FrameMeta {
    pub fn new(channel: u16, antenna_signal: i32, timestamp: DateTime<Utc>) -> Self {
        Self {
            channel,
            frequency: None,
            antenna_signal,
            timestamp,
            probe: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityMode {
    None,
    Wep,
    Wpa1,
    Wpa2,
    Wpa3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyManagement {
    Psk,
    Eap,
    Sae,
    Owe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cipher {
    Wep40,
    Tkip,
    Ccmp,
    Wep104,
    Gcmp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityConfiguration {
    pub mode: SecurityMode,
    pub key_management: Vec<KeyManagement>,
    pub ciphers: Vec<Cipher>,
}

impl SecurityConfiguration {
    pub fn open() -> Self {
        Self {
            mode: SecurityMode::None,
            key_management: Vec::new(),
            ciphers: Vec::new(),
        }
    }

    pub fn wep() -> Self {
        Self {
            mode: SecurityMode::Wep,
            key_management: Vec::new(),
            ciphers: Vec::new(),
        }
    }
}

/// Canonical form used by expected-network configuration, e.g. `WPA2-PSK-CCMP`.
impl fmt::Display for SecurityConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            SecurityMode::None => return f.write_str("NONE"),
            SecurityMode::Wep => return f.write_str("WEP"),
            SecurityMode::Wpa1 => "WPA1",
            SecurityMode::Wpa2 => "WPA2",
            SecurityMode::Wpa3 => "WPA3",
        };
        f.write_str(mode)?;

        for km in &self.key_management {
            let s = match km {
                KeyManagement::Psk => "PSK",
                KeyManagement::Eap => "EAP",
                KeyManagement::Sae => "SAE",
                KeyManagement::Owe => "OWE",
            };
            write!(f, "-{}", s)?;
        }
        for cipher in &self.ciphers {
            let s = match cipher {
                Cipher::Wep40 => "WEP40",
                Cipher::Tkip => "TKIP",
                Cipher::Ccmp => "CCMP",
                Cipher::Wep104 => "WEP104",
                Cipher::Gcmp => "GCMP",
            };
            write!(f, "-{}", s)?;
        }
        Ok(())
    }
}

/// Advertisement broadcast by a pwnagotchi inside vendor IE 222.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PwnagotchiAdvertisement {
    pub identity: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub pwnd_run: u64,
    #[serde(default)]
    pub pwnd_tot: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaggedParameters {
    pub security: Vec<SecurityConfiguration>,
    pub wps: bool,
    pub fingerprint: Option<String>,
    pub pwnagotchi: Option<PwnagotchiAdvertisement>,
}

impl TaggedParameters {
    /// Security as advertised, falling back to open when nothing was found.
    pub fn security_configuration(&self) -> Vec<SecurityConfiguration> {
        if self.security.is_empty() {
            vec![SecurityConfiguration::open()]
        } else {
            self.security.clone()
        }
    }
}

/// Beacon or probe response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvertisementFrame {
    pub transmitter: MacAddr,
    pub destination: MacAddr,
    /// `None` for hidden/broadcast SSIDs.
    pub ssid: Option<String>,
    pub tagged: TaggedParameters,
    pub meta: FrameMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeRequestFrame {
    pub requester: MacAddr,
    pub ssid: Option<String>,
    pub meta: FrameMeta,
}

impl ProbeRequestFrame {
    pub fn is_broadcast(&self) -> bool {
        self.ssid.as_deref().map_or(true, str::is_empty)
    }
}

/// Deauthentication or disassociation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisconnectFrame {
    pub transmitter: MacAddr,
    pub destination: MacAddr,
    pub bssid: MacAddr,
    pub reason_code: u16,
    pub meta: FrameMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticationFrame {
    pub transmitter: MacAddr,
    pub destination: MacAddr,
    pub algorithm: u16,
    pub transaction_sequence: u16,
    pub status_code: u16,
    pub meta: FrameMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationFrame {
    pub transmitter: MacAddr,
    pub destination: MacAddr,
    pub ssid: Option<String>,
    pub status_code: Option<u16>,
    pub meta: FrameMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum Dot11Frame {
    Beacon(AdvertisementFrame),
    ProbeResponse(AdvertisementFrame),
    ProbeRequest(ProbeRequestFrame),
    Deauthentication(DisconnectFrame),
    Disassociation(DisconnectFrame),
    Authentication(AuthenticationFrame),
    AssociationRequest(AssociationFrame),
    AssociationResponse(AssociationFrame),
}

impl Dot11Frame {
    pub fn subtype(&self) -> FrameSubtype {
        match self {
            Dot11Frame::Beacon(_) => FrameSubtype::Beacon,
            Dot11Frame::ProbeResponse(_) => FrameSubtype::ProbeResponse,
            Dot11Frame::ProbeRequest(_) => FrameSubtype::ProbeRequest,
            Dot11Frame::Deauthentication(_) => FrameSubtype::Deauthentication,
            Dot11Frame::Disassociation(_) => FrameSubtype::Disassociation,
            Dot11Frame::Authentication(_) => FrameSubtype::Authentication,
            Dot11Frame::AssociationRequest(_) => FrameSubtype::AssociationRequest,
            Dot11Frame::AssociationResponse(_) => FrameSubtype::AssociationResponse,
        }
    }

    pub fn meta(&self) -> &FrameMeta {
        match self {
            Dot11Frame::Beacon(f) | Dot11Frame::ProbeResponse(f) => &f.meta,
            Dot11Frame::ProbeRequest(f) => &f.meta,
            Dot11Frame::Deauthentication(f) | Dot11Frame::Disassociation(f) => &f.meta,
            Dot11Frame::Authentication(f) => &f.meta,
            Dot11Frame::AssociationRequest(f) | Dot11Frame::AssociationResponse(f) => &f.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut FrameMeta {
        match self {
            Dot11Frame::Beacon(f) | Dot11Frame::ProbeResponse(f) => &mut f.meta,
            Dot11Frame::ProbeRequest(f) => &mut f.meta,
            Dot11Frame::Deauthentication(f) | Dot11Frame::Disassociation(f) => &mut f.meta,
            Dot11Frame::Authentication(f) => &mut f.meta,
            Dot11Frame::AssociationRequest(f) | Dot11Frame::AssociationResponse(f) => &mut f.meta,
        }
    }

    pub fn transmitter(&self) -> MacAddr {
        match self {
            Dot11Frame::Beacon(f) | Dot11Frame::ProbeResponse(f) => f.transmitter,
            Dot11Frame::ProbeRequest(f) => f.requester,
            Dot11Frame::Deauthentication(f) | Dot11Frame::Disassociation(f) => f.transmitter,
            Dot11Frame::Authentication(f) => f.transmitter,
            Dot11Frame::AssociationRequest(f) | Dot11Frame::AssociationResponse(f) => f.transmitter,
        }
    }

    /// Only advertisements carry enough tagged parameters to fingerprint.
    pub fn transmitter_fingerprint(&self) -> Option<&str> {
        self.advertisement()?.tagged.fingerprint.as_deref()
    }

    pub fn ssid(&self) -> Option<&str> {
        match self {
            Dot11Frame::Beacon(f) | Dot11Frame::ProbeResponse(f) => f.ssid.as_deref(),
            Dot11Frame::ProbeRequest(f) => f.ssid.as_deref(),
            Dot11Frame::AssociationRequest(f) | Dot11Frame::AssociationResponse(f) => f.ssid.as_deref(),
            _ => None,
        }
    }

    pub fn advertisement(&self) -> Option<&AdvertisementFrame> {
        match self {
            Dot11Frame::Beacon(f) | Dot11Frame::ProbeResponse(f) => Some(f),
            _ => None,
        }
    }

    pub fn antenna_signal(&self) -> i32 {
        self.meta().antenna_signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parses_any_case_and_displays_lowercase() {
        let mac: MacAddr = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!("aa-bb-cc-dd-ee-ff".parse::<MacAddr>().unwrap(), mac);
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddr>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddr>().is_err());
    }

    #[test]
    fn security_display_is_canonical() {
        let wpa2 = SecurityConfiguration {
            mode: SecurityMode::Wpa2,
            key_management: vec![KeyManagement::Psk],
            ciphers: vec![Cipher::Ccmp],
        };
        assert_eq!(wpa2.to_string(), "WPA2-PSK-CCMP");
        assert_eq!(SecurityConfiguration::open().to_string(), "NONE");
        assert_eq!(SecurityConfiguration::wep().to_string(), "WEP");
    }

    #[test]
    fn subtype_codes_round_trip() {
        for subtype in FrameSubtype::ALL {
            assert_eq!(FrameSubtype::from_code(subtype.code()), Some(subtype));
        }
        assert_eq!(FrameSubtype::from_code(13), None);
    }
}
