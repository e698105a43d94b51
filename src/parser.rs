//! Decoder at the capture seam: radiotap + 802.11 management frames into
//! [`Dot11Frame`] values. Only what the tracking engine consumes is decoded.

use chrono::{DateTime, Utc};
use log::trace;
use sha2::{Digest, Sha256};

use crate::frame::{
    AdvertisementFrame, AssociationFrame, AuthenticationFrame, Cipher, DisconnectFrame,
    Dot11Frame, FrameMeta, FrameSubtype, KeyManagement, MacAddr, ProbeRequestFrame,
    PwnagotchiAdvertisement, SecurityConfiguration, SecurityMode, TaggedParameters,
};

const MGMT_HEADER_LEN: usize = 24;

const TAG_SSID: u8 = 0;
const TAG_SUPPORTED_RATES: u8 = 1;
const TAG_DS_PARAMETER: u8 = 3;
const TAG_HT_CAPABILITIES: u8 = 45;
const TAG_RSN: u8 = 48;
const TAG_EXTENDED_RATES: u8 = 50;
const TAG_EXTENDED_CAPABILITIES: u8 = 127;
const TAG_VHT_CAPABILITIES: u8 = 191;
const TAG_VENDOR: u8 = 221;
const TAG_PWNAGOTCHI: u8 = 222;

const MICROSOFT_OUI: [u8; 3] = [0x00, 0x50, 0xf2];
const IEEE_OUI: [u8; 3] = [0x00, 0x0f, 0xac];

const CAPABILITY_PRIVACY: u16 = 0x0010;
const RADIOTAP_FLAG_FCS: u8 = 0x10;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RadiotapInfo {
    pub length: usize,
    pub frequency: Option<u16>,
    pub antenna_signal: Option<i8>,
    pub has_fcs: bool,
}

/// Decodes one captured packet. Anything that is not a well-formed
/// management frame of a tracked subtype yields `None`.
pub fn parse_packet(data: &[u8], probe: &str, timestamp: DateTime<Utc>) -> Option<Dot11Frame> {
    let radiotap = parse_radiotap_header(data)?;

    let mut frame_data = &data[radiotap.length..];
    if radiotap.has_fcs {
        if frame_data.len() < 4 {
            return None;
        }
        frame_data = &frame_data[..frame_data.len() - 4];
    }

    if frame_data.len() < MGMT_HEADER_LEN {
        return None;
    }

    let frame_control = frame_data[0];
    let frame_type = (frame_control & 0x0C) >> 2;
    let frame_subtype = (frame_control & 0xF0) >> 4;

    if frame_type != 0 {
        return None;
    }
    let subtype = FrameSubtype::from_code(frame_subtype)?;

    let destination = MacAddr::from_slice(&frame_data[4..10])?;
    let transmitter = MacAddr::from_slice(&frame_data[10..16])?;
    let bssid = MacAddr::from_slice(&frame_data[16..22])?;
    let body = &frame_data[MGMT_HEADER_LEN..];

    let mut meta = FrameMeta {
        channel: radiotap.frequency.and_then(frequency_to_channel).unwrap_or(0),
        frequency: radiotap.frequency,
        antenna_signal: radiotap.antenna_signal.map_or(0, i32::from),
        timestamp,
        probe: probe.to_string(),
    };

    let frame = match subtype {
        FrameSubtype::Beacon | FrameSubtype::ProbeResponse => {
            // timestamp(8) + interval(2) + capabilities(2)
            if body.len() < 12 {
                return None;
            }
            let capabilities = u16::from_le_bytes([body[10], body[11]]);
            let tags = parse_tags(&body[12..]);

            if meta.channel == 0 {
                if let Some(ds) = tags.ds_channel {
                    meta.channel = u16::from(ds);
                }
            }

            let advertisement = AdvertisementFrame {
                transmitter,
                destination,
                ssid: tags.ssid.clone(),
                tagged: tags.into_tagged_parameters(capabilities),
                meta,
            };

            if subtype == FrameSubtype::Beacon {
                Dot11Frame::Beacon(advertisement)
            } else {
                Dot11Frame::ProbeResponse(advertisement)
            }
        }
        FrameSubtype::ProbeRequest => Dot11Frame::ProbeRequest(ProbeRequestFrame {
            requester: transmitter,
            ssid: parse_tags(body).ssid,
            meta,
        }),
        FrameSubtype::Deauthentication | FrameSubtype::Disassociation => {
            if body.len() < 2 {
                return None;
            }
            let disconnect = DisconnectFrame {
                transmitter,
                destination,
                bssid,
                reason_code: u16::from_le_bytes([body[0], body[1]]),
                meta,
            };
            if subtype == FrameSubtype::Deauthentication {
                Dot11Frame::Deauthentication(disconnect)
            } else {
                Dot11Frame::Disassociation(disconnect)
            }
        }
        FrameSubtype::Authentication => {
            if body.len() < 6 {
                return None;
            }
            Dot11Frame::Authentication(AuthenticationFrame {
                transmitter,
                destination,
                algorithm: u16::from_le_bytes([body[0], body[1]]),
                transaction_sequence: u16::from_le_bytes([body[2], body[3]]),
                status_code: u16::from_le_bytes([body[4], body[5]]),
                meta,
            })
        }
        FrameSubtype::AssociationRequest => {
            // capabilities(2) + listen interval(2)
            if body.len() < 4 {
                return None;
            }
            Dot11Frame::AssociationRequest(AssociationFrame {
                transmitter,
                destination,
                ssid: parse_tags(&body[4..]).ssid,
                status_code: None,
                meta,
            })
        }
        FrameSubtype::AssociationResponse => {
            // capabilities(2) + status(2) + AID(2)
            if body.len() < 6 {
                return None;
            }
            Dot11Frame::AssociationResponse(AssociationFrame {
                transmitter,
                destination,
                ssid: None,
                status_code: Some(u16::from_le_bytes([body[2], body[3]])),
                meta,
            })
        }
    };

    trace!("Decoded {:?} frame from [{}]", subtype, transmitter);
    Some(frame)
}

pub fn parse_radiotap_header(data: &[u8]) -> Option<RadiotapInfo> {
    if data.len() < 8 || data[0] != 0 {
        return None;
    }

    let header_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if header_len < 8 || data.len() < header_len {
        return None;
    }

    let present = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    // Skip any extended presence bitmaps.
    let mut pos = 8;
    let mut word = present;
    while word & (1 << 31) != 0 {
        if pos + 4 > header_len {
            return None;
        }
        word = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        pos += 4;
    }

    const TSFT_PRESENT: u32 = 1 << 0;
    const FLAGS_PRESENT: u32 = 1 << 1;
    const RATE_PRESENT: u32 = 1 << 2;
    const CHANNEL_PRESENT: u32 = 1 << 3;
    const FHSS_PRESENT: u32 = 1 << 4;
    const ANT_SIGNAL_PRESENT: u32 = 1 << 5;

    let mut info = RadiotapInfo {
        length: header_len,
        ..Default::default()
    };

    if present & TSFT_PRESENT != 0 {
        pos = align(pos, 8) + 8;
    }

    if present & FLAGS_PRESENT != 0 {
        if pos < header_len {
            info.has_fcs = data[pos] & RADIOTAP_FLAG_FCS != 0;
        }
        pos += 1;
    }

    if present & RATE_PRESENT != 0 {
        pos += 1;
    }

    if present & CHANNEL_PRESENT != 0 {
        pos = align(pos, 2);
        if pos + 2 <= header_len {
            info.frequency = Some(u16::from_le_bytes([data[pos], data[pos + 1]]));
        }
        pos += 4;
    }

    if present & FHSS_PRESENT != 0 {
        pos += 2;
    }

    if present & ANT_SIGNAL_PRESENT != 0 && pos < header_len {
        info.antenna_signal = Some(data[pos] as i8);
    }

    Some(info)
}

fn align(pos: usize, to: usize) -> usize {
    (pos + to - 1) & !(to - 1)
}

pub fn frequency_to_channel(frequency: u16) -> Option<u16> {
    match frequency {
        2484 => Some(14),
        2412..=2472 => Some((frequency - 2407) / 5),
        5955..=7115 => Some((frequency - 5950) / 5),
        5000..=5925 => Some((frequency - 5000) / 5),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct ParsedTags {
    ssid: Option<String>,
    ds_channel: Option<u8>,
    rsn: Option<SecurityConfiguration>,
    wpa: Option<SecurityConfiguration>,
    wps: bool,
    fingerprint_material: Vec<u8>,
    pwnagotchi_payload: Vec<u8>,
}

impl ParsedTags {
    fn into_tagged_parameters(self, capabilities: u16) -> TaggedParameters {
        let mut security = Vec::new();
        if let Some(wpa) = self.wpa {
            security.push(wpa);
        }
        if let Some(rsn) = self.rsn {
            security.push(rsn);
        }
        if security.is_empty() && capabilities & CAPABILITY_PRIVACY != 0 {
            security.push(SecurityConfiguration::wep());
        }

        let fingerprint = if self.fingerprint_material.is_empty() {
            None
        } else {
            Some(format!("{:x}", Sha256::digest(&self.fingerprint_material)))
        };

        let pwnagotchi = if self.pwnagotchi_payload.is_empty() {
            None
        } else {
            serde_json::from_slice::<PwnagotchiAdvertisement>(&self.pwnagotchi_payload).ok()
        };

        TaggedParameters {
            security,
            wps: self.wps,
            fingerprint,
            pwnagotchi,
        }
    }
}

fn parse_tags(data: &[u8]) -> ParsedTags {
    let mut tags = ParsedTags::default();
    let mut pos = 0;

    while pos + 2 <= data.len() {
        let number = data[pos];
        let length = data[pos + 1] as usize;
        let start = pos + 2;
        let end = start + length;
        if end > data.len() {
            break;
        }
        let value = &data[start..end];

        match number {
            TAG_SSID => {
                // Hidden networks advertise an empty or all-zero SSID.
                if !value.is_empty() && value.iter().any(|b| *b != 0) {
                    tags.ssid = Some(String::from_utf8_lossy(value).to_string());
                }
            }
            TAG_DS_PARAMETER if length == 1 => tags.ds_channel = Some(value[0]),
            TAG_RSN => {
                tags.rsn = parse_rsn(value, &IEEE_OUI, 0);
                push_fingerprint_material(&mut tags.fingerprint_material, number, value);
            }
            TAG_VENDOR if length >= 4 => {
                if value[..3] == MICROSOFT_OUI {
                    match value[3] {
                        1 => tags.wpa = parse_rsn(&value[4..], &MICROSOFT_OUI, 1),
                        4 => tags.wps = true,
                        _ => {}
                    }
                }
                push_fingerprint_material(&mut tags.fingerprint_material, number, &value[..4]);
            }
            TAG_PWNAGOTCHI => tags.pwnagotchi_payload.extend_from_slice(value),
            TAG_SUPPORTED_RATES | TAG_EXTENDED_RATES | TAG_HT_CAPABILITIES
            | TAG_EXTENDED_CAPABILITIES | TAG_VHT_CAPABILITIES => {
                push_fingerprint_material(&mut tags.fingerprint_material, number, value);
            }
            _ => {}
        }

        pos = end;
    }

    tags
}

fn push_fingerprint_material(material: &mut Vec<u8>, number: u8, value: &[u8]) {
    material.push(number);
    material.extend_from_slice(value);
}

/// RSN and WPA1 share a layout: version, group suite, pairwise suites, AKM
/// suites. `wpa_version` 1 marks the vendor-specific WPA1 element.
fn parse_rsn(value: &[u8], oui: &[u8; 3], wpa_version: u8) -> Option<SecurityConfiguration> {
    // version(2) + group cipher(4) + pairwise count(2)
    if value.len() < 8 {
        return None;
    }
    let mut pos = 6;

    let pairwise_count = u16::from_le_bytes([value[pos], value[pos + 1]]) as usize;
    pos += 2;
    let mut ciphers = Vec::new();
    for _ in 0..pairwise_count {
        let suite = value.get(pos..pos + 4)?;
        if &suite[..3] == oui {
            if let Some(cipher) = cipher_from_suite(suite[3]) {
                ciphers.push(cipher);
            }
        }
        pos += 4;
    }

    let akm_count = u16::from_le_bytes([*value.get(pos)?, *value.get(pos + 1)?]) as usize;
    pos += 2;
    let mut key_management = Vec::new();
    for _ in 0..akm_count {
        let suite = value.get(pos..pos + 4)?;
        if &suite[..3] == oui {
            if let Some(km) = akm_from_suite(suite[3]) {
                key_management.push(km);
            }
        }
        pos += 4;
    }

    let mode = if wpa_version == 1 {
        SecurityMode::Wpa1
    } else if !key_management.is_empty()
        && key_management
            .iter()
            .all(|km| matches!(km, KeyManagement::Sae | KeyManagement::Owe))
    {
        SecurityMode::Wpa3
    } else {
        SecurityMode::Wpa2
    };

    Some(SecurityConfiguration {
        mode,
        key_management,
        ciphers,
    })
}

fn cipher_from_suite(suite: u8) -> Option<Cipher> {
    match suite {
        1 => Some(Cipher::Wep40),
        2 => Some(Cipher::Tkip),
        4 => Some(Cipher::Ccmp),
        5 => Some(Cipher::Wep104),
        8 | 9 => Some(Cipher::Gcmp),
        _ => None,
    }
}

fn akm_from_suite(suite: u8) -> Option<KeyManagement> {
    match suite {
        1 | 3 | 5 => Some(KeyManagement::Eap),
        2 | 4 | 6 => Some(KeyManagement::Psk),
        8 | 9 => Some(KeyManagement::Sae),
        18 => Some(KeyManagement::Owe),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_to_field_boundaries() {
        assert_eq!(align(8, 8), 8);
        assert_eq!(align(9, 8), 16);
        assert_eq!(align(9, 2), 10);
        assert_eq!(align(10, 2), 10);
    }

    #[test]
    fn converts_frequencies() {
        assert_eq!(frequency_to_channel(2412), Some(1));
        assert_eq!(frequency_to_channel(2437), Some(6));
        assert_eq!(frequency_to_channel(2484), Some(14));
        assert_eq!(frequency_to_channel(5180), Some(36));
        assert_eq!(frequency_to_channel(5955), Some(1));
        assert_eq!(frequency_to_channel(900), None);
    }

    #[test]
    fn parses_wpa2_psk_rsn() {
        let rsn = [
            0x01, 0x00, // version
            0x00, 0x0f, 0xac, 0x04, // group CCMP
            0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, // pairwise CCMP
            0x01, 0x00, 0x00, 0x0f, 0xac, 0x02, // AKM PSK
        ];
        let security = parse_rsn(&rsn, &IEEE_OUI, 0).unwrap();
        assert_eq!(security.to_string(), "WPA2-PSK-CCMP");
    }

    #[test]
    fn parses_sae_only_as_wpa3() {
        let rsn = [
            0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x01, 0x00,
            0x00, 0x0f, 0xac, 0x08,
        ];
        assert_eq!(parse_rsn(&rsn, &IEEE_OUI, 0).unwrap().mode, SecurityMode::Wpa3);
    }

    #[test]
    fn truncated_rsn_is_rejected() {
        let rsn = [0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x02, 0x00, 0x00, 0x0f];
        assert!(parse_rsn(&rsn, &IEEE_OUI, 0).is_none());
    }

    #[test]
    fn hidden_ssid_is_none() {
        let tags = parse_tags(&[TAG_SSID, 3, 0, 0, 0]);
        assert!(tags.ssid.is_none());
        let tags = parse_tags(&[TAG_SSID, 0]);
        assert!(tags.ssid.is_none());
    }
}
