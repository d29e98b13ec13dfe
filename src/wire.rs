//! JSON wire protocol for WLED-style segment controllers.
//!
//! Write payloads are segment-scoped: power and brightness at the top
//! level, color as either a single RGB triple or a per-LED hex array, and
//! an optional CCT channel. The read endpoint returns full device info and
//! state in one document. Anything the firmware does not report is treated
//! as an absent capability, never as an error.

use std::collections::BTreeMap;

use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::color::to_hex;
use crate::intent::{ColorIntent, ColorMode};

/// Malformed or unsupported device response.
#[derive(Debug, Display, Error, From)]
pub enum ProtocolError {
    #[display("response is not valid JSON: {_0}")]
    #[from]
    Json(#[error(source)] serde_json::Error),
    #[display("response is missing required field `{field}`")]
    MissingField { field: &'static str },
}

/// Top-level write payload for the state endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seg: Vec<SegmentWrite>,
    /// Save the device's current state into preset slot `psave`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psave: Option<u16>,
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist: Option<PlaylistWrite>,
}

/// Multi-step playlist payload: preset references with per-step dwell and
/// crossfade times in tenths of a second.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaylistWrite {
    pub ps: Vec<u16>,
    pub dur: Vec<u32>,
    pub transition: Vec<u32>,
    /// 0 repeats indefinitely.
    pub repeat: u32,
}

/// Segment-scoped part of a write payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SegmentWrite {
    pub id: u8,
    /// Single color, as one RGB triple.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col: Option<Vec<[u8; 3]>>,
    /// Per-LED hex color array.
    #[serde(rename = "i", skip_serializing_if = "Option::is_none")]
    pub per_led: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cct: Option<u8>,
    /// Effect id, for effect presets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fx: Option<u16>,
    /// Effect parameters, inlined into the segment object.
    #[serde(flatten)]
    pub fx_params: serde_json::Map<String, serde_json::Value>,
}

/// Encode an intent as a state write.
///
/// `allow_cct` is the device capability gate: when the firmware does not
/// report a CCT channel the field is omitted entirely.
pub fn encode_intent(intent: &ColorIntent, allow_cct: bool) -> StateWrite {
    let mut segment = SegmentWrite {
        id: intent.segment_id,
        ..SegmentWrite::default()
    };
    match &intent.mode {
        ColorMode::Solid(color) => {
            segment.col = Some(vec![[color.r, color.g, color.b]]);
        }
        ColorMode::PerLed(frame) if !frame.is_empty() => {
            segment.per_led = Some(frame.iter().map(|&c| to_hex(c)).collect());
        }
        ColorMode::PerLed(_) => {}
    }
    if allow_cct {
        segment.cct = intent.cct;
    }

    let has_segment_payload = segment.col.is_some() || segment.per_led.is_some() || segment.cct.is_some();
    StateWrite {
        on: intent.power,
        bri: intent.brightness,
        seg: if has_segment_payload { vec![segment] } else { Vec::new() },
        psave: None,
        name: None,
        playlist: None,
    }
}

/// Full response of the read endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub state: StateRead,
    pub info: InfoRead,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateRead {
    #[serde(default)]
    pub on: Option<bool>,
    #[serde(default)]
    pub bri: Option<u8>,
    #[serde(default)]
    pub seg: Vec<SegmentRead>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentRead {
    #[serde(default)]
    pub id: u8,
    #[serde(default)]
    pub start: Option<u16>,
    #[serde(default)]
    pub stop: Option<u16>,
    #[serde(default)]
    pub len: Option<u16>,
    #[serde(default)]
    pub on: Option<bool>,
    #[serde(default)]
    pub bri: Option<u8>,
    #[serde(default)]
    pub cct: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfoRead {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub leds: Option<LedsInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedsInfo {
    #[serde(default)]
    pub count: Option<u16>,
    /// Per-segment LED counts, when the firmware reports them.
    #[serde(default)]
    pub seglc: Option<Vec<u16>>,
    #[serde(default)]
    pub cct: Option<bool>,
    /// Kelvin bounds of the CCT channel, `[min, max]`.
    #[serde(rename = "cctRange", default)]
    pub cct_range: Option<[u16; 2]>,
}

/// One controllable segment as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: u8,
    pub led_count: usize,
}

/// Feature gates derived from the device's info document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Device accepts a CCT value alongside a per-LED payload.
    pub cct: bool,
    pub kelvin_range: Option<(u16, u16)>,
}

/// Typed view of a device read, used for reconciliation and capability
/// gating.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceView {
    pub name: Option<String>,
    pub segments: Vec<SegmentInfo>,
    pub capabilities: DeviceCapabilities,
    pub power: Option<bool>,
    pub brightness: Option<u8>,
}

impl DeviceView {
    pub fn segment(&self, id: u8) -> Option<SegmentInfo> {
        self.segments.iter().copied().find(|s| s.id == id)
    }
}

/// Parse a read-endpoint response into a [`DeviceView`].
pub fn parse_status(json: &str) -> Result<DeviceView, ProtocolError> {
    let status: StatusResponse = serde_json::from_str(json)?;
    let leds = status.info.leds.ok_or(ProtocolError::MissingField {
        field: "info.leds",
    })?;

    let mut segments: Vec<SegmentInfo> = status
        .state
        .seg
        .iter()
        .filter_map(|seg| {
            let led_count = seg
                .len
                .or_else(|| match (seg.start, seg.stop) {
                    (Some(start), Some(stop)) if stop > start => Some(stop - start),
                    _ => None,
                })?;
            Some(SegmentInfo {
                id: seg.id,
                led_count: led_count as usize,
            })
        })
        .collect();

    if segments.is_empty() {
        if let Some(lengths) = &leds.seglc {
            #[allow(clippy::cast_possible_truncation)]
            {
                segments = lengths
                    .iter()
                    .enumerate()
                    .map(|(i, &len)| SegmentInfo {
                        id: i as u8,
                        led_count: len as usize,
                    })
                    .collect();
            }
        }
    }
    if segments.is_empty() {
        let count = leds.count.ok_or(ProtocolError::MissingField {
            field: "info.leds.count",
        })?;
        segments.push(SegmentInfo {
            id: 0,
            led_count: count as usize,
        });
    }

    Ok(DeviceView {
        name: status.info.name,
        segments,
        capabilities: DeviceCapabilities {
            cct: leds.cct.unwrap_or(false),
            kelvin_range: leds.cct_range.map(|[min, max]| (min, max)),
        },
        power: status.state.on,
        brightness: status.state.bri,
    })
}

/// Parse the device's preset table endpoint.
///
/// The document maps slot ids to preset objects; empty objects are
/// placeholder slots and are not considered occupied. Non-numeric keys are
/// ignored.
pub fn parse_preset_table(json: &str) -> Result<BTreeMap<u16, serde_json::Value>, ProtocolError> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| {
            let slot: u16 = key.parse().ok()?;
            let occupied = value.as_object().is_some_and(|o| !o.is_empty());
            occupied.then_some((slot, value))
        })
        .collect())
}

/// True when a preset table entry is a multi-step playlist.
pub fn is_playlist_entry(entry: &serde_json::Value) -> bool {
    entry.get("playlist").is_some()
}
