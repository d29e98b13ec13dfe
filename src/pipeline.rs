//! Color pipeline: encodes intents to the wire and performs device I/O.
//!
//! One pipeline instance belongs to one device's owner. Writes are single
//! attempts; a failed live edit is returned to the caller and never
//! retried, since a stale retry could fight a newer edit.

use std::collections::BTreeMap;

use derive_more::{Display, Error, From};
use log::debug;

use crate::DeviceTransport;
use crate::color::Gradient;
use crate::intent::{ColorIntent, ColorMode, DeviceId, build_intent};
use crate::preset::{
    PLAYLIST_SLOTS, Preset, PresetDevice, PresetPayload, SINGLE_PRESET_SLOTS, lowest_free_slot,
};
use crate::transport::TransportError;
use crate::wire::{self, DeviceView, PlaylistWrite, ProtocolError, SegmentWrite, StateWrite};

/// State write endpoint.
pub const STATE_PATH: &str = "/json/state";
/// Combined info + state read endpoint.
pub const STATUS_PATH: &str = "/json";
/// Device-side preset table endpoint.
pub const PRESETS_PATH: &str = "/presets.json";

#[derive(Debug, Display, Error, From)]
pub enum PipelineError {
    #[display("transport: {_0}")]
    #[from]
    Transport(#[error(source)] TransportError),
    #[display("protocol: {_0}")]
    #[from]
    Protocol(#[error(source)] ProtocolError),
    #[display("unknown segment {segment_id}")]
    UnknownSegment { segment_id: u8 },
    #[display("frame length {got} does not match segment LED count {expected}")]
    FrameSizeMismatch { expected: usize, got: usize },
    #[display("payload serialization failed: {_0}")]
    #[from]
    Encode(#[error(source)] serde_json::Error),
    #[display("no free slot left in the device preset range")]
    PresetSpaceExhausted,
}

/// Intent dispatch and device reads for a single controller.
pub struct ColorPipeline<T> {
    device_id: DeviceId,
    transport: T,
    view: Option<DeviceView>,
}

impl<T: DeviceTransport> ColorPipeline<T> {
    pub fn new(device_id: DeviceId, transport: T) -> Self {
        Self {
            device_id,
            transport,
            view: None,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The last successfully read device view, if any.
    pub fn view(&self) -> Option<&DeviceView> {
        self.view.as_ref()
    }

    /// Read the device and refresh the cached view.
    pub fn refresh(&mut self) -> Result<&DeviceView, PipelineError> {
        let body = self.transport.get(STATUS_PATH)?;
        let view = wire::parse_status(&body)?;
        debug!(
            "[{}] device view: {} segment(s), cct={}",
            self.device_id,
            view.segments.len(),
            view.capabilities.cct
        );
        Ok(self.view.insert(view))
    }

    /// LED count of a segment, when the device has been read.
    pub fn segment_led_count(&self, segment_id: u8) -> Option<usize> {
        self.view
            .as_ref()
            .and_then(|v| v.segment(segment_id))
            .map(|s| s.led_count)
    }

    /// Whether the device accepts the CCT channel. Unknown devices are
    /// treated as not supporting it, gating the feature off.
    pub fn supports_cct(&self) -> bool {
        self.view
            .as_ref()
            .is_some_and(|v| v.capabilities.cct)
    }

    /// Encode and write one intent. No retry on failure.
    pub fn send(&self, intent: &ColorIntent) -> Result<(), PipelineError> {
        self.validate(intent)?;
        let write = wire::encode_intent(intent, self.supports_cct());
        let body = serde_json::to_string(&write)?;
        debug!(
            "[{}] seg {} write ({} bytes)",
            self.device_id,
            intent.segment_id,
            body.len()
        );
        self.transport.post(STATE_PATH, &body)?;
        Ok(())
    }

    /// Per-LED frames must match the segment LED count exactly. The check
    /// only applies once the device topology is known.
    fn validate(&self, intent: &ColorIntent) -> Result<(), PipelineError> {
        let ColorMode::PerLed(frame) = &intent.mode else {
            return Ok(());
        };
        if frame.is_empty() {
            return Ok(());
        }
        let Some(view) = &self.view else {
            return Ok(());
        };
        let segment = view
            .segment(intent.segment_id)
            .ok_or(PipelineError::UnknownSegment {
                segment_id: intent.segment_id,
            })?;
        if frame.len() != segment.led_count {
            return Err(PipelineError::FrameSizeMismatch {
                expected: segment.led_count,
                got: frame.len(),
            });
        }
        Ok(())
    }

    /// Fetch the device's occupied preset slots.
    pub fn preset_table(&self) -> Result<BTreeMap<u16, serde_json::Value>, PipelineError> {
        let body = self.transport.get(PRESETS_PATH)?;
        Ok(wire::parse_preset_table(&body)?)
    }

    /// Push a state payload into a device preset slot.
    pub fn save_device_preset(
        &self,
        slot: u16,
        name: &str,
        mut state: StateWrite,
    ) -> Result<(), PipelineError> {
        state.psave = Some(slot);
        state.name = Some(name.to_string());
        let body = serde_json::to_string(&state)?;
        debug!("[{}] saving preset slot {slot}", self.device_id);
        self.transport.post(STATE_PATH, &body)?;
        Ok(())
    }

    /// Serialize and write a prebuilt state payload.
    pub(crate) fn send_state(&self, state: &StateWrite) -> Result<(), PipelineError> {
        let body = serde_json::to_string(state)?;
        self.transport.post(STATE_PATH, &body)?;
        Ok(())
    }

    /// First reported segment, falling back to segment 0 for devices that
    /// have not been read yet.
    pub(crate) fn main_segment_id(&self) -> u8 {
        self.view
            .as_ref()
            .and_then(|v| v.segments.first())
            .map_or(0, |s| s.id)
    }

    pub(crate) fn color_state(
        &self,
        gradient: &Gradient,
        cct: Option<f64>,
        brightness: u8,
    ) -> StateWrite {
        let segment_id = self.main_segment_id();
        let led_count = self
            .segment_led_count(segment_id)
            .unwrap_or(FALLBACK_FRAME_LEN);
        let temperatures = cct.map(|t| vec![t; gradient.stops().len()]);
        let intent = build_intent(
            &self.device_id,
            segment_id,
            led_count,
            gradient,
            temperatures.as_deref(),
        )
        .with_brightness(brightness)
        .with_power(true);
        wire::encode_intent(&intent, self.supports_cct())
    }

    pub(crate) fn effect_state(
        &self,
        effect_id: u16,
        params: &serde_json::Value,
        brightness: u8,
    ) -> StateWrite {
        let mut segment = SegmentWrite {
            id: self.main_segment_id(),
            fx: Some(effect_id),
            ..SegmentWrite::default()
        };
        if let Some(map) = params.as_object() {
            segment.fx_params = map.clone();
        }
        StateWrite {
            on: Some(true),
            bri: Some(brightness),
            seg: vec![segment],
            ..StateWrite::default()
        }
    }
}

/// Per-LED resolution for preset payloads when the topology is unknown.
pub(crate) const FALLBACK_FRAME_LEN: usize = 30;

impl<T: DeviceTransport> PresetDevice for ColorPipeline<T> {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Place a preset into the device's id space.
    ///
    /// Color and effect presets take the lowest free single slot.
    /// Transition presets are placed as a playlist: the two endpoint
    /// states go into single slots first, then the playlist referencing
    /// them takes the lowest free slot in the playlist range.
    fn sync_preset(&self, preset: &Preset) -> Result<u16, PipelineError> {
        let mut table = self.preset_table()?;
        match &preset.payload {
            PresetPayload::Color {
                gradient,
                cct,
                brightness,
            } => {
                let slot = lowest_free_slot(&table, SINGLE_PRESET_SLOTS)
                    .ok_or(PipelineError::PresetSpaceExhausted)?;
                self.save_device_preset(
                    slot,
                    &preset.name,
                    self.color_state(gradient, *cct, *brightness),
                )?;
                Ok(slot)
            }
            PresetPayload::Effect {
                effect_id,
                params,
                brightness,
            } => {
                let slot = lowest_free_slot(&table, SINGLE_PRESET_SLOTS)
                    .ok_or(PipelineError::PresetSpaceExhausted)?;
                self.save_device_preset(
                    slot,
                    &preset.name,
                    self.effect_state(*effect_id, params, *brightness),
                )?;
                Ok(slot)
            }
            PresetPayload::Transition {
                gradient_a,
                brightness_a,
                gradient_b,
                brightness_b,
                duration_secs,
                frame_rate: _,
            } => {
                let slot_a = lowest_free_slot(&table, SINGLE_PRESET_SLOTS)
                    .ok_or(PipelineError::PresetSpaceExhausted)?;
                table.insert(slot_a, serde_json::Value::Bool(true));
                let slot_b = lowest_free_slot(&table, SINGLE_PRESET_SLOTS)
                    .ok_or(PipelineError::PresetSpaceExhausted)?;
                table.insert(slot_b, serde_json::Value::Bool(true));
                let slot = lowest_free_slot(&table, PLAYLIST_SLOTS)
                    .ok_or(PipelineError::PresetSpaceExhausted)?;

                self.save_device_preset(
                    slot_a,
                    &format!("{} A", preset.name),
                    self.color_state(gradient_a, None, *brightness_a),
                )?;
                self.save_device_preset(
                    slot_b,
                    &format!("{} B", preset.name),
                    self.color_state(gradient_b, None, *brightness_b),
                )?;

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let tenths = (duration_secs * 10.0).max(1.0) as u32;
                let playlist = StateWrite {
                    playlist: Some(PlaylistWrite {
                        ps: vec![slot_a, slot_b],
                        dur: vec![tenths, tenths],
                        transition: vec![tenths, tenths],
                        repeat: 0,
                    }),
                    ..StateWrite::default()
                };
                self.save_device_preset(slot, &preset.name, playlist)?;
                Ok(slot)
            }
        }
    }
}
