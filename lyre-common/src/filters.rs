//! Filter parameter schema
//!
//! Clients send a mapping from effect name to that effect's own parameter
//! object. An absent key means the effect is disabled, not defaulted. A present
//! object with missing fields takes the per-field defaults below.
//!
//! Values are accepted as sent; every filter clamps its parameters into its
//! documented range when they are applied.

use serde::{Deserialize, Serialize};

/// Number of equalizer bands
pub const EQUALIZER_BANDS: usize = 15;

/// Full filter request, as sent by clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqualizerBand>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<KaraokeParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescale: Option<TimescaleParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<TremoloParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<VibratoParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distortion: Option<DistortionParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMixParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<SmoothingParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_pass: Option<SmoothingParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverb: Option<ReverbParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chorus: Option<ModulationParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flanger: Option<ModulationParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phaser: Option<PhaserParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialParams>,
}

/// One equalizer band adjustment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    /// Band index, 0..=14
    pub band: u8,
    /// Gain multiplier, -0.25..=1.0 (0 is unchanged)
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KaraokeParams {
    pub level: f32,
    pub mono_level: f32,
    pub filter_band: f32,
    pub filter_width: f32,
}

impl Default for KaraokeParams {
    fn default() -> Self {
        Self {
            level: 1.0,
            mono_level: 1.0,
            filter_band: 220.0,
            filter_width: 100.0,
        }
    }
}

/// Speed, pitch and rate combine multiplicatively
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimescaleParams {
    pub speed: f32,
    pub pitch: f32,
    pub rate: f32,
}

impl Default for TimescaleParams {
    fn default() -> Self {
        Self { speed: 1.0, pitch: 1.0, rate: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TremoloParams {
    pub frequency: f32,
    pub depth: f32,
}

impl Default for TremoloParams {
    fn default() -> Self {
        Self { frequency: 2.0, depth: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibratoParams {
    pub frequency: f32,
    pub depth: f32,
}

impl Default for VibratoParams {
    fn default() -> Self {
        Self { frequency: 2.0, depth: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RotationParams {
    pub rotation_hz: f32,
}

impl Default for RotationParams {
    fn default() -> Self {
        Self { rotation_hz: 0.2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DistortionParams {
    pub sin_offset: f32,
    pub sin_scale: f32,
    pub cos_offset: f32,
    pub cos_scale: f32,
    pub tan_offset: f32,
    pub tan_scale: f32,
    pub offset: f32,
    pub scale: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self {
            sin_offset: 0.0,
            sin_scale: 1.0,
            cos_offset: 0.0,
            cos_scale: 1.0,
            tan_offset: 0.0,
            tan_scale: 1.0,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelMixParams {
    pub left_to_left: f32,
    pub left_to_right: f32,
    pub right_to_left: f32,
    pub right_to_right: f32,
}

impl Default for ChannelMixParams {
    fn default() -> Self {
        Self {
            left_to_left: 1.0,
            left_to_right: 0.0,
            right_to_left: 0.0,
            right_to_right: 1.0,
        }
    }
}

/// One-pole smoothing factor shared by the low-pass and high-pass effects
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    pub smoothing: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self { smoothing: 20.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReverbParams {
    pub mix: f32,
    pub room_size: f32,
    pub damping: f32,
    pub width: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            mix: 0.3,
            room_size: 0.5,
            damping: 0.5,
            width: 1.0,
        }
    }
}

/// Chorus and flanger share one parameter shape; their clamp ranges differ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationParams {
    /// LFO rate in Hz
    pub rate: f32,
    /// Modulation depth, 0..=1
    pub depth: f32,
    /// Base delay in milliseconds
    pub delay: f32,
    pub feedback: f32,
    pub mix: f32,
}

impl Default for ModulationParams {
    fn default() -> Self {
        Self {
            rate: 0.5,
            depth: 0.5,
            delay: 5.0,
            feedback: 0.0,
            mix: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PhaserParams {
    pub stages: u8,
    pub rate: f32,
    pub depth: f32,
    pub feedback: f32,
    pub mix: f32,
    pub center_frequency: f32,
}

impl Default for PhaserParams {
    fn default() -> Self {
        Self {
            stages: 4,
            rate: 0.5,
            depth: 0.7,
            feedback: 0.3,
            mix: 0.5,
            center_frequency: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialParams {
    pub rate: f32,
    pub depth: f32,
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self { rate: 0.15, depth: 0.8 }
    }
}

/// Identity of each effect, independent of its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    Timescale,
    Equalizer,
    Karaoke,
    LowPass,
    HighPass,
    Distortion,
    ChannelMix,
    Tremolo,
    Vibrato,
    Chorus,
    Flanger,
    Phaser,
    Rotation,
    Spatial,
    Reverb,
    Volume,
}

/// One enabled effect together with its (unclamped) parameters
#[derive(Debug, Clone, PartialEq)]
pub enum FilterParams {
    Timescale(TimescaleParams),
    Equalizer(Vec<EqualizerBand>),
    Karaoke(KaraokeParams),
    LowPass(SmoothingParams),
    HighPass(SmoothingParams),
    Distortion(DistortionParams),
    ChannelMix(ChannelMixParams),
    Tremolo(TremoloParams),
    Vibrato(VibratoParams),
    Chorus(ModulationParams),
    Flanger(ModulationParams),
    Phaser(PhaserParams),
    Rotation(RotationParams),
    Spatial(SpatialParams),
    Reverb(ReverbParams),
    Volume(f32),
}

impl FilterParams {
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterParams::Timescale(_) => FilterKind::Timescale,
            FilterParams::Equalizer(_) => FilterKind::Equalizer,
            FilterParams::Karaoke(_) => FilterKind::Karaoke,
            FilterParams::LowPass(_) => FilterKind::LowPass,
            FilterParams::HighPass(_) => FilterKind::HighPass,
            FilterParams::Distortion(_) => FilterKind::Distortion,
            FilterParams::ChannelMix(_) => FilterKind::ChannelMix,
            FilterParams::Tremolo(_) => FilterKind::Tremolo,
            FilterParams::Vibrato(_) => FilterKind::Vibrato,
            FilterParams::Chorus(_) => FilterKind::Chorus,
            FilterParams::Flanger(_) => FilterKind::Flanger,
            FilterParams::Phaser(_) => FilterKind::Phaser,
            FilterParams::Rotation(_) => FilterKind::Rotation,
            FilterParams::Spatial(_) => FilterKind::Spatial,
            FilterParams::Reverb(_) => FilterKind::Reverb,
            FilterParams::Volume(_) => FilterKind::Volume,
        }
    }
}

impl FilterSettings {
    /// Enabled effects, in schema order
    pub fn enabled(&self) -> Vec<FilterParams> {
        let mut out = Vec::new();
        if let Some(p) = self.timescale {
            out.push(FilterParams::Timescale(p));
        }
        if let Some(bands) = &self.equalizer {
            out.push(FilterParams::Equalizer(bands.clone()));
        }
        if let Some(p) = self.karaoke {
            out.push(FilterParams::Karaoke(p));
        }
        if let Some(p) = self.low_pass {
            out.push(FilterParams::LowPass(p));
        }
        if let Some(p) = self.high_pass {
            out.push(FilterParams::HighPass(p));
        }
        if let Some(p) = self.distortion {
            out.push(FilterParams::Distortion(p));
        }
        if let Some(p) = self.channel_mix {
            out.push(FilterParams::ChannelMix(p));
        }
        if let Some(p) = self.tremolo {
            out.push(FilterParams::Tremolo(p));
        }
        if let Some(p) = self.vibrato {
            out.push(FilterParams::Vibrato(p));
        }
        if let Some(p) = self.chorus {
            out.push(FilterParams::Chorus(p));
        }
        if let Some(p) = self.flanger {
            out.push(FilterParams::Flanger(p));
        }
        if let Some(p) = self.phaser {
            out.push(FilterParams::Phaser(p));
        }
        if let Some(p) = self.rotation {
            out.push(FilterParams::Rotation(p));
        }
        if let Some(p) = self.spatial {
            out.push(FilterParams::Spatial(p));
        }
        if let Some(p) = self.reverb {
            out.push(FilterParams::Reverb(p));
        }
        if let Some(v) = self.volume {
            out.push(FilterParams::Volume(v));
        }
        out
    }

    /// True when no effect is enabled
    pub fn is_empty(&self) -> bool {
        self.enabled().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_keys_are_disabled() {
        let settings: FilterSettings = serde_json::from_value(json!({})).unwrap();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_present_object_uses_field_defaults() {
        let settings: FilterSettings =
            serde_json::from_value(json!({ "karaoke": { "level": 0.5 } })).unwrap();
        let karaoke = settings.karaoke.unwrap();
        assert_eq!(karaoke.level, 0.5);
        assert_eq!(karaoke.mono_level, 1.0);
        assert_eq!(karaoke.filter_band, 220.0);
        assert_eq!(settings.enabled().len(), 1);
    }

    #[test]
    fn test_camel_case_keys() {
        let settings: FilterSettings = serde_json::from_value(json!({
            "channelMix": { "leftToRight": 0.5 },
            "lowPass": { "smoothing": 10.0 },
            "equalizer": [{ "band": 0, "gain": 0.2 }, { "band": 14, "gain": -0.1 }],
            "timescale": { "speed": 1.2 }
        }))
        .unwrap();

        let kinds: Vec<FilterKind> = settings.enabled().iter().map(|p| p.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                FilterKind::Timescale,
                FilterKind::Equalizer,
                FilterKind::LowPass,
                FilterKind::ChannelMix
            ]
        );
        assert_eq!(settings.channel_mix.unwrap().left_to_left, 1.0);
        assert_eq!(settings.timescale.unwrap().pitch, 1.0);
    }
}
