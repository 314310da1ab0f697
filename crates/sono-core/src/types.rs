//! Common types for the Sono audio engine
//!
//! Fundamental audio types shared by every pipeline stage: sample encodings,
//! channel roles and layouts, and the negotiated stream format.

use serde::{Deserialize, Serialize};

/// Internal processing sample type. Every pipeline stage past the format
/// converter works on interleaved `f32` in the range [-1.0, 1.0].
pub type Sample = f32;

/// Sample encodings accepted at the stream ingest boundary.
///
/// `S24LE3` is 24-bit packed in 3 bytes (WAV style); `S24NE4` carries the
/// 24-bit value in the low 3 bytes of a native-endian 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S8,
    S16LE,
    S16BE,
    S24LE3,
    S24NE4,
    S32LE,
    S32BE,
    F32,
    F64,
}

impl SampleFormat {
    /// Size of one encoded sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 1,
            SampleFormat::S16LE | SampleFormat::S16BE => 2,
            SampleFormat::S24LE3 => 3,
            SampleFormat::S24NE4 | SampleFormat::S32LE | SampleFormat::S32BE | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    /// Short human-readable tag for log lines
    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "U8",
            SampleFormat::S8 => "S8",
            SampleFormat::S16LE => "S16LE",
            SampleFormat::S16BE => "S16BE",
            SampleFormat::S24LE3 => "S24LE3",
            SampleFormat::S24NE4 => "S24NE4",
            SampleFormat::S32LE => "S32LE",
            SampleFormat::S32BE => "S32BE",
            SampleFormat::F32 => "F32",
            SampleFormat::F64 => "F64",
        }
    }
}

/// Channel roles, covering the enumerated preset set plus the intermediate
/// roles the downmix cascade routes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Front left
    FL,
    /// Front right
    FR,
    /// Front center
    FC,
    /// Low frequency effects
    LFE,
    /// Back left
    BL,
    /// Back right
    BR,
    /// Front left of center
    FLOC,
    /// Front right of center
    FROC,
    /// Back center
    BC,
    /// Side left
    SL,
    /// Side right
    SR,
    /// Top front left
    TFL,
    /// Top front right
    TFR,
    /// Top front center
    TFC,
    /// Top center
    TC,
    /// Top back left
    TBL,
    /// Top back right
    TBR,
    /// Top back center
    TBC,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::FL => "FL",
            Channel::FR => "FR",
            Channel::FC => "FC",
            Channel::LFE => "LFE",
            Channel::BL => "BL",
            Channel::BR => "BR",
            Channel::FLOC => "FLOC",
            Channel::FROC => "FROC",
            Channel::BC => "BC",
            Channel::SL => "SL",
            Channel::SR => "SR",
            Channel::TFL => "TFL",
            Channel::TFR => "TFR",
            Channel::TFC => "TFC",
            Channel::TC => "TC",
            Channel::TBL => "TBL",
            Channel::TBR => "TBR",
            Channel::TBC => "TBC",
        }
    }
}

/// Ordered channel layout. Invariant: no role repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {
    channels: Vec<Channel>,
}

impl ChannelLayout {
    /// Build a layout from an ordered role list. Returns `None` if a role
    /// repeats.
    pub fn new(channels: &[Channel]) -> Option<Self> {
        for (i, ch) in channels.iter().enumerate() {
            if channels[..i].contains(ch) {
                return None;
            }
        }
        Some(Self {
            channels: channels.to_vec(),
        })
    }

    /// Layout for a preset from the enumerated table
    pub fn preset(preset: LayoutPreset) -> Self {
        // Presets never repeat a role, so new() cannot fail here
        Self {
            channels: preset.channels().to_vec(),
        }
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn contains(&self, ch: Channel) -> bool {
        self.channels.contains(&ch)
    }

    /// Index of a role within the layout, if present
    pub fn position(&self, ch: Channel) -> Option<usize> {
        self.channels.iter().position(|&c| c == ch)
    }
}

impl std::fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.channels.iter().map(|c| c.name()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Speaker layout presets selectable from configuration, 2.0 through 7.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutPreset {
    #[serde(rename = "2.0")]
    Layout20,
    #[serde(rename = "2.1")]
    Layout21,
    #[serde(rename = "3.0")]
    Layout30,
    #[serde(rename = "3.1")]
    Layout31,
    #[serde(rename = "4.0")]
    Layout40,
    #[serde(rename = "4.1")]
    Layout41,
    #[serde(rename = "5.0")]
    Layout50,
    #[serde(rename = "5.1")]
    Layout51,
    #[serde(rename = "7.0")]
    Layout70,
    #[serde(rename = "7.1")]
    Layout71,
}

impl LayoutPreset {
    /// All presets, in table order
    pub const ALL: [LayoutPreset; 10] = [
        LayoutPreset::Layout20,
        LayoutPreset::Layout21,
        LayoutPreset::Layout30,
        LayoutPreset::Layout31,
        LayoutPreset::Layout40,
        LayoutPreset::Layout41,
        LayoutPreset::Layout50,
        LayoutPreset::Layout51,
        LayoutPreset::Layout70,
        LayoutPreset::Layout71,
    ];

    /// Ordered channel roles for this preset
    pub fn channels(self) -> &'static [Channel] {
        use Channel::*;
        match self {
            LayoutPreset::Layout20 => &[FL, FR],
            LayoutPreset::Layout21 => &[FL, FR, LFE],
            LayoutPreset::Layout30 => &[FL, FR, FC],
            LayoutPreset::Layout31 => &[FL, FR, FC, LFE],
            LayoutPreset::Layout40 => &[FL, FR, BL, BR],
            LayoutPreset::Layout41 => &[FL, FR, LFE, BL, BR],
            LayoutPreset::Layout50 => &[FL, FR, FC, BL, BR],
            LayoutPreset::Layout51 => &[FL, FR, FC, LFE, BL, BR],
            LayoutPreset::Layout70 => &[FL, FR, FC, BL, BR, SL, SR],
            LayoutPreset::Layout71 => &[FL, FR, FC, LFE, BL, BR, SL, SR],
        }
    }
}

/// Negotiated format of an audio buffer boundary.
///
/// Invariant: `frame_size == frame_samples * sample_format.bytes_per_sample()`
/// where `frame_samples` is one sample per channel of the layout.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    /// Samples per frame (one per channel)
    pub frame_samples: usize,
    /// Bytes per frame
    pub frame_size: usize,
}

impl AudioFormat {
    pub fn new(sample_format: SampleFormat, sample_rate: u32, layout: ChannelLayout) -> Self {
        let frame_samples = layout.count();
        let frame_size = frame_samples * sample_format.bytes_per_sample();
        Self {
            sample_format,
            sample_rate,
            layout,
            frame_samples,
            frame_size,
        }
    }

    /// Check the frame-size invariant and basic sanity
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0
            && self.frame_samples == self.layout.count()
            && self.frame_samples > 0
            && self.frame_size == self.frame_samples * self.sample_format.bytes_per_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_rejects_repeats() {
        use Channel::*;
        assert!(ChannelLayout::new(&[FL, FR, FL]).is_none());
        assert!(ChannelLayout::new(&[FL, FR, FC]).is_some());
    }

    #[test]
    fn test_presets_have_no_repeats() {
        for preset in LayoutPreset::ALL {
            assert!(
                ChannelLayout::new(preset.channels()).is_some(),
                "preset {:?} repeats a role",
                preset
            );
        }
    }

    #[test]
    fn test_format_invariant() {
        let fmt = AudioFormat::new(
            SampleFormat::S16LE,
            48000,
            ChannelLayout::preset(LayoutPreset::Layout51),
        );
        assert_eq!(fmt.frame_samples, 6);
        assert_eq!(fmt.frame_size, 12);
        assert!(fmt.is_valid());
    }

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(SampleFormat::U8.bytes_per_sample(), 1);
        assert_eq!(SampleFormat::S24LE3.bytes_per_sample(), 3);
        assert_eq!(SampleFormat::S24NE4.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::F64.bytes_per_sample(), 8);
    }
}
