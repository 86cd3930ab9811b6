//! Stream format descriptions.
//!
//! [`SourceFormat`] is captured once from the opened decoder; [`TARGET`] is the fixed
//! playback format every filtered frame is normalized to.

use std::fmt;

/// Rational number, used for stream time bases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// PCM sample layout produced by a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    U16,
    U24,
    U32,
    S8,
    S16,
    S24,
    S32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::U16 => "u16",
            SampleFormat::U24 => "u24",
            SampleFormat::U32 => "u32",
            SampleFormat::S8 => "s8",
            SampleFormat::S16 => "s16",
            SampleFormat::S24 => "s24",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "flt",
            SampleFormat::F64 => "dbl",
        }
    }

    /// Guess the decoded layout from a declared integer bit depth.
    pub fn from_bits_per_sample(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(SampleFormat::U8),
            16 => Some(SampleFormat::S16),
            24 => Some(SampleFormat::S24),
            32 => Some(SampleFormat::S32),
            _ => None,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask of the channels present in a stream.
///
/// Bit positions follow the WAVE_FORMAT_EXTENSIBLE speaker mask, which is also the
/// order in which planar channels are stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelLayout(u64);

impl ChannelLayout {
    pub const FRONT_LEFT: u64 = 0x1;
    pub const FRONT_RIGHT: u64 = 0x2;
    pub const FRONT_CENTER: u64 = 0x4;
    pub const LOW_FREQUENCY: u64 = 0x8;
    pub const BACK_LEFT: u64 = 0x10;
    pub const BACK_RIGHT: u64 = 0x20;
    pub const FRONT_LEFT_OF_CENTER: u64 = 0x40;
    pub const FRONT_RIGHT_OF_CENTER: u64 = 0x80;
    pub const BACK_CENTER: u64 = 0x100;
    pub const SIDE_LEFT: u64 = 0x200;
    pub const SIDE_RIGHT: u64 = 0x400;

    pub const MONO: ChannelLayout = ChannelLayout(Self::FRONT_CENTER);
    pub const STEREO: ChannelLayout = ChannelLayout(Self::FRONT_LEFT | Self::FRONT_RIGHT);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn channels(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Individual channel bits in storage order (lowest bit first).
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..64)
            .map(|shift| 1u64 << shift)
            .filter(move |bit| self.0 & bit != 0)
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Native format of the selected audio stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceFormat {
    pub time_base: Rational,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channel_layout: ChannelLayout,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time_base={}:sample_rate={}:sample_fmt={}:channel_layout={}",
            self.time_base, self.sample_rate, self.sample_format, self.channel_layout
        )
    }
}

/// Fixed playback format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetFormat {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channel_layout: ChannelLayout,
}

impl TargetFormat {
    pub fn channels(&self) -> usize {
        self.channel_layout.channels()
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sample_fmts={}:sample_rates={}:channel_layouts={}",
            self.sample_format, self.sample_rate, self.channel_layout
        )
    }
}

/// Signed 16-bit interleaved stereo at 44.1 kHz.
pub const TARGET: TargetFormat = TargetFormat {
    sample_rate: 44_100,
    sample_format: SampleFormat::S16,
    channel_layout: ChannelLayout::STEREO,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_counts_channels() {
        assert_eq!(ChannelLayout::MONO.channels(), 1);
        assert_eq!(ChannelLayout::STEREO.channels(), 2);
        assert!(ChannelLayout::from_bits(0).is_empty());
    }

    #[test]
    fn layout_iterates_in_bit_order() {
        let layout = ChannelLayout::from_bits(0x3f);
        let bits: Vec<u64> = layout.iter().collect();
        assert_eq!(bits, vec![0x1, 0x2, 0x4, 0x8, 0x10, 0x20]);
    }

    #[test]
    fn source_format_display_mirrors_filter_args() {
        let fmt = SourceFormat {
            time_base: Rational::new(1, 22_050),
            sample_rate: 22_050,
            sample_format: SampleFormat::S16,
            channel_layout: ChannelLayout::MONO,
        };
        assert_eq!(
            fmt.to_string(),
            "time_base=1/22050:sample_rate=22050:sample_fmt=s16:channel_layout=0x4"
        );
    }

    #[test]
    fn target_is_stereo_s16_44k() {
        assert_eq!(TARGET.channels(), 2);
        assert_eq!(TARGET.sample_rate, 44_100);
        assert_eq!(TARGET.sample_format, SampleFormat::S16);
    }
}
