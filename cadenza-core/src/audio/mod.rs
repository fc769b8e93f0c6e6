// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `audio` module provides the stream descriptor and the sample containers shared by all
//! filters.

use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

mod buf;
mod chunk;

pub use buf::SampleBuf;
pub use chunk::Chunk;

/// The number of channel names known to Cadenza.
pub const NUM_CHANNELS: usize = 11;

bitflags! {
    /// A bitmask of the channels carried by a stream.
    ///
    /// The order of the bits defines the canonical channel order: the samples of a linear chunk
    /// are stored plane-by-plane in ascending bit order of the stream's mask.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ChannelMask: u32 {
        /// Front-left (left) channel.
        const FRONT_LEFT         = 1 << 0;
        /// Front-centre (centre) or the Mono channel.
        const FRONT_CENTRE       = 1 << 1;
        /// Front-right (right) channel.
        const FRONT_RIGHT        = 1 << 2;
        /// Side-left (surround left) channel.
        const SIDE_LEFT          = 1 << 3;
        /// Side-right (surround right) channel.
        const SIDE_RIGHT         = 1 << 4;
        /// Low frequency effects channel.
        const LFE1               = 1 << 5;
        /// Front left-of-centre channel.
        const FRONT_LEFT_CENTRE  = 1 << 6;
        /// Front right-of-centre channel.
        const FRONT_RIGHT_CENTRE = 1 << 7;
        /// Rear-left (back left) channel.
        const REAR_LEFT          = 1 << 8;
        /// Rear-centre (back centre) channel.
        const REAR_CENTRE        = 1 << 9;
        /// Rear-right (back right) channel.
        const REAR_RIGHT         = 1 << 10;
    }
}

impl ChannelMask {
    /// Single centre channel.
    pub const MONO: ChannelMask = ChannelMask::FRONT_CENTRE;
    /// Left and right channels.
    pub const STEREO: ChannelMask = ChannelMask::FRONT_LEFT.union(ChannelMask::FRONT_RIGHT);
    /// Left, centre and right channels.
    pub const SURROUND_3_0: ChannelMask = ChannelMask::STEREO.union(ChannelMask::FRONT_CENTRE);
    /// Left, right and a pair of side channels.
    pub const QUADRO: ChannelMask = ChannelMask::STEREO
        .union(ChannelMask::SIDE_LEFT)
        .union(ChannelMask::SIDE_RIGHT);
    /// Left, centre, right and a pair of side channels.
    pub const SURROUND_5_0: ChannelMask = ChannelMask::QUADRO.union(ChannelMask::FRONT_CENTRE);
    /// 5.0 plus the low frequency effects channel.
    pub const SURROUND_5_1: ChannelMask = ChannelMask::SURROUND_5_0.union(ChannelMask::LFE1);
    /// 5.1 plus a pair of back channels.
    pub const SURROUND_7_1: ChannelMask = ChannelMask::SURROUND_5_1
        .union(ChannelMask::REAR_LEFT)
        .union(ChannelMask::REAR_RIGHT);

    /// Gets the number of channels in the mask.
    pub fn count(self) -> usize {
        self.bits().count_ones() as usize
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        write!(f, "[")?;
        for name in ChannelName::ALL {
            if self.contains(name.mask()) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{}", name.short_name())?;
                first = false;
            }
        }
        write!(f, "]")
    }
}

/// A symbolic channel name.
///
/// Channel names index per-channel parameter tables (gains, delays, FIR generators) independent
/// of the channel's position in any particular stream. Use [`Speakers::channel_index`] to map a
/// name to a plane index of a concrete stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelName {
    FrontLeft = 0,
    FrontCentre,
    FrontRight,
    SideLeft,
    SideRight,
    Lfe,
    FrontLeftCentre,
    FrontRightCentre,
    RearLeft,
    RearCentre,
    RearRight,
}

impl ChannelName {
    /// All channel names in canonical order.
    pub const ALL: [ChannelName; NUM_CHANNELS] = [
        ChannelName::FrontLeft,
        ChannelName::FrontCentre,
        ChannelName::FrontRight,
        ChannelName::SideLeft,
        ChannelName::SideRight,
        ChannelName::Lfe,
        ChannelName::FrontLeftCentre,
        ChannelName::FrontRightCentre,
        ChannelName::RearLeft,
        ChannelName::RearCentre,
        ChannelName::RearRight,
    ];

    /// The position of the channel in the canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The mask bit of the channel.
    pub fn mask(self) -> ChannelMask {
        ChannelMask::from_bits_truncate(1 << self as u32)
    }

    /// A short display name for the channel.
    pub fn short_name(self) -> &'static str {
        match self {
            ChannelName::FrontLeft => "L",
            ChannelName::FrontCentre => "C",
            ChannelName::FrontRight => "R",
            ChannelName::SideLeft => "SL",
            ChannelName::SideRight => "SR",
            ChannelName::Lfe => "LFE",
            ChannelName::FrontLeftCentre => "CL",
            ChannelName::FrontRightCentre => "CR",
            ChannelName::RearLeft => "BL",
            ChannelName::RearCentre => "BC",
            ChannelName::RearRight => "BR",
        }
    }
}

/// The encoding of a stream's payload.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Format {
    /// The format is not yet known (data-driven filters before the first chunk).
    #[default]
    Unknown,
    /// Planar 64-bit floating point samples, one plane per channel.
    Linear,
    /// Interleaved signed 16-bit little-endian PCM.
    Pcm16,
    /// Interleaved signed 24-bit little-endian PCM.
    Pcm24,
    /// Interleaved signed 32-bit little-endian PCM.
    Pcm32,
    /// Interleaved signed 16-bit big-endian PCM.
    Pcm16Be,
    /// Interleaved signed 24-bit big-endian PCM.
    Pcm24Be,
    /// Interleaved signed 32-bit big-endian PCM.
    Pcm32Be,
    /// Interleaved IEEE-754 32-bit little-endian samples.
    PcmFloat,
    /// Interleaved IEEE-754 64-bit little-endian samples.
    PcmDouble,
    /// Interleaved IEEE-754 32-bit big-endian samples.
    PcmFloatBe,
    /// Interleaved IEEE-754 64-bit big-endian samples.
    PcmDoubleBe,
    /// AC-3 frames, opaque to the graph core.
    Ac3,
    /// E-AC-3 frames, opaque to the graph core.
    Eac3,
    /// MPEG audio frames, opaque to the graph core.
    Mpa,
    /// DTS frames, opaque to the graph core.
    Dts,
}

impl Format {
    /// Returns true when the format is planar linear samples.
    pub fn is_linear(self) -> bool {
        self == Format::Linear
    }

    /// Returns true for any interleaved PCM representation.
    pub fn is_pcm(self) -> bool {
        matches!(
            self,
            Format::Pcm16
                | Format::Pcm24
                | Format::Pcm32
                | Format::Pcm16Be
                | Format::Pcm24Be
                | Format::Pcm32Be
                | Format::PcmFloat
                | Format::PcmDouble
                | Format::PcmFloatBe
                | Format::PcmDoubleBe
        )
    }

    /// Returns true for opaque compressed formats.
    pub fn is_compressed(self) -> bool {
        matches!(self, Format::Ac3 | Format::Eac3 | Format::Mpa | Format::Dts)
    }

    /// The size of one PCM sample of one channel in bytes, if the format is PCM.
    pub fn sample_bytes(self) -> Option<usize> {
        match self {
            Format::Pcm16 | Format::Pcm16Be => Some(2),
            Format::Pcm24 | Format::Pcm24Be => Some(3),
            Format::Pcm32 | Format::Pcm32Be => Some(4),
            Format::PcmFloat | Format::PcmFloatBe => Some(4),
            Format::PcmDouble | Format::PcmDoubleBe => Some(8),
            _ => None,
        }
    }

    /// The reference level of the format: the sample value of a full-scale signal.
    ///
    /// Integer PCM carries samples in integer range, therefore the level is `2^(bits-1)`.
    /// Linear and floating point formats are normalized to 1.0.
    pub fn default_level(self) -> f64 {
        match self {
            Format::Pcm16 | Format::Pcm16Be => 32768.0,
            Format::Pcm24 | Format::Pcm24Be => 8_388_608.0,
            Format::Pcm32 | Format::Pcm32Be => 2_147_483_648.0,
            _ => 1.0,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Format::Unknown => "Unknown",
            Format::Linear => "Linear",
            Format::Pcm16 => "PCM16",
            Format::Pcm24 => "PCM24",
            Format::Pcm32 => "PCM32",
            Format::Pcm16Be => "PCM16BE",
            Format::Pcm24Be => "PCM24BE",
            Format::Pcm32Be => "PCM32BE",
            Format::PcmFloat => "PCMFloat",
            Format::PcmDouble => "PCMDouble",
            Format::PcmFloatBe => "PCMFloatBE",
            Format::PcmDoubleBe => "PCMDoubleBE",
            Format::Ac3 => "AC3",
            Format::Eac3 => "EAC3",
            Format::Mpa => "MPA",
            Format::Dts => "DTS",
        }
    }
}

/// The inter-channel relation of a stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Relation {
    /// Channels are independent.
    #[default]
    None,
    /// Stereo pair carries a Dolby Surround / Pro Logic matrix encode.
    Dolby,
    /// Stereo pair carries a Dolby Pro Logic II matrix encode.
    DolbyPlii,
}

/// `Speakers` describes a stream: payload format, channel mask, inter-channel relation, sample
/// rate and reference level.
///
/// A linear or PCM stream is *fully specified* when both the mask and the sample rate are known.
/// Filters whose output format is data driven report [`Speakers::UNKNOWN`] until the format can
/// be determined from the data.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Speakers {
    /// Payload format.
    pub format: Format,
    /// Channels carried by the stream.
    pub mask: ChannelMask,
    /// Inter-channel relation.
    pub relation: Relation,
    /// Sample rate in Hz. Zero when not yet known.
    pub sample_rate: u32,
    /// Reference level: the sample value of a full-scale signal.
    pub level: f64,
}

impl Speakers {
    /// The unknown stream descriptor.
    pub const UNKNOWN: Speakers = Speakers {
        format: Format::Unknown,
        mask: ChannelMask::empty(),
        relation: Relation::None,
        sample_rate: 0,
        level: 1.0,
    };

    /// Instantiate a descriptor with the default level and no inter-channel relation.
    pub fn new(format: Format, mask: ChannelMask, sample_rate: u32) -> Self {
        Speakers { format, mask, relation: Relation::None, sample_rate, level: format.default_level() }
    }

    /// Builder-style override of the inter-channel relation.
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = relation;
        self
    }

    /// Builder-style override of the reference level.
    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    /// Returns true when the format is not yet known.
    pub fn is_unknown(&self) -> bool {
        self.format == Format::Unknown
    }

    /// Returns true when the payload is planar linear samples.
    pub fn is_linear(&self) -> bool {
        self.format.is_linear()
    }

    /// Returns true when the descriptor specifies a processable sampled stream.
    pub fn is_fully_specified(&self) -> bool {
        (self.format.is_linear() || self.format.is_pcm())
            && self.sample_rate > 0
            && !self.mask.is_empty()
    }

    /// The number of channels in the stream.
    pub fn nch(&self) -> usize {
        self.mask.count()
    }

    /// The channel names of the stream in plane order.
    pub fn order(&self) -> SmallVec<[ChannelName; NUM_CHANNELS]> {
        ChannelName::ALL.iter().copied().filter(|name| self.mask.contains(name.mask())).collect()
    }

    /// The plane index of the given channel, or `None` when the stream does not carry it.
    pub fn channel_index(&self, name: ChannelName) -> Option<usize> {
        if !self.mask.contains(name.mask()) {
            return None;
        }
        Some((self.mask.bits() & (name.mask().bits() - 1)).count_ones() as usize)
    }
}

impl Default for Speakers {
    fn default() -> Self {
        Speakers::UNKNOWN
    }
}

impl fmt::Display for Speakers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mask.is_empty() && self.sample_rate == 0 {
            write!(f, "({})", self.format.name())
        }
        else {
            write!(f, "({} {} {})", self.format.name(), self.mask, self.sample_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_mask_count_and_order() {
        let spk = Speakers::new(Format::Linear, ChannelMask::SURROUND_5_1, 48000);
        assert_eq!(spk.nch(), 6);

        let order = spk.order();
        assert_eq!(
            order.as_slice(),
            &[
                ChannelName::FrontLeft,
                ChannelName::FrontCentre,
                ChannelName::FrontRight,
                ChannelName::SideLeft,
                ChannelName::SideRight,
                ChannelName::Lfe,
            ]
        );
    }

    #[test]
    fn verify_channel_index() {
        let spk = Speakers::new(
            Format::Linear,
            ChannelMask::STEREO | ChannelMask::LFE1,
            44100,
        );

        assert_eq!(spk.channel_index(ChannelName::FrontLeft), Some(0));
        assert_eq!(spk.channel_index(ChannelName::FrontRight), Some(1));
        assert_eq!(spk.channel_index(ChannelName::Lfe), Some(2));
        assert_eq!(spk.channel_index(ChannelName::FrontCentre), None);
    }

    #[test]
    fn verify_fully_specified() {
        assert!(Speakers::new(Format::Linear, ChannelMask::STEREO, 48000).is_fully_specified());
        assert!(!Speakers::new(Format::Linear, ChannelMask::STEREO, 0).is_fully_specified());
        assert!(!Speakers::new(Format::Linear, ChannelMask::empty(), 48000).is_fully_specified());
        assert!(!Speakers::new(Format::Ac3, ChannelMask::STEREO, 48000).is_fully_specified());
        assert!(!Speakers::UNKNOWN.is_fully_specified());
    }

    #[test]
    fn verify_levels() {
        assert_eq!(Speakers::new(Format::Pcm16, ChannelMask::STEREO, 48000).level, 32768.0);
        assert_eq!(Speakers::new(Format::Linear, ChannelMask::STEREO, 48000).level, 1.0);
    }
}
