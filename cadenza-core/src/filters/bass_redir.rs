// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{ChannelMask, Chunk, Speakers};
use crate::dsp::iir::CrossoverSection;
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};

use std::f64::consts::FRAC_1_SQRT_2;

/// Bass redirection over a 4th-order Linkwitz-Riley crossover.
///
/// The main channels are high-passed at the crossover frequency; their sum is low-passed and
/// routed into the destination channels (the subwoofer by default). The LFE channel is already
/// band-limited, so when it is not itself a destination it joins the bass sum unfiltered.
///
/// The filter is active only when it has work to do: it must be enabled, and the input must
/// carry both a channel outside the destination mask and a destination channel. Otherwise the
/// stream passes through untouched.
///
/// When routing into more than one destination channel, an extra -3 dB per doubling cancels
/// the loudness gained by reproducing the same bass through several speakers.
pub struct BassRedir {
    enabled: bool,
    freq: u32,
    gain: f64,
    ch_mask: ChannelMask,
    level: f64,

    bass: Vec<f64>,
    hpf: Vec<Option<CrossoverSection>>,
    lpf: CrossoverSection,

    open: bool,
    spk: Speakers,
}

impl BassRedir {
    pub fn new() -> Self {
        BassRedir {
            enabled: false,
            freq: 80,
            gain: 1.0,
            ch_mask: ChannelMask::LFE1,
            level: 0.0,
            bass: Vec::new(),
            hpf: Vec::new(),
            lpf: CrossoverSection::default(),
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns true when the filter is enabled and actually redirecting.
    pub fn is_active(&self) -> bool {
        self.open
            && self.enabled
            && self.spk.mask.intersects(self.ch_mask)
            && !(self.spk.mask & !self.ch_mask).is_empty()
    }

    /// The current bass level (peak at the low-pass output), for activity monitoring.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// The crossover frequency in Hz.
    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn set_freq(&mut self, freq: u32) {
        self.freq = freq;
        if self.open {
            self.rebuild();
        }
    }

    /// The bass gain.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain;
    }

    /// The destination channel mask.
    pub fn channels(&self) -> ChannelMask {
        self.ch_mask
    }

    pub fn set_channels(&mut self, ch_mask: ChannelMask) {
        self.ch_mask = ch_mask;
        if self.open {
            self.rebuild();
        }
    }

    fn rebuild(&mut self) {
        let freq = f64::from(self.freq) / f64::from(self.spk.sample_rate);
        let order = self.spk.order();

        self.lpf = CrossoverSection::low_pass(freq);
        self.hpf = order
            .iter()
            .map(|name| {
                let main = !self.ch_mask.contains(name.mask()) && *name != crate::audio::ChannelName::Lfe;
                main.then(|| CrossoverSection::high_pass(freq))
            })
            .collect();

        self.level = 0.0;
        self.bass.clear();
    }

    /// The gain compensating the loudness of multi-speaker bass: -3 dB per speaker doubling.
    fn dest_gain(&self) -> f64 {
        let ndest = (self.spk.mask & self.ch_mask).count();
        match ndest {
            0 | 1 => 1.0,
            _ => FRAC_1_SQRT_2.powf((ndest as f64).log2()),
        }
    }
}

impl Default for BassRedir {
    fn default() -> Self {
        BassRedir::new()
    }
}

impl Filter for BassRedir {
    fn name(&self) -> &'static str {
        "BassRedir"
    }

    fn can_open(&self, spk: Speakers) -> bool {
        is_linear_input(spk)
    }

    fn open(&mut self, spk: Speakers) -> bool {
        if !self.can_open(spk) {
            return false;
        }
        self.open = true;
        self.spk = spk;
        self.rebuild();
        true
    }

    fn close(&mut self) {
        self.open = false;
        self.spk = Speakers::UNKNOWN;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {
        self.lpf.reset();
        for hpf in self.hpf.iter_mut().flatten() {
            hpf.reset();
        }
        self.level = 0.0;
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        if out.is_dummy() {
            return Ok(false);
        }

        if !self.is_active() {
            return Ok(true);
        }

        let size = out.len();
        let nch = self.spk.nch();
        let order = self.spk.order();
        let lfe = self.spk.channel_index(crate::audio::ChannelName::Lfe);

        self.bass.clear();
        self.bass.resize(size, 0.0);

        let mut planes = out.planes_mut();

        // Sum the main channels into the bass bus.
        for (ch, plane) in planes.iter().enumerate().take(nch) {
            if self.hpf[ch].is_some() {
                for (b, s) in self.bass.iter_mut().zip(plane.iter()) {
                    *b += s;
                }
            }
        }

        // Low-pass the bus; the LFE channel is band-limited already and joins unfiltered when
        // it is not a destination itself.
        self.lpf.process(&mut self.bass);
        if let Some(lfe) = lfe {
            if !self.ch_mask.contains(crate::audio::ChannelName::Lfe.mask()) {
                for (b, s) in self.bass.iter_mut().zip(planes[lfe].iter()) {
                    *b += s;
                }
            }
        }

        // Track the bass level.
        let mut peak = 0.0f64;
        for &b in self.bass.iter() {
            peak = peak.max(b.abs());
        }
        self.level = peak / self.spk.level;

        // High-pass the main channels.
        for (ch, plane) in planes.iter_mut().enumerate().take(nch) {
            if let Some(hpf) = self.hpf[ch].as_mut() {
                hpf.process(plane);
            }
        }

        // Route the bass into the destination channels.
        let gain = self.gain * self.dest_gain();
        for (ch, plane) in planes.iter_mut().enumerate().take(nch) {
            if self.ch_mask.contains(order[ch].mask()) {
                for (s, b) in plane.iter_mut().zip(self.bass.iter()) {
                    *s += b * gain;
                }
            }
        }

        Ok(true)
    }

    fn flush(&mut self, _out: &mut Chunk) -> Result<bool> {
        Ok(false)
    }

    fn get_input(&self) -> Speakers {
        self.spk
    }

    fn get_output(&self) -> Speakers {
        self.spk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ChannelName, Format, SampleBuf};
    use std::f64::consts::PI;

    fn surround() -> Speakers {
        Speakers::new(Format::Linear, ChannelMask::STEREO | ChannelMask::LFE1, 48000)
    }

    fn tone(nch: usize, active: usize, len: usize, freq: f64, rate: f64) -> SampleBuf {
        let mut buf = SampleBuf::with_size(nch, len);
        for (i, s) in buf.plane_mut(active).iter_mut().enumerate() {
            *s = (2.0 * PI * freq * i as f64 / rate).sin();
        }
        buf
    }

    fn peak(samples: &[f64]) -> f64 {
        samples.iter().fold(0.0f64, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn verify_activity() {
        let mut f = BassRedir::new();
        assert!(f.open(surround()));
        assert!(!f.is_active());

        f.set_enabled(true);
        assert!(f.is_active());

        // No destination channel at the input: enabled but inactive.
        let mut f = BassRedir::new();
        f.set_enabled(true);
        assert!(f.open(Speakers::new(Format::Linear, ChannelMask::STEREO, 48000)));
        assert!(!f.is_active());

        // Only destination channels at the input: nothing to redirect from.
        let mut f = BassRedir::new();
        f.set_enabled(true);
        f.set_channels(ChannelMask::STEREO);
        assert!(f.open(Speakers::new(Format::Linear, ChannelMask::STEREO, 48000)));
        assert!(!f.is_active());
    }

    #[test]
    fn verify_disabled_passthrough() {
        let mut f = BassRedir::new();
        assert!(f.open(surround()));

        let buf = tone(3, 0, 1024, 40.0, 48000.0);
        let expected = buf.plane(0).to_vec();

        let mut input = Chunk::new();
        input.set_linear(buf, 1024);
        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());
        assert_eq!(out.plane(0), &expected[..]);
    }

    #[test]
    fn verify_bass_moves_to_lfe() {
        let mut f = BassRedir::new();
        f.set_enabled(true);
        assert!(f.open(surround()));

        // A 40 Hz tone on the left channel, one second.
        let len = 48000;
        let buf = tone(3, 0, len, 40.0, 48000.0);
        let mut input = Chunk::new();
        input.set_linear(buf, len);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());

        // Steady state: the left channel loses the tone, the LFE channel gains it.
        let tail = len / 2;
        let left = peak(&out.plane(0)[tail..]);
        let lfe = peak(&out.plane(2)[tail..]);
        // An octave below the crossover a 4th-order high-pass leaves about -24 dB.
        assert!(left < 0.1, "left still carries bass: {}", left);
        assert!(lfe > 0.8, "lfe did not receive bass: {}", lfe);
        assert!(f.level() > 0.8);
    }

    #[test]
    fn verify_highs_stay_in_place() {
        let mut f = BassRedir::new();
        f.set_enabled(true);
        assert!(f.open(surround()));

        let len = 48000;
        let buf = tone(3, 0, len, 1000.0, 48000.0);
        let mut input = Chunk::new();
        input.set_linear(buf, len);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());

        let tail = len / 2;
        let left = peak(&out.plane(0)[tail..]);
        let lfe = peak(&out.plane(2)[tail..]);
        assert!((left - 1.0).abs() < 0.05, "left attenuated: {}", left);
        assert!(lfe < 0.01, "lfe received highs: {}", lfe);
    }

    #[test]
    fn verify_multi_destination_gain() {
        // Routing to two destinations applies -3 dB.
        let mut f = BassRedir::new();
        f.set_enabled(true);
        f.set_channels(ChannelMask::STEREO);
        let spk = Speakers::new(
            Format::Linear,
            ChannelMask::STEREO | ChannelMask::FRONT_CENTRE,
            48000,
        );
        assert!(f.open(spk));
        assert_eq!(f.channels(), ChannelMask::STEREO);

        let len = 48000;
        // Bass on the centre channel.
        let centre = spk.channel_index(ChannelName::FrontCentre).unwrap();
        let buf = tone(3, centre, len, 40.0, 48000.0);
        let mut input = Chunk::new();
        input.set_linear(buf, len);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());

        let tail = len / 2;
        let left = peak(&out.plane(0)[tail..]);
        assert!((left - FRAC_1_SQRT_2).abs() < 0.05, "left bass level {}", left);
    }
}
