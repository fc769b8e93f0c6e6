// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{Chunk, Speakers};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};
use crate::rng::Rng;

/// Adds uniform dither noise ahead of a word-length reduction.
///
/// `level` is the noise amplitude relative to full scale. To dither a stream headed for 16-bit
/// PCM with one LSB of noise, use `level = 1.0 / 32768.0`. A level of zero disables the filter.
#[derive(Debug, Default)]
pub struct Dither {
    /// Noise level relative to full scale.
    pub level: f64,

    rng: Rng,
    open: bool,
    spk: Speakers,
}

impl Dither {
    pub fn new(level: f64) -> Self {
        Dither { level, ..Default::default() }
    }
}

impl Filter for Dither {
    fn name(&self) -> &'static str {
        "Dither"
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
        true
    }

    fn close(&mut self) {
        self.open = false;
        self.spk = Speakers::UNKNOWN;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {}

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        if out.is_dummy() {
            return Ok(false);
        }

        if self.level > 0.0 {
            let factor = self.level * self.spk.level;
            for plane in out.planes_mut().into_iter().take(self.spk.nch()) {
                for s in plane.iter_mut() {
                    *s += self.rng.next_sample() * factor;
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
    use crate::audio::{ChannelMask, Format, SampleBuf};

    fn process_zeros(level: f64, spk: Speakers, len: usize) -> Vec<f64> {
        let mut f = Dither::new(level);
        assert!(f.open(spk));

        let mut input = Chunk::new();
        input.set_linear(SampleBuf::with_size(spk.nch(), len), len);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());
        out.plane(0).to_vec()
    }

    #[test]
    fn verify_disabled_is_exact() {
        let spk = Speakers::new(Format::Linear, ChannelMask::STEREO, 48000);
        let out = process_zeros(0.0, spk, 1024);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn verify_noise_level() {
        let level = 1.0 / 32768.0;
        let spk = Speakers::new(Format::Linear, ChannelMask::STEREO, 48000);
        let out = process_zeros(level, spk, 65536);

        // Noise is bounded by the level and actually present.
        let peak = out.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        assert!(peak > 0.0);
        assert!(peak <= level);

        // And unbiased.
        let mean: f64 = out.iter().sum::<f64>() / out.len() as f64;
        assert!(mean.abs() < level / 50.0);
    }

    #[test]
    fn verify_level_scales_with_reference() {
        // At a PCM reference level the same relative level produces integer-scale noise.
        let spk = Speakers::new(Format::Linear, ChannelMask::MONO, 48000).with_level(32768.0);
        let out = process_zeros(1.0 / 32768.0, spk, 4096);
        let peak = out.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        assert!(peak <= 1.0);
        assert!(peak > 0.01);
    }
}
