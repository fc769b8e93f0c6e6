// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{Chunk, Speakers};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};
use crate::dsp::equal_samples;

/// A scalar gain over all channels, applied in place.
#[derive(Debug, Default)]
pub struct Gain {
    /// The linear gain factor.
    pub gain: f64,

    open: bool,
    spk: Speakers,
}

impl Gain {
    pub fn new(gain: f64) -> Self {
        Gain { gain, open: false, spk: Speakers::UNKNOWN }
    }
}

impl Filter for Gain {
    fn name(&self) -> &'static str {
        "Gain"
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

        if !equal_samples(self.gain, 1.0) {
            for plane in out.planes_mut().into_iter().take(self.spk.nch()) {
                for s in plane.iter_mut() {
                    *s *= self.gain;
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

    #[test]
    fn verify_gain() {
        let spk = Speakers::new(Format::Linear, ChannelMask::STEREO, 48000);
        let mut f = Gain::new(0.5);
        assert!(f.open(spk));

        let mut buf = SampleBuf::with_size(2, 4);
        buf.plane_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        buf.plane_mut(1).copy_from_slice(&[-1.0, -2.0, -3.0, -4.0]);

        let mut input = Chunk::new();
        input.set_linear(buf, 4);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());
        assert_eq!(out.plane(0), &[0.5, 1.0, 1.5, 2.0]);
        assert_eq!(out.plane(1), &[-0.5, -1.0, -1.5, -2.0]);
    }

    #[test]
    fn verify_unity_gain_untouched() {
        let spk = Speakers::new(Format::Linear, ChannelMask::MONO, 48000);
        let mut f = Gain::new(1.0);
        assert!(f.open(spk));

        let mut buf = SampleBuf::with_size(1, 2);
        buf.plane_mut(0).copy_from_slice(&[0.25, -0.25]);

        let mut input = Chunk::new();
        input.set_linear(buf, 2);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());
        assert_eq!(out.plane(0), &[0.25, -0.25]);
    }

    #[test]
    fn verify_rejects_raw_formats() {
        let f = Gain::new(1.0);
        assert!(!f.can_open(Speakers::new(Format::Pcm16, ChannelMask::STEREO, 48000)));
        assert!(!f.can_open(Speakers::UNKNOWN));
    }
}
