// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts::PI;

use crate::audio::{Chunk, SampleBuf, Speakers};
use crate::dsp::{db2value, equal_samples};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};
use crate::sync::SyncHelper;

/// Look-ahead automatic gain control.
///
/// The stream is processed in blocks of `nsamples` samples held in two ping-pong buffers, which
/// gives the filter one block of look-ahead: the gain needed for the *next* block is known
/// before the *current* block leaves the filter. Gain changes are applied as a Hann cross-fade
/// between the old and new gain over the emitted block, so block boundaries stay free of
/// discontinuities, and blocks that still overshoot are hard-clipped to the reference level.
pub struct Agc {
    /// Automatic gain control: reduce gain on overflow, release it back towards `master`.
    pub auto_gain: bool,
    /// One-pass normalization: never release the gain back up.
    pub normalize: bool,
    /// The desired gain.
    pub master: f64,
    /// Gain attack speed in dB/s.
    pub attack: f64,
    /// Gain release speed in dB/s.
    pub release: f64,

    gain: f64,
    level: f64,

    nsamples: usize,
    window: SampleBuf,
    buf: [SampleBuf; 2],
    sample: [usize; 2],
    block: usize,
    sync: SyncHelper,

    open: bool,
    spk: Speakers,
}

impl Agc {
    /// Instantiate with a block size of `nsamples` samples.
    pub fn new(nsamples: usize) -> Self {
        Agc {
            auto_gain: true,
            normalize: false,
            master: 1.0,
            attack: 50.0,
            release: 50.0,
            gain: 1.0,
            level: 1.0,
            nsamples: nsamples.max(1),
            window: SampleBuf::new(),
            buf: [SampleBuf::new(), SampleBuf::new()],
            sample: [0, 0],
            block: 0,
            sync: SyncHelper::new(),
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    /// The block size in samples.
    pub fn nsamples(&self) -> usize {
        self.nsamples
    }

    /// Change the block size. Drops buffered data.
    pub fn set_nsamples(&mut self, nsamples: usize) {
        self.nsamples = nsamples.max(1);
        if self.open {
            self.rebuild();
        }
    }

    /// The currently applied gain.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    fn rebuild(&mut self) {
        let n = self.nsamples;
        self.buf[0].allocate(self.spk.nch(), n);
        self.buf[1].allocate(self.spk.nch(), n);

        // Hann halves: window[0] rises, window[1] falls, summing to one.
        self.window.allocate(2, n);
        let f = 2.0 * PI / (n * 2) as f64;
        for i in 0..n {
            self.window.plane_mut(0)[i] = 0.5 * (1.0 - (i as f64 * f).cos());
        }
        for i in 0..n {
            self.window.plane_mut(1)[i] = 0.5 * (1.0 - ((i + n) as f64 * f).cos());
        }

        self.reset();
    }

    fn next_block(&self) -> usize {
        (self.block + 1) & 1
    }

    fn fill_buffer(&mut self, chunk: &mut Chunk) -> bool {
        let n = (self.nsamples - self.sample[self.block]).min(chunk.len());
        if n > 0 {
            self.buf[self.block].copy_from(
                self.sample[self.block],
                &chunk.planes(),
                0,
                self.spk.nch(),
                n,
            );
            self.sample[self.block] += n;
            chunk.drop_samples(n);
            self.sync.put(n);
        }
        self.sample[self.block] >= self.nsamples
    }

    /// Measure the block just filled, update the gain, switch blocks and shape the block now
    /// ready for emission.
    fn process_block(&mut self) {
        let nch = self.spk.nch();
        let nsamples = self.nsamples;
        let spk_level = self.spk.level;

        let old_gain = self.gain;
        let old_level = self.level;

        let attack = self.attack.max(0.0);
        let release = self.release.max(0.0);
        let attack_factor = db2value(attack * nsamples as f64 / f64::from(self.spk.sample_rate));
        let mut release_factor =
            db2value(release * nsamples as f64 / f64::from(self.spk.sample_rate));

        // Peak level of the block just filled, normalized to the reference level. It may
        // exceed 1.0 when upstream processing boosted the signal; the job here is to pull the
        // output back below full scale.
        let mut level = 0.0f64;
        for ch in 0..nch {
            for &s in self.buf[self.block].plane(ch) {
                level = level.max(s.abs());
            }
        }
        level /= spk_level;
        self.level = level;

        if !self.auto_gain {
            self.gain = self.master;
        }

        let max = level.max(old_level) * self.gain;
        if self.auto_gain {
            if max > 1.0 {
                if max < attack_factor {
                    // Corrected with no overflow.
                    self.gain /= max;
                }
                else {
                    // Overflow, the block will be clipped.
                    self.gain /= attack_factor;
                }
            }
            else if !self.normalize {
                // Release towards the master gain.
                if max * release_factor > 1.0 {
                    release_factor = 1.0 / max;
                }
                if self.gain * release_factor > self.master {
                    self.gain = self.master;
                }
                else {
                    self.gain *= release_factor;
                }
            }
        }

        // Switch to the block ready for emission.
        self.block = self.next_block();
        if self.sample[self.block] == 0 {
            // Start of processing: nothing to shape yet.
            return;
        }

        // Full cross-fade on a gain change, plain gain otherwise, nothing at unity.
        if !equal_samples(old_gain, self.gain) {
            for ch in 0..nch {
                let plane = self.buf[self.block].plane_mut(ch);
                for (s, (w0, w1)) in plane
                    .iter_mut()
                    .zip(self.window.plane(0).iter().zip(self.window.plane(1)))
                    .take(nsamples)
                {
                    *s *= old_gain * w1 + self.gain * w0;
                }
            }
        }
        else if !equal_samples(self.gain, 1.0) {
            for ch in 0..nch {
                for s in self.buf[self.block].plane_mut(ch).iter_mut() {
                    *s *= self.gain;
                }
            }
        }

        // The block must be clipped even when the overflow happened on the previous block.
        if level * self.gain > 1.0 || old_level * old_gain > 1.0 {
            for ch in 0..nch {
                for s in self.buf[self.block].plane_mut(ch).iter_mut() {
                    *s = s.clamp(-spk_level, spk_level);
                }
            }
        }
    }

    fn emit(&mut self, out: &mut Chunk) {
        let len = self.sample[self.block];
        let nch = self.spk.nch();

        let buf = out.linear_mut(nch, len);
        buf.copy_from(0, &self.buf[self.block].planes(), 0, nch, len);

        self.sync.send_sync_linear(out, self.spk.sample_rate);
        self.sample[self.block] = 0;
    }
}

impl Default for Agc {
    fn default() -> Self {
        Agc::new(1024)
    }
}

impl Filter for Agc {
    fn name(&self) -> &'static str {
        "Agc"
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
        self.block = 0;
        self.sample = [0, 0];
        self.level = 1.0;
        self.gain = 1.0;
        self.sync.reset();
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        self.sync.receive_sync(input);

        while self.fill_buffer(input) {
            self.process_block();

            // Do not send the empty first block.
            if self.sample[self.block] == 0 && self.sample[self.next_block()] != 0 {
                continue;
            }

            self.emit(out);
            return Ok(true);
        }

        Ok(false)
    }

    fn flush(&mut self, out: &mut Chunk) -> Result<bool> {
        if self.sample[0] == 0 && self.sample[1] == 0 {
            return Ok(false);
        }

        let fill = self.sample[self.block];
        self.buf[self.block].zero_range(fill, self.nsamples - fill);
        self.process_block();

        // The first block of a short stream needs a second, silent block to cross-fade with.
        if self.sample[self.block] == 0 {
            self.buf[self.block].zero();
            self.process_block();
        }

        self.emit(out);
        Ok(true)
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
    use crate::audio::{ChannelMask, Format};

    fn spk() -> Speakers {
        Speakers::new(Format::Linear, ChannelMask::STEREO, 48000)
    }

    fn run(f: &mut Agc, input: &SampleBuf, chunk: usize) -> SampleBuf {
        let nch = input.nch();
        let mut collected: Vec<Vec<f64>> = vec![Vec::new(); nch];

        let mut pos = 0;
        while pos < input.nsamples() {
            let len = chunk.min(input.nsamples() - pos);
            let mut buf = SampleBuf::with_size(nch, len);
            buf.copy_from(0, &input.planes(), pos, nch, len);
            let mut inp = Chunk::new();
            inp.set_linear(buf, len);
            pos += len;

            let mut out = Chunk::new();
            while f.process(&mut inp, &mut out).unwrap() {
                for ch in 0..nch {
                    collected[ch].extend_from_slice(out.plane(ch));
                }
            }
        }
        let mut out = Chunk::new();
        while f.flush(&mut out).unwrap() {
            for ch in 0..nch {
                collected[ch].extend_from_slice(out.plane(ch));
            }
        }

        let mut result = SampleBuf::with_size(nch, collected[0].len());
        for ch in 0..nch {
            result.plane_mut(ch).copy_from_slice(&collected[ch]);
        }
        result
    }

    #[test]
    fn verify_passthrough_sample_count() {
        // With auto gain off and unity master the filter is a delayed passthrough; the sample
        // count is preserved exactly.
        let mut f = Agc::new(256);
        f.auto_gain = false;
        assert!(f.open(spk()));

        let mut input = SampleBuf::with_size(2, 1000);
        for ch in 0..2 {
            for (i, s) in input.plane_mut(ch).iter_mut().enumerate() {
                *s = ((i + ch) as f64 * 0.001).sin() * 0.5;
            }
        }

        let out = run(&mut f, &input, 333);
        assert_eq!(out.nsamples(), 1000);
        for ch in 0..2 {
            for (a, b) in out.plane(ch).iter().zip(input.plane(ch)) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn verify_fixed_gain() {
        let mut f = Agc::new(128);
        f.auto_gain = false;
        f.master = 0.5;
        assert!(f.open(spk()));

        let mut input = SampleBuf::with_size(2, 512);
        for ch in 0..2 {
            input.plane_mut(ch).fill(0.8);
        }

        let out = run(&mut f, &input, 100);
        assert_eq!(out.nsamples(), 512);
        // After the first cross-faded block the gain is stable.
        for ch in 0..2 {
            for &s in &out.plane(ch)[128..] {
                assert!((s - 0.4).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn verify_limits_overflow() {
        // A signal far above full scale must come out clipped to the reference level at most,
        // and converge below it as the gain attacks.
        let mut f = Agc::new(128);
        assert!(f.open(spk()));

        let mut input = SampleBuf::with_size(2, 4096);
        for ch in 0..2 {
            input.plane_mut(ch).fill(2.0);
        }

        let out = run(&mut f, &input, 256);
        assert_eq!(out.nsamples(), 4096);
        for ch in 0..2 {
            for &s in out.plane(ch) {
                assert!(s.abs() <= 1.0 + 1e-9);
            }
        }

        // The gain keeps attacking over the whole stream.
        assert!(f.gain() < 1.0);
    }

    #[test]
    fn verify_timestamp_propagation() {
        // A stamp on the first chunk reappears on the first emitted block, delayed by nothing
        // (the stamped sample is the first sample out).
        let mut f = Agc::new(100);
        f.auto_gain = false;
        assert!(f.open(spk()));

        let mut input = Chunk::new();
        input.set_linear(SampleBuf::with_size(2, 250), 250);
        input.set_sync(true, 5.0);

        let mut out = Chunk::new();
        // 250 samples fill two blocks; the first emitted block carries the stamp.
        assert!(f.process(&mut input, &mut out).unwrap());
        assert!(out.sync);
        assert_eq!(out.time, 5.0);
    }
}
