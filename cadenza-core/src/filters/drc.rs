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

const DEF_LOUDNESS_INTERVAL: f64 = 0.050; // 50 ms

const LEVEL_MINUS_50DB: f64 = 0.0031622776601683793319988935444327;
const LEVEL_MINUS_100DB: f64 = 0.00001;
const LEVEL_PLUS_100DB: f64 = 100000.0;

/// Dynamic range compression.
///
/// Loudness is measured as the channel-summed RMS over blocks of `loudness_interval` seconds.
/// The compression curve raises quiet passages towards a target derived from `drc_power`: at
/// -50 dB input loudness the gain is `drc_power` dB. The block engine is the same ping-pong
/// Hann cross-fade used by [`super::Agc`].
pub struct Drc {
    /// Compression enabled.
    pub drc: bool,
    /// Compression power in dB: the loudness raise applied at a -50 dB input level.
    pub drc_power: f64,
    /// Desired plain gain applied on top of the compression.
    pub gain: f64,
    /// Gain attack speed in dB/s.
    pub attack: f64,
    /// Gain release speed in dB/s.
    pub release: f64,

    drc_level: f64,
    factor: f64,
    loudness_interval: f64,

    nsamples: usize,
    window: SampleBuf,
    buf: [SampleBuf; 2],
    sample: [usize; 2],
    block: usize,
    sync: SyncHelper,

    open: bool,
    spk: Speakers,
}

impl Drc {
    pub fn new() -> Self {
        Drc {
            drc: false,
            drc_power: 0.0,
            gain: 1.0,
            attack: 50.0,
            release: 50.0,
            drc_level: 1.0,
            factor: 1.0,
            loudness_interval: DEF_LOUDNESS_INTERVAL,
            nsamples: 0,
            window: SampleBuf::new(),
            buf: [SampleBuf::new(), SampleBuf::new()],
            sample: [0, 0],
            block: 0,
            sync: SyncHelper::new(),
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    /// The loudness measurement interval in seconds.
    pub fn loudness_interval(&self) -> f64 {
        self.loudness_interval
    }

    /// Set the loudness measurement interval; non-positive values select the default.
    pub fn set_loudness_interval(&mut self, interval: f64) {
        self.loudness_interval = if interval > 0.0 { interval } else { DEF_LOUDNESS_INTERVAL };
        if self.open {
            self.rebuild();
        }
    }

    /// The current compression gain (read-only).
    pub fn drc_level(&self) -> f64 {
        self.drc_level
    }

    fn rebuild(&mut self) {
        self.nsamples =
            ((self.loudness_interval * f64::from(self.spk.sample_rate)) as usize).max(1);
        let n = self.nsamples;

        self.buf[0].allocate(self.spk.nch(), n);
        self.buf[1].allocate(self.spk.nch(), n);

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

    fn process_block(&mut self) {
        let nch = self.spk.nch();
        let nsamples = self.nsamples;

        let old_factor = self.factor;

        let release = self.release.max(0.0);
        let release_factor =
            db2value(release * nsamples as f64 / f64::from(self.spk.sample_rate));

        // Channel-summed RMS loudness of the block just filled.
        let mut level = 0.0;
        for ch in 0..nch {
            let mut sum = 0.0;
            for &s in self.buf[self.block].plane(ch) {
                sum += s * s;
            }
            level += (sum / nsamples as f64).sqrt();
        }
        level /= self.spk.level;

        if self.drc {
            // The compression curve in gain form; below -50 dB the curve mirrors so silence is
            // not amplified without bound.
            let compressed_level = if level > LEVEL_MINUS_50DB {
                level.powf(-self.drc_power / 50.0)
            }
            else {
                (level * LEVEL_PLUS_100DB).powf(self.drc_power / 50.0)
            };
            let released_level = self.drc_level * release_factor;

            if level < LEVEL_MINUS_100DB {
                self.drc_level = 1.0;
            }
            else if released_level > compressed_level {
                self.drc_level = compressed_level;
            }
            else {
                self.drc_level = released_level;
            }
        }
        else {
            self.drc_level = 1.0;
        }

        self.factor = self.gain * self.drc_level;

        // Switch to the block ready for emission.
        self.block = self.next_block();
        if self.sample[self.block] == 0 {
            return;
        }

        if !equal_samples(old_factor, self.factor) {
            for ch in 0..nch {
                let plane = self.buf[self.block].plane_mut(ch);
                for (s, (w0, w1)) in plane
                    .iter_mut()
                    .zip(self.window.plane(0).iter().zip(self.window.plane(1)))
                    .take(nsamples)
                {
                    *s *= old_factor * w1 + self.factor * w0;
                }
            }
        }
        else if !equal_samples(self.factor, 1.0) {
            for ch in 0..nch {
                for s in self.buf[self.block].plane_mut(ch).iter_mut() {
                    *s *= self.factor;
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

impl Default for Drc {
    fn default() -> Self {
        Drc::new()
    }
}

impl Filter for Drc {
    fn name(&self) -> &'static str {
        "Drc"
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
        self.factor = 1.0;
        self.drc_level = 1.0;
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
