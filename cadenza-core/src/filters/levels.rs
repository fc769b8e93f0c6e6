// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{Chunk, Speakers, NUM_CHANNELS};
use crate::dsp::value2db;
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};

const MAX_LEVELS_CACHE: usize = 256;
const MAX_HISTOGRAM: usize = 128;

/// A small ring of timestamped per-channel peak levels.
///
/// Producers add one entry per measurement block; consumers ask for the peak levels up to a
/// playback time, which compensates for the latency of the output device.
#[derive(Debug)]
pub struct LevelsCache {
    levels: [[f64; NUM_CHANNELS]; MAX_LEVELS_CACHE],
    time: [f64; MAX_LEVELS_CACHE],
    pos: usize,
    end: usize,
}

impl Default for LevelsCache {
    fn default() -> Self {
        LevelsCache {
            levels: [[0.0; NUM_CHANNELS]; MAX_LEVELS_CACHE],
            time: [-1.0; MAX_LEVELS_CACHE],
            pos: 0,
            end: 0,
        }
    }
}

impl LevelsCache {
    pub fn new() -> Self {
        LevelsCache::default()
    }

    fn next_pos(p: usize) -> usize {
        (p + 1) % MAX_LEVELS_CACHE
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.end = 0;
        self.levels[0] = [0.0; NUM_CHANNELS];
        self.time[0] = -1.0;
    }

    /// Add a measurement taken at `time`.
    pub fn add_levels(&mut self, time: f64, levels: [f64; NUM_CHANNELS]) {
        self.pos = Self::next_pos(self.pos);
        if self.pos == self.end {
            self.end = Self::next_pos(self.end);
        }
        self.time[self.pos] = time;
        self.levels[self.pos] = levels;
    }

    /// The peak levels up to `time` (a negative time means "everything"). When `drop` is set,
    /// the consumed entries are removed.
    pub fn get_levels(&mut self, time: f64, drop: bool) -> [f64; NUM_CHANNELS] {
        let mut out = self.levels[self.end];
        let time = if time < 0.0 { self.time[self.pos] } else { time };

        let mut b = self.end;
        let mut e = self.end;
        while self.time[b] < time && b != self.pos {
            e = b;
            b = Self::next_pos(b);
        }

        let mut i = self.end;
        while i != e {
            for (ch, level) in out.iter_mut().enumerate() {
                if self.levels[i][ch] > *level {
                    *level = self.levels[i][ch];
                }
            }
            i = Self::next_pos(i);
        }

        if drop {
            self.end = i;
        }
        out
    }
}

/// A per-channel level histogram with a configurable dB-per-bin resolution.
#[derive(Debug)]
pub struct LevelsHistogram {
    histogram: [[u32; MAX_HISTOGRAM]; NUM_CHANNELS],
    n: u32,
    dbpb: u32,
}

impl LevelsHistogram {
    pub fn new(dbpb: u32) -> Self {
        LevelsHistogram {
            histogram: [[0; MAX_HISTOGRAM]; NUM_CHANNELS],
            n: 0,
            dbpb: dbpb.max(1),
        }
    }

    pub fn reset(&mut self) {
        self.histogram = [[0; MAX_HISTOGRAM]; NUM_CHANNELS];
        self.n = 0;
    }

    pub fn dbpb(&self) -> u32 {
        self.dbpb
    }

    pub fn set_dbpb(&mut self, dbpb: u32) {
        self.dbpb = dbpb.max(1);
        self.reset();
    }

    /// Account one block of per-channel levels.
    pub fn add_levels(&mut self, levels: [f64; NUM_CHANNELS]) {
        for (ch, &level) in levels.iter().enumerate() {
            if level > 1e-50 {
                let bin = (-value2db(level) / self.dbpb as f64) as i64;
                let bin = bin.max(0) as usize;
                if bin < MAX_HISTOGRAM {
                    self.histogram[ch][bin] += 1;
                }
            }
        }
        self.n += 1;
    }

    /// The normalized histogram summed over all channels.
    pub fn get_histogram(&self, out: &mut [f64]) {
        out.fill(0.0);
        if self.n == 0 {
            return;
        }
        let inv_n = 1.0 / f64::from(self.n);
        for (i, out) in out.iter_mut().enumerate().take(MAX_HISTOGRAM) {
            for ch in 0..NUM_CHANNELS {
                *out += f64::from(self.histogram[ch][i]);
            }
            *out *= inv_n;
        }
    }

    /// The normalized histogram of one channel.
    pub fn get_channel_histogram(&self, ch: usize, out: &mut [f64]) {
        out.fill(0.0);
        if self.n == 0 {
            return;
        }
        let inv_n = 1.0 / f64::from(self.n);
        for (i, out) in out.iter_mut().enumerate().take(MAX_HISTOGRAM) {
            *out = f64::from(self.histogram[ch][i]) * inv_n;
        }
    }
}

/// A passthrough filter measuring per-channel peak levels in blocks of `nsamples` samples.
///
/// Levels are normalized to the stream's reference level, keyed by channel name and pushed into
/// a [`LevelsCache`] and a [`LevelsHistogram`].
#[derive(Debug)]
pub struct Levels {
    cache: LevelsCache,
    hist: LevelsHistogram,

    levels: [f64; NUM_CHANNELS],
    nsamples: usize,
    sample: usize,
    time: f64,

    open: bool,
    spk: Speakers,
}

impl Levels {
    pub fn new(nsamples: usize, dbpb: u32) -> Self {
        Levels {
            cache: LevelsCache::new(),
            hist: LevelsHistogram::new(dbpb),
            levels: [0.0; NUM_CHANNELS],
            nsamples: nsamples.max(1),
            sample: 0,
            time: 0.0,
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    pub fn nsamples(&self) -> usize {
        self.nsamples
    }

    /// The peak levels up to `time`; see [`LevelsCache::get_levels`].
    pub fn get_levels(&mut self, time: f64, drop: bool) -> [f64; NUM_CHANNELS] {
        self.cache.get_levels(time, drop)
    }

    /// The normalized histogram summed over all channels.
    pub fn get_histogram(&self, out: &mut [f64]) {
        self.hist.get_histogram(out);
    }
}

impl Default for Levels {
    fn default() -> Self {
        Levels::new(1024, 5)
    }
}

impl Filter for Levels {
    fn name(&self) -> &'static str {
        "Levels"
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

    fn reset(&mut self) {
        self.sample = 0;
        self.time = 0.0;
        self.levels = [0.0; NUM_CHANNELS];
        self.cache.reset();
        self.hist.reset();
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        if out.is_dummy() {
            return Ok(false);
        }

        if out.sync {
            self.time = out.time;
        }

        let order = self.spk.order();
        let rate = f64::from(self.spk.sample_rate);
        let level = self.spk.level;

        let size = out.len();
        let mut offset = 0;
        while offset < size {
            let block = (self.nsamples - self.sample).min(size - offset);

            for (ch, plane) in out.planes().into_iter().enumerate().take(self.spk.nch()) {
                let mut max = 0.0f64;
                for &s in &plane[offset..offset + block] {
                    max = max.max(s.abs());
                }
                max /= level;

                let name = order[ch].index();
                if max > self.levels[name] {
                    self.levels[name] = max;
                }
            }

            offset += block;
            self.sample += block;
            self.time += block as f64 / rate;

            if self.sample >= self.nsamples {
                let levels = self.levels;
                self.cache.add_levels(self.time, levels);
                self.hist.add_levels(levels);
                self.levels = [0.0; NUM_CHANNELS];
                self.sample = 0;
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
    use crate::audio::{ChannelMask, ChannelName, Format, SampleBuf};

    #[test]
    fn verify_peak_measurement() {
        let spk = Speakers::new(Format::Linear, ChannelMask::STEREO, 48000);
        let mut f = Levels::new(256, 5);
        assert!(f.open(spk));

        let mut buf = SampleBuf::with_size(2, 512);
        buf.plane_mut(0).fill(0.25);
        buf.plane_mut(1).fill(-0.5);
        let mut input = Chunk::new();
        input.set_linear(buf, 512);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());

        // The first read consumes the reset sentinel; the second returns the measurement.
        let _ = f.get_levels(-1.0, true);
        let levels = f.get_levels(-1.0, true);
        assert!((levels[ChannelName::FrontLeft.index()] - 0.25).abs() < 1e-12);
        assert!((levels[ChannelName::FrontRight.index()] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn verify_level_normalization() {
        // Levels are normalized to the reference level of the stream.
        let spk = Speakers::new(Format::Linear, ChannelMask::MONO, 48000).with_level(2.0);
        let mut f = Levels::new(128, 5);
        assert!(f.open(spk));

        let mut buf = SampleBuf::with_size(1, 256);
        buf.plane_mut(0).fill(1.0);
        let mut input = Chunk::new();
        input.set_linear(buf, 256);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());

        let _ = f.get_levels(-1.0, true);
        let levels = f.get_levels(-1.0, true);
        assert!((levels[ChannelName::FrontCentre.index()] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn verify_histogram() {
        let mut hist = LevelsHistogram::new(5);
        let mut levels = [0.0; NUM_CHANNELS];
        levels[0] = 0.1; // -20 dB -> bin 4 at 5 dB per bin
        hist.add_levels(levels);

        let mut out = [0.0; MAX_HISTOGRAM];
        hist.get_histogram(&mut out);
        assert!((out[4] - 1.0).abs() < 1e-12);
        assert!(out.iter().sum::<f64>() > 0.99);
    }
}
