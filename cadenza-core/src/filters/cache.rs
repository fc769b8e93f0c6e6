// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{ChannelName, Chunk, SampleBuf, Speakers};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};

/// A passthrough filter keeping a circular history of the stream.
///
/// Playback devices buffer output, so an audio visualization fed from the stream runs ahead of
/// what is audible. This filter lets the visualization read the samples at the moment actually
/// playing: it records everything passing through and serves time-addressed windows from the
/// history.
pub struct CacheFilter {
    stream_time: f64,
    buf: SampleBuf,
    buf_time: f64,
    buf_samples: usize,
    pos: usize,

    open: bool,
    spk: Speakers,
}

impl CacheFilter {
    /// Instantiate with a history of `size` seconds.
    pub fn new(size: f64) -> Self {
        CacheFilter {
            stream_time: 0.0,
            buf: SampleBuf::new(),
            buf_time: size.max(0.0),
            buf_samples: 0,
            pos: 0,
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    /// The history size in seconds.
    pub fn size(&self) -> f64 {
        self.buf_time
    }

    /// The history size in samples (zero before `open`).
    pub fn nsamples(&self) -> usize {
        self.buf_samples
    }

    /// Resize the history.
    pub fn set_size(&mut self, size: f64) {
        self.buf_time = size.max(0.0);
        if self.open {
            self.rebuild();
        }
    }

    /// The time right after the last sample cached.
    pub fn time(&self) -> f64 {
        self.stream_time
    }

    /// Copy a window of cached samples of one channel (or the sum of all channels for `None`)
    /// into `out`.
    ///
    /// The window ends `out.len()` samples after `time` and is clamped to the actual history
    /// bounds `[time() - size(), time()]`. Returns the number of samples copied; zero when the
    /// stream does not carry the requested channel.
    pub fn get_samples(&self, ch: Option<ChannelName>, time: f64, out: &mut [f64]) -> usize {
        let channel = match ch {
            Some(name) => match self.spk.channel_index(name) {
                Some(ch) => Some(ch),
                None => return 0,
            },
            None => None,
        };

        let size = out.len().min(self.buf_samples);
        if size == 0 {
            return 0;
        }

        let rate = f64::from(self.spk.sample_rate);
        let behind = ((self.stream_time - time) * rate + 0.5) as i64;
        let mut start = self.buf_samples as i64 - behind;

        if start < 0 {
            start = 0;
        }
        if start as usize + size > self.buf_samples {
            start = (self.buf_samples - size) as i64;
        }

        let mut start = start as usize + self.pos;
        if start >= self.buf_samples {
            start -= self.buf_samples;
        }

        let copy = |out: &mut [f64], plane: &[f64], acc: bool| {
            let fill = |dst: &mut [f64], src: &[f64], acc: bool| {
                if acc {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += s;
                    }
                }
                else {
                    dst.copy_from_slice(src);
                }
            };

            if start + size > self.buf_samples {
                let size1 = self.buf_samples - start;
                fill(&mut out[..size1], &plane[start..], acc);
                fill(&mut out[size1..size], &plane[..size - size1], acc);
            }
            else {
                fill(&mut out[..size], &plane[start..start + size], acc);
            }
        };

        match channel {
            Some(ch) => copy(out, self.buf.plane(ch), false),
            None => {
                out[..size].fill(0.0);
                for ch in 0..self.spk.nch() {
                    copy(out, self.buf.plane(ch), true);
                }
            }
        }

        size
    }

    fn rebuild(&mut self) {
        self.buf_samples = (self.buf_time * f64::from(self.spk.sample_rate)) as usize;
        self.buf.allocate(self.spk.nch(), self.buf_samples.max(1));
        self.pos = 0;
        self.stream_time = 0.0;
    }
}

impl Filter for CacheFilter {
    fn name(&self) -> &'static str {
        "CacheFilter"
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
        self.stream_time = 0.0;
        self.buf.zero();
        self.pos = 0;
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        if out.is_dummy() {
            return Ok(false);
        }

        if out.sync {
            self.stream_time = out.time;
        }

        let size = out.len();
        self.stream_time += size as f64 / f64::from(self.spk.sample_rate);

        if self.buf_samples == 0 {
            return Ok(true);
        }

        let nch = self.spk.nch();
        let planes = out.planes();

        if size >= self.buf_samples {
            // The chunk alone overwrites the whole history.
            let start = size - self.buf_samples;
            for ch in 0..nch {
                self.buf.plane_mut(ch).copy_from_slice(&planes[ch][start..]);
            }
            self.pos = 0;
        }
        else if self.pos + size > self.buf_samples {
            let size1 = self.buf_samples - self.pos;
            let size2 = size - size1;
            for ch in 0..nch {
                let plane = self.buf.plane_mut(ch);
                plane[self.pos..].copy_from_slice(&planes[ch][..size1]);
                plane[..size2].copy_from_slice(&planes[ch][size1..]);
            }
            self.pos = size2;
        }
        else {
            for ch in 0..nch {
                self.buf.plane_mut(ch)[self.pos..self.pos + size]
                    .copy_from_slice(planes[ch]);
            }
            self.pos += size;
            if self.pos >= self.buf_samples {
                self.pos = 0;
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
    use crate::audio::{ChannelMask, Format};

    fn feed_ramp(f: &mut CacheFilter, nch: usize, total: usize, chunk: usize) {
        let mut pos = 0;
        while pos < total {
            let len = chunk.min(total - pos);
            let mut buf = SampleBuf::with_size(nch, len);
            for ch in 0..nch {
                for (i, s) in buf.plane_mut(ch).iter_mut().enumerate() {
                    *s = (pos + i) as f64;
                }
            }
            let mut input = Chunk::new();
            input.set_linear(buf, len);
            let mut out = Chunk::new();
            assert!(f.process(&mut input, &mut out).unwrap());
            pos += len;
        }
    }

    #[test]
    fn verify_recent_window() {
        let spk = Speakers::new(Format::Linear, ChannelMask::MONO, 1000);
        // One second of history at 1 kHz = 1000 samples.
        let mut f = CacheFilter::new(1.0);
        assert!(f.open(spk));

        feed_ramp(&mut f, 1, 2500, 333);
        assert!((f.time() - 2.5).abs() < 1e-9);

        // The last 10 samples end at time().
        let mut out = [0.0; 10];
        let n = f.get_samples(Some(ChannelName::FrontCentre), f.time() - 0.01, &mut out);
        assert_eq!(n, 10);
        assert_eq!(out[0], 2490.0);
        assert_eq!(out[9], 2499.0);
    }

    #[test]
    fn verify_window_clamping() {
        let spk = Speakers::new(Format::Linear, ChannelMask::MONO, 1000);
        let mut f = CacheFilter::new(0.1);
        assert!(f.open(spk));
        feed_ramp(&mut f, 1, 500, 100);

        // A request older than the history is clamped to the oldest window.
        let mut out = [0.0; 10];
        let n = f.get_samples(Some(ChannelName::FrontCentre), 0.0, &mut out);
        assert_eq!(n, 10);
        assert_eq!(out[0], 400.0);

        // A request longer than the ring is clamped to the ring size.
        let mut out = [0.0; 500];
        let n = f.get_samples(Some(ChannelName::FrontCentre), f.time(), &mut out);
        assert_eq!(n, 100);
        assert_eq!(out[0], 400.0);
        assert_eq!(out[99], 499.0);
    }

    #[test]
    fn verify_channel_sum() {
        let spk = Speakers::new(Format::Linear, ChannelMask::STEREO, 1000);
        let mut f = CacheFilter::new(0.05);
        assert!(f.open(spk));
        feed_ramp(&mut f, 2, 200, 50);

        let mut single = [0.0; 5];
        assert_eq!(f.get_samples(Some(ChannelName::FrontLeft), f.time(), &mut single), 5);

        let mut sum = [0.0; 5];
        assert_eq!(f.get_samples(None, f.time(), &mut sum), 5);
        for (s, v) in sum.iter().zip(single.iter()) {
            assert!((s - 2.0 * v).abs() < 1e-12);
        }

        // Unknown channel: nothing copied.
        let mut out = [0.0; 5];
        assert_eq!(f.get_samples(Some(ChannelName::Lfe), f.time(), &mut out), 0);
    }
}
