// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{Chunk, Speakers};
use crate::errors::Result;
use crate::filter::Filter;

/// Cuts out the middle of a stream: passes data between `start` and `end`, drops the rest.
///
/// Positions are in samples for linear formats and bytes for raw formats, counted across the
/// whole stream. `None` means "not bounded on this side".
#[derive(Debug, Default)]
pub struct SliceFilter {
    pos: u64,
    start: Option<u64>,
    end: Option<u64>,

    open: bool,
    spk: Speakers,
}

impl SliceFilter {
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        if let (Some(start), Some(end)) = (start, end) {
            assert!(start <= end);
        }
        SliceFilter { pos: 0, start, end, open: false, spk: Speakers::UNKNOWN }
    }

    /// Reset the running position and set new bounds.
    pub fn set_range(&mut self, start: Option<u64>, end: Option<u64>) {
        if let (Some(start), Some(end)) = (start, end) {
            assert!(start <= end);
        }
        self.pos = 0;
        self.start = start;
        self.end = end;
    }
}

impl Filter for SliceFilter {
    fn name(&self) -> &'static str {
        "SliceFilter"
    }

    fn can_open(&self, _spk: Speakers) -> bool {
        true
    }

    fn open(&mut self, spk: Speakers) -> bool {
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
        self.pos = 0;
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        if out.is_dummy() {
            return Ok(false);
        }

        let size = out.len() as u64;

        // Ignore everything after the end.
        if self.end.is_some_and(|end| self.pos >= end) {
            return Ok(false);
        }

        // Ignore everything before the beginning.
        if self.start.is_some_and(|start| self.pos + size <= start) {
            self.pos += size;
            return Ok(false);
        }

        // Cut off the tail.
        let mut len = size;
        if let Some(end) = self.end {
            if self.pos + size > end {
                len = end - self.pos;
            }
        }

        // Cut off the head.
        if let Some(start) = self.start {
            if self.pos < start {
                let head = (start - self.pos) as usize;
                if self.spk.is_linear() {
                    out.drop_samples(head);
                }
                else {
                    out.drop_rawdata(head);
                }
                len -= head as u64;
                self.pos = start;
            }
        }

        // Trim the kept window to `len`.
        let extra = out.len() as u64 - len;
        if extra > 0 {
            out.truncate(len as usize);
        }

        self.pos += len;
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

    fn run_slice(start: Option<u64>, end: Option<u64>, stream_len: usize, chunk: usize) -> Vec<f64> {
        let spk = Speakers::new(Format::Linear, ChannelMask::MONO, 48000);
        let mut f = SliceFilter::new(start, end);
        assert!(f.open(spk));

        let mut collected = Vec::new();
        let mut pos = 0usize;
        while pos < stream_len {
            let len = chunk.min(stream_len - pos);
            let mut buf = SampleBuf::with_size(1, len);
            for (i, s) in buf.plane_mut(0).iter_mut().enumerate() {
                *s = (pos + i) as f64;
            }
            let mut input = Chunk::new();
            input.set_linear(buf, len);
            pos += len;

            let mut out = Chunk::new();
            while f.process(&mut input, &mut out).unwrap() {
                collected.extend_from_slice(out.plane(0));
            }
        }
        collected
    }

    #[test]
    fn verify_middle_cut() {
        let out = run_slice(Some(100), Some(200), 1000, 64);
        assert_eq!(out.len(), 100);
        assert_eq!(out[0], 100.0);
        assert_eq!(out[99], 199.0);
    }

    #[test]
    fn verify_bounds_clamping() {
        // Output length = max(0, min(end, stream_end) - max(start, 0)).
        assert_eq!(run_slice(Some(900), Some(2000), 1000, 128).len(), 100);
        assert_eq!(run_slice(Some(1500), Some(2000), 1000, 128).len(), 0);
        assert_eq!(run_slice(None, Some(10), 1000, 3).len(), 10);
        assert_eq!(run_slice(Some(990), None, 1000, 7).len(), 10);
        assert_eq!(run_slice(None, None, 1000, 11).len(), 1000);
    }

    #[test]
    fn verify_cut_inside_one_chunk() {
        let out = run_slice(Some(10), Some(20), 1000, 1000);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], 10.0);
    }
}
