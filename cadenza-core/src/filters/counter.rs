// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{Chunk, Speakers};
use crate::errors::Result;
use crate::filter::Filter;

/// Counts the samples (or bytes, for raw formats) passed through the filter.
#[derive(Debug, Default)]
pub struct Counter {
    count: u64,
    open: bool,
    spk: Speakers,
}

impl Counter {
    pub fn new() -> Self {
        Counter::default()
    }

    /// The number of units passed since the last `reset`.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Filter for Counter {
    fn name(&self) -> &'static str {
        "Counter"
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
        self.count = 0;
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        if out.is_dummy() {
            return Ok(false);
        }
        self.count += out.len() as u64;
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
    fn verify_counting() {
        let mut f = Counter::new();
        assert!(f.open(Speakers::new(Format::Linear, ChannelMask::STEREO, 48000)));

        for _ in 0..3 {
            let mut input = Chunk::new();
            input.set_linear(SampleBuf::with_size(2, 100), 100);
            let mut out = Chunk::new();
            assert!(f.process(&mut input, &mut out).unwrap());
        }
        assert_eq!(f.count(), 300);

        f.reset();
        assert_eq!(f.count(), 0);
    }
}
