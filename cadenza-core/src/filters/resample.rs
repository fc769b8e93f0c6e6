// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{Chunk, Speakers};
use crate::dsp::src::{get_core, SrcParams, SrcState};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};

/// Converts the stream to a fixed destination sample rate.
///
/// The filter wraps the shared two-stage conversion core (see [`crate::dsp::src`]) over all
/// channels of the stream. When the input already runs at the destination rate the filter is a
/// passthrough. Conversion introduces a time stamp jitter of about one sample period; stamps
/// are moved to the beginning of the output block they fall into.
pub struct Resample {
    sample_rate: u32,
    a: f64,
    q: f64,

    state: Option<SrcState>,
    out_spk: Speakers,
    sync: bool,
    time: f64,

    open: bool,
    spk: Speakers,
}

impl Resample {
    /// Instantiate without a destination rate; the filter cannot open until one is set.
    pub fn new() -> Self {
        Resample {
            sample_rate: 0,
            a: 100.0,
            q: 0.99,
            state: None,
            out_spk: Speakers::UNKNOWN,
            sync: false,
            time: 0.0,
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    /// Instantiate with a destination rate and default attenuation and quality.
    pub fn with_rate(sample_rate: u32) -> Self {
        let mut resample = Resample::new();
        resample.set(sample_rate, 100.0, 0.99);
        resample
    }

    /// Set the conversion parameters. Returns false and changes nothing when the attenuation or
    /// quality is out of range.
    pub fn set(&mut self, sample_rate: u32, a: f64, q: f64) -> bool {
        if a < 6.0 || a > 200.0 || q < 0.1 || q >= 0.9999999999 {
            return false;
        }

        self.sample_rate = sample_rate;
        self.a = a;
        self.q = q;

        if self.open {
            self.rebuild();
        }
        true
    }

    /// The destination sample rate (zero when unset).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The stopband attenuation in dB.
    pub fn attenuation(&self) -> f64 {
        self.a
    }

    /// The quality (normalized passband width).
    pub fn quality(&self) -> f64 {
        self.q
    }

    /// Returns true when no conversion is required.
    pub fn is_passthrough(&self) -> bool {
        self.sample_rate == 0 || self.spk.sample_rate == self.sample_rate
    }

    fn rebuild(&mut self) {
        self.out_spk = self.spk;
        if self.sample_rate != 0 {
            self.out_spk.sample_rate = self.sample_rate;
        }

        self.sync = false;
        self.time = 0.0;

        if self.is_passthrough() {
            self.state = None;
            return;
        }

        let params = SrcParams::new(self.spk.sample_rate, self.sample_rate, self.a, self.q);
        self.state = Some(SrcState::new(get_core(&params), self.spk.nch()));
    }

    fn emit(state: &SrcState, out: &mut Chunk, nch: usize) {
        let len = state.out_len();
        let buf = out.linear_mut(nch, len);
        for ch in 0..nch {
            buf.plane_mut(ch).copy_from_slice(state.out_plane(ch));
        }
    }
}

impl Default for Resample {
    fn default() -> Self {
        Resample::new()
    }
}

impl Filter for Resample {
    fn name(&self) -> &'static str {
        "Resample"
    }

    fn can_open(&self, spk: Speakers) -> bool {
        self.sample_rate != 0 && is_linear_input(spk)
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
        self.out_spk = Speakers::UNKNOWN;
        self.state = None;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {
        self.sync = false;
        self.time = 0.0;
        if let Some(state) = self.state.as_mut() {
            state.reset();
        }
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        let state = match self.state.as_mut() {
            None => {
                // Passthrough.
                *out = input.take();
                return Ok(!out.is_dummy());
            }
            Some(state) => state,
        };

        if input.sync {
            self.sync = true;
            self.time = input.time
                + state.timestamp_shift(self.spk.sample_rate, self.out_spk.sample_rate);
            input.set_sync(false, 0.0);
        }

        // Fill the conversion buffer; a block is produced only when it is full.
        let gone = state.fill(&input.planes(), 0, input.len());
        input.drop_samples(gone);

        if !state.can_process() {
            return Ok(false);
        }

        state.process();
        Self::emit(state, out, self.spk.nch());

        out.set_sync(self.sync, self.time);
        self.sync = false;
        self.time = 0.0;
        Ok(true)
    }

    fn flush(&mut self, out: &mut Chunk) -> Result<bool> {
        let state = match self.state.as_mut() {
            None => return Ok(false),
            Some(state) => state,
        };

        if !state.need_flushing() {
            return Ok(false);
        }

        state.flush();
        Self::emit(state, out, self.spk.nch());

        out.set_sync(self.sync, self.time);
        self.sync = false;
        self.time = 0.0;
        Ok(true)
    }

    fn get_input(&self) -> Speakers {
        self.spk
    }

    fn get_output(&self) -> Speakers {
        self.out_spk
    }
}
