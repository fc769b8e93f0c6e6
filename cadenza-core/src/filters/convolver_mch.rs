// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::audio::{ChannelName, Chunk, SampleBuf, Speakers, NUM_CHANNELS};
use crate::dsp::clp2;
use crate::dsp::fft::{spectrum_mul, Rdft};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};
use crate::fir::{FirGenerator, FirInstance, FirType};
use crate::sync::SyncHelper;

#[derive(Copy, Clone, Debug, PartialEq)]
enum ChannelMode {
    Pass,
    Zero,
    Gain(f64),
    Convolve,
}

/// Applies an independent impulse response to each channel.
///
/// Generators are assigned per channel *name*, not per plane, so an assignment survives channel
/// layout changes. Channels without a generator pass through.
///
/// When every channel resolves to an identity, zero or gain instance the filter runs in place
/// without buffering. Otherwise all channels share one block size derived from the widest
/// response envelope, and the trivial channels are routed through a delay of the common centre
/// so all channels stay phase aligned with the convolving ones.
pub struct ConvolverMch {
    gens: [Option<Arc<dyn FirGenerator>>; NUM_CHANNELS],
    vers: [u32; NUM_CHANNELS],
    firs: Vec<Option<FirInstance>>,
    modes: Vec<ChannelMode>,
    trivial: bool,
    reinit: bool,
    sync: SyncHelper,

    n: usize,
    c: usize,
    pos: usize,

    fft: Option<Rdft>,
    filter: SampleBuf,
    buf: SampleBuf,
    delay: SampleBuf,

    pre_samples: usize,
    post_samples: usize,

    open: bool,
    spk: Speakers,
}

impl ConvolverMch {
    pub fn new() -> Self {
        ConvolverMch {
            gens: Default::default(),
            vers: [0; NUM_CHANNELS],
            firs: Vec::new(),
            modes: Vec::new(),
            trivial: true,
            reinit: false,
            sync: SyncHelper::new(),
            n: 0,
            c: 0,
            pos: 0,
            fft: None,
            filter: SampleBuf::new(),
            buf: SampleBuf::new(),
            delay: SampleBuf::new(),
            pre_samples: 0,
            post_samples: 0,
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    /// Assign a response generator to a channel name.
    pub fn set_fir(&mut self, name: ChannelName, gen: Arc<dyn FirGenerator>) {
        self.gens[name.index()] = Some(gen);
        self.reinit = true;
    }

    /// The response generator of a channel name, if any.
    pub fn fir(&self, name: ChannelName) -> Option<&Arc<dyn FirGenerator>> {
        self.gens[name.index()].as_ref()
    }

    /// Remove the response generator of a channel name.
    pub fn release_fir(&mut self, name: ChannelName) {
        self.gens[name.index()] = None;
        self.reinit = true;
    }

    /// Remove all response generators.
    pub fn release_all_firs(&mut self) {
        self.gens = Default::default();
        self.reinit = true;
    }

    /// Returns true when a generator changed and the filter will rebuild at the next `process`
    /// call.
    pub fn want_reinit(&self) -> bool {
        if self.reinit {
            return true;
        }
        self.spk.order().iter().any(|name| {
            self.gens[name.index()]
                .as_ref()
                .is_some_and(|gen| gen.version() != self.vers[name.index()])
        })
    }

    fn init_state(&mut self) {
        let nch = self.spk.nch();
        let order = self.spk.order();

        self.sync.reset();
        self.pos = 0;
        self.pre_samples = 0;
        self.post_samples = 0;
        self.fft = None;
        self.trivial = true;

        self.firs.clear();
        self.modes.clear();

        let mut min_point: i64 = 0;
        let mut max_point: i64 = 0;

        for name in order.iter() {
            let fir = match self.gens[name.index()].as_ref() {
                Some(gen) => {
                    self.vers[name.index()] = gen.version();
                    gen.make(self.spk.sample_rate)
                }
                None => None,
            };

            let mode = match fir.as_ref() {
                None => ChannelMode::Pass,
                Some(fir) => match fir.kind() {
                    FirType::Identity => ChannelMode::Pass,
                    FirType::Zero => ChannelMode::Zero,
                    FirType::Gain => ChannelMode::Gain(fir.gain_value()),
                    FirType::Custom => {
                        self.trivial = false;
                        ChannelMode::Convolve
                    }
                },
            };

            if let Some(fir) = fir.as_ref() {
                min_point = min_point.min(-(fir.center() as i64));
                max_point = max_point.max(fir.length() as i64 - fir.center() as i64);
            }

            self.firs.push(fir);
            self.modes.push(mode);
        }

        if self.trivial {
            return;
        }

        // One block size for all channels, wide enough for the widest response envelope.
        self.n = clp2((max_point - min_point) as usize);
        self.c = (-min_point) as usize;

        let fft = Rdft::new(self.n * 2);
        self.filter.allocate(nch, self.n * 2);
        self.buf.allocate(nch, self.n * 2);
        self.delay.allocate(nch, self.n);

        for ch in 0..nch {
            if self.modes[ch] != ChannelMode::Convolve {
                continue;
            }
            let fir = self.firs[ch].as_ref().unwrap();
            let plane = self.filter.plane_mut(ch);
            let offset = self.c - fir.center();
            for (i, &tap) in fir.data().iter().enumerate() {
                plane[offset + i] = tap / self.n as f64;
            }
            fft.forward(plane);
        }
        self.fft = Some(fft);

        self.pre_samples = self.c;
        self.post_samples = self.n - self.c;
    }

    fn need_flushing(&self) -> bool {
        !self.trivial && self.post_samples > 0
    }

    /// Apply the trivial channel modes in place over `len` samples of every plane of `buf`.
    fn process_trivial(modes: &[ChannelMode], planes: &mut [&mut [f64]], len: usize) {
        for (plane, mode) in planes.iter_mut().zip(modes.iter()) {
            match *mode {
                ChannelMode::Zero => plane[..len].fill(0.0),
                ChannelMode::Gain(gain) => {
                    for s in plane[..len].iter_mut() {
                        *s *= gain;
                    }
                }
                _ => (),
            }
        }
    }

    fn process_convolve(&mut self) {
        let n = self.n;
        let fft = self.fft.as_ref().unwrap();

        for ch in 0..self.spk.nch() {
            if self.modes[ch] != ChannelMode::Convolve {
                continue;
            }

            let plane = self.buf.plane_mut(ch);
            plane[n..].fill(0.0);
            fft.forward(plane);
            spectrum_mul(plane, self.filter.plane(ch));
            fft.inverse(plane);

            let tail = self.delay.plane_mut(ch);
            for (s, d) in plane.iter_mut().zip(tail.iter()) {
                *s += d;
            }
            tail.copy_from_slice(&plane[n..]);
        }
    }

    /// Align the trivial channels: their block sits at offset `c`, delayed through a `c`-sample
    /// history, so they come out in phase with the convolved channels.
    fn align_trivial(&mut self) {
        let n = self.n;
        let c = self.c;
        for ch in 0..self.spk.nch() {
            if self.modes[ch] == ChannelMode::Convolve {
                continue;
            }
            let plane = self.buf.plane_mut(ch);
            let history = self.delay.plane_mut(ch);
            for i in 0..c {
                let tail = plane[n + i];
                plane[i] = history[i];
                history[i] = tail;
            }
        }
    }

    fn emit(&mut self, out: &mut Chunk, mut len: usize) {
        let nch = self.spk.nch();
        let mut offset = 0;
        if self.pre_samples > 0 {
            offset = self.pre_samples;
            len -= self.pre_samples;
            self.pre_samples = 0;
        }

        let buf = out.linear_mut(nch, len);
        buf.copy_from(0, &self.buf.planes(), offset, nch, len);

        self.sync.send_sync(out, 1.0 / f64::from(self.spk.sample_rate));
        let out_len = out.len();
        self.sync.drop(out_len);
    }

    fn flush_block(&mut self, out: &mut Chunk) {
        let nch = self.spk.nch();
        let n = self.n;
        let c = self.c;
        let emit_len = self.pos + c;

        for ch in 0..nch {
            if self.modes[ch] == ChannelMode::Convolve {
                self.buf.plane_mut(ch)[self.pos..n].fill(0.0);
            }
            else {
                self.buf.plane_mut(ch)[c + self.pos..].fill(0.0);
            }
        }

        self.align_trivial();
        {
            let mut planes = self.buf.planes_mut();
            Self::process_trivial(&self.modes, &mut planes, n);
        }
        self.process_convolve();

        self.post_samples = 0;
        self.pos = 0;
        self.emit(out, emit_len);
    }
}

impl Default for ConvolverMch {
    fn default() -> Self {
        ConvolverMch::new()
    }
}

impl Filter for ConvolverMch {
    fn name(&self) -> &'static str {
        "ConvolverMch"
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
        self.reinit = false;
        self.init_state();
        true
    }

    fn close(&mut self) {
        self.open = false;
        self.spk = Speakers::UNKNOWN;
        self.firs.clear();
        self.fft = None;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {
        self.sync.reset();
        if !self.trivial {
            self.pos = 0;
            self.pre_samples = self.c;
            self.post_samples = self.n - self.c;
            self.delay.zero();
        }
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        if self.want_reinit() {
            if self.need_flushing() {
                self.flush_block(out);
                return Ok(!out.is_dummy());
            }
            self.init_state();
            self.reinit = false;
        }

        if self.trivial {
            *out = input.take();
            if out.is_dummy() {
                return Ok(false);
            }
            let len = out.len();
            let mut planes = out.planes_mut();
            Self::process_trivial(&self.modes, &mut planes, len);
            return Ok(true);
        }

        self.sync.receive_sync(input);

        let gone = (self.n - self.pos).min(input.len());
        if gone > 0 {
            let planes = input.planes();
            for ch in 0..self.spk.nch() {
                // Trivial channels are written at the common centre offset.
                let offset = if self.modes[ch] == ChannelMode::Convolve {
                    self.pos
                }
                else {
                    self.c + self.pos
                };
                self.buf.plane_mut(ch)[offset..offset + gone]
                    .copy_from_slice(&planes[ch][..gone]);
            }
            drop(planes);
            self.pos += gone;
            input.drop_samples(gone);
            self.sync.put(gone);
        }

        if self.pos < self.n {
            return Ok(false);
        }

        self.align_trivial();
        self.pos = 0;
        {
            let n = self.n;
            let mut planes = self.buf.planes_mut();
            Self::process_trivial(&self.modes, &mut planes, n);
        }
        self.process_convolve();

        let n = self.n;
        self.emit(out, n);
        Ok(true)
    }

    fn flush(&mut self, out: &mut Chunk) -> Result<bool> {
        if !self.need_flushing() {
            return Ok(false);
        }
        self.flush_block(out);
        Ok(true)
    }

    fn get_input(&self) -> Speakers {
        self.spk
    }

    fn get_output(&self) -> Speakers {
        self.spk
    }
}
