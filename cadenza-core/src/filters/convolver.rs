// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use log::warn;

use crate::audio::{Chunk, SampleBuf, Speakers};
use crate::dsp::clp2;
use crate::dsp::fft::{spectrum_mul, Rdft};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};
use crate::fir::{FirGenerator, FirInstance, FirType, IdentityFir};
use crate::sync::SyncHelper;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    Passthrough,
    Zero,
    Gain,
    Convolve,
}

/// Applies an impulse response to all channels by overlap-add FFT convolution.
///
/// The response comes from a shared [`FirGenerator`]. The generator's version observed at the
/// last (re)initialization is kept; when it changes, the convolver drains its buffered tail and
/// rebuilds itself with the freshly made instance, so parameter changes never glitch the sample
/// count.
///
/// Identity, zero and gain instances short-circuit to in-place processing without buffering or
/// latency. A custom instance of length `len` and centre `c` runs in blocks of
/// `N = clp2(len)` samples with FFTs of `2N`; the first `c` output samples (the pre-ring of the
/// linear-phase response) are dropped to keep the output aligned with the input.
pub struct Convolver {
    gen: Arc<dyn FirGenerator>,
    ver: u32,
    fir: Option<FirInstance>,
    sync: SyncHelper,

    n: usize,
    c: usize,
    pos: usize,

    fft: Option<Rdft>,
    filter_spectrum: Vec<f64>,
    buf: SampleBuf,
    delay: SampleBuf,

    pre_samples: usize,
    post_samples: usize,
    mode: Mode,
    reinit: bool,

    open: bool,
    spk: Speakers,
}

impl Convolver {
    /// Instantiate with the given response generator.
    pub fn new(gen: Arc<dyn FirGenerator>) -> Self {
        Convolver {
            ver: gen.version(),
            gen,
            fir: None,
            sync: SyncHelper::new(),
            n: 0,
            c: 0,
            pos: 0,
            fft: None,
            filter_spectrum: Vec::new(),
            buf: SampleBuf::new(),
            delay: SampleBuf::new(),
            pre_samples: 0,
            post_samples: 0,
            mode: Mode::Passthrough,
            reinit: false,
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    /// The response generator in use.
    pub fn fir_generator(&self) -> &Arc<dyn FirGenerator> {
        &self.gen
    }

    /// Replace the response generator. Takes effect like any other generator change: the
    /// buffered tail is drained before the new response applies.
    pub fn set_fir(&mut self, gen: Arc<dyn FirGenerator>) {
        self.gen = gen;
        self.reinit = true;
    }

    /// Drop the generator, reverting to passthrough.
    pub fn release_fir(&mut self) {
        self.set_fir(Arc::new(IdentityFir));
    }

    /// Returns true when the generator changed and the convolver will rebuild at the next
    /// `process` call.
    pub fn want_reinit(&self) -> bool {
        self.reinit || self.ver != self.gen.version()
    }

    fn init_state(&mut self) {
        let nch = self.spk.nch();

        self.ver = self.gen.version();
        self.fir = self.gen.make(self.spk.sample_rate);
        self.sync.reset();
        self.pos = 0;
        self.pre_samples = 0;
        self.post_samples = 0;
        self.fft = None;

        let fir = match self.fir.as_ref() {
            Some(fir) => fir,
            None => {
                warn!("Convolver: generator made no instance, passing through");
                self.mode = Mode::Passthrough;
                return;
            }
        };

        match fir.kind() {
            FirType::Identity => {
                self.mode = Mode::Passthrough;
                return;
            }
            FirType::Zero => {
                self.mode = Mode::Zero;
                return;
            }
            FirType::Gain => {
                self.mode = Mode::Gain;
                return;
            }
            FirType::Custom => (),
        }

        let len = fir.length();
        self.n = clp2(len);
        self.c = fir.center();

        let fft = Rdft::new(self.n * 2);
        self.filter_spectrum.clear();
        self.filter_spectrum.resize(self.n * 2, 0.0);
        for (i, &tap) in fir.data().iter().enumerate() {
            // The 1/N inverse transform scale is folded into the response spectrum.
            self.filter_spectrum[i] = tap / self.n as f64;
        }
        fft.forward(&mut self.filter_spectrum);
        self.fft = Some(fft);

        self.buf.allocate(nch, self.n * 2);
        self.delay.allocate(nch, self.n);

        self.pre_samples = self.c;
        self.post_samples = len - self.c;
        self.mode = Mode::Convolve;
    }

    fn need_flushing(&self) -> bool {
        self.mode == Mode::Convolve && self.post_samples > 0
    }

    /// One block of overlap-add: transform, multiply, inverse, add the previous tail, save the
    /// new tail.
    fn convolve(&mut self) {
        let n = self.n;
        let nch = self.spk.nch();
        let fft = self.fft.as_ref().unwrap();

        for ch in 0..nch {
            let plane = self.buf.plane_mut(ch);
            plane[n..].fill(0.0);
            fft.forward(plane);
            spectrum_mul(plane, &self.filter_spectrum);
            fft.inverse(plane);
        }

        for ch in 0..nch {
            let plane = self.buf.plane_mut(ch);
            let tail = self.delay.plane_mut(ch);
            for (s, d) in plane.iter_mut().zip(tail.iter()) {
                *s += d;
            }
            tail.copy_from_slice(&plane[n..]);
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
        let emit_len = self.pos + self.c;

        for ch in 0..nch {
            self.buf.plane_mut(ch)[self.pos..self.n].fill(0.0);
        }

        self.convolve();
        self.post_samples = 0;
        self.pos = 0;
        self.emit(out, emit_len);
    }
}

impl Filter for Convolver {
    fn name(&self) -> &'static str {
        "Convolver"
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
        self.fir = None;
        self.fft = None;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {
        self.sync.reset();
        if self.mode == Mode::Convolve {
            self.pos = 0;
            self.pre_samples = self.c;
            self.post_samples = self.fir.as_ref().map_or(0, |fir| fir.length() - self.c);
            self.delay.zero();
        }
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        // A generator change drains the current tail, then rebuilds.
        if self.want_reinit() {
            if self.need_flushing() {
                self.flush_block(out);
                return Ok(!out.is_dummy());
            }
            self.init_state();
            self.reinit = false;
        }

        match self.mode {
            Mode::Passthrough => {
                *out = input.take();
                Ok(!out.is_dummy())
            }
            Mode::Zero => {
                *out = input.take();
                if out.is_dummy() {
                    return Ok(false);
                }
                for plane in out.planes_mut().into_iter().take(self.spk.nch()) {
                    plane.fill(0.0);
                }
                Ok(true)
            }
            Mode::Gain => {
                *out = input.take();
                if out.is_dummy() {
                    return Ok(false);
                }
                let gain = self.fir.as_ref().unwrap().gain_value();
                for plane in out.planes_mut().into_iter().take(self.spk.nch()) {
                    for s in plane.iter_mut() {
                        *s *= gain;
                    }
                }
                Ok(true)
            }
            Mode::Convolve => {
                self.sync.receive_sync(input);

                let gone = (self.n - self.pos).min(input.len());
                if gone > 0 {
                    self.buf.copy_from(self.pos, &input.planes(), 0, self.spk.nch(), gone);
                    self.pos += gone;
                    input.drop_samples(gone);
                    self.sync.put(gone);
                }

                if self.pos < self.n {
                    return Ok(false);
                }

                self.pos = 0;
                self.convolve();
                let n = self.n;
                self.emit(out, n);
                Ok(true)
            }
        }
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
