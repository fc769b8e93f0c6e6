// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{Chunk, Speakers};
use crate::dsp::clp2;
use crate::dsp::fft::Rdft;
use crate::dsp::kaiser::{kaiser_alpha, kaiser_window};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};

/// A passthrough filter computing the magnitude spectrum of the stream.
///
/// The filter keeps a window of the last `2 * length` samples of the channel sum. On demand the
/// window is weighted with a Kaiser window, transformed, and reduced to `length` magnitude
/// bins. `length` is rounded up to a power of two.
pub struct Spectrum {
    length: usize,
    fft: Option<Rdft>,

    data: Vec<f64>,
    spectrum: Vec<f64>,
    window: Vec<f64>,
    converted: bool,

    open: bool,
    spk: Speakers,
}

impl Spectrum {
    pub fn new() -> Self {
        Spectrum {
            length: 0,
            fft: None,
            data: Vec::new(),
            spectrum: Vec::new(),
            window: Vec::new(),
            converted: true,
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Set the number of spectrum bins (rounded up to a power of two). Zero disables analysis.
    pub fn set_length(&mut self, length: usize) {
        let length = if length == 0 { 0 } else { clp2(length) };
        if self.length == length {
            return;
        }

        self.length = length;
        if length == 0 {
            self.fft = None;
            self.data.clear();
            self.spectrum.clear();
            self.window.clear();
            self.converted = true;
            return;
        }

        self.fft = Some(Rdft::new(length * 2));
        self.data = vec![0.0; 2 * length];
        self.spectrum = vec![0.0; 2 * length];

        // A Kaiser window over the analysis buffer; 100 dB sidelobe attenuation.
        let alpha = kaiser_alpha(100.0);
        let odd = length - 1;
        let n = 2 * odd + 1;
        self.window = (0..2 * length)
            .map(|i| {
                if i < n {
                    kaiser_window(i as f64 - odd as f64, n, alpha)
                }
                else {
                    0.0
                }
            })
            .collect();

        self.converted = true;
    }

    /// The magnitude spectrum of the current analysis window, and the bin width in Hz.
    ///
    /// `out` receives up to `length` bins. Returns the bin-to-Hz factor.
    pub fn get_spectrum(&mut self, out: &mut [f64]) -> f64 {
        let length = self.length;
        if length == 0 {
            return 0.0;
        }

        if !self.converted {
            let norm = 1.0 / (self.spk.level * length as f64);
            for (i, s) in self.spectrum.iter_mut().enumerate() {
                *s = self.data[i] * self.window[i] * norm;
            }

            let fft = self.fft.as_ref().unwrap();
            fft.forward(&mut self.spectrum);

            for i in 0..length {
                let re = self.spectrum[i * 2];
                let im = self.spectrum[i * 2 + 1];
                self.spectrum[i] = (re * re + im * im).sqrt();
            }
            self.converted = true;
        }

        let n = out.len().min(length);
        out[..n].copy_from_slice(&self.spectrum[..n]);

        if self.spk.sample_rate > 0 {
            f64::from(self.spk.sample_rate) / (2.0 * length as f64)
        }
        else {
            0.0
        }
    }
}

impl Default for Spectrum {
    fn default() -> Self {
        Spectrum::new()
    }
}

impl Filter for Spectrum {
    fn name(&self) -> &'static str {
        "Spectrum"
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
        self.data.fill(0.0);
        self.spectrum.fill(0.0);
        self.converted = true;
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        if out.is_dummy() {
            return Ok(false);
        }

        let window = 2 * self.length;
        if window == 0 {
            return Ok(true);
        }

        let size = out.len();
        let nch = self.spk.nch();
        let planes = out.planes();

        if size >= window {
            // The chunk alone covers the analysis window: keep its tail.
            let pos = size - window;
            self.data.copy_from_slice(&planes[0][pos..pos + window]);
            for plane in planes.iter().take(nch).skip(1) {
                for (d, s) in self.data.iter_mut().zip(&plane[pos..pos + window]) {
                    *d += s;
                }
            }
        }
        else {
            // Shift the window and append the chunk.
            let keep = window - size;
            self.data.copy_within(size.., 0);
            self.data[keep..].copy_from_slice(&planes[0][..]);
            for plane in planes.iter().take(nch).skip(1) {
                for (d, s) in self.data[keep..].iter_mut().zip(plane.iter()) {
                    *d += s;
                }
            }
        }

        self.converted = false;
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
    use std::f64::consts::PI;

    #[test]
    fn verify_length_rounding() {
        let mut f = Spectrum::new();
        f.set_length(300);
        assert_eq!(f.length(), 512);
        f.set_length(0);
        assert_eq!(f.length(), 0);
    }

    #[test]
    fn verify_tone_peak() {
        let spk = Speakers::new(Format::Linear, ChannelMask::MONO, 48000);
        let mut f = Spectrum::new();
        f.set_length(512);
        assert!(f.open(spk));

        // A tone exactly on bin 64: freq = 64 * rate / 1024.
        let bin = 64;
        let len = 4096;
        let freq = bin as f64 * 48000.0 / 1024.0;
        let mut buf = SampleBuf::with_size(1, len);
        for (i, s) in buf.plane_mut(0).iter_mut().enumerate() {
            *s = (2.0 * PI * freq * i as f64 / 48000.0).sin();
        }
        let mut input = Chunk::new();
        input.set_linear(buf, len);

        let mut out = Chunk::new();
        assert!(f.process(&mut input, &mut out).unwrap());

        let mut spectrum = vec![0.0; 512];
        let bin2hz = f.get_spectrum(&mut spectrum);
        assert!((bin2hz - 48000.0 / 1024.0).abs() < 1e-9);

        let peak_bin =
            spectrum.iter().enumerate().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).unwrap().0;
        assert_eq!(peak_bin, bin);

        // Energy away from the tone is far below the peak.
        let peak = spectrum[peak_bin];
        let far = spectrum[bin + 100];
        assert!(far < peak * 1e-3);
    }
}
