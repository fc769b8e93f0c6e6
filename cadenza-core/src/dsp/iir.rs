// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `iir` module provides second-order IIR sections and the Linkwitz-Riley crossover built
//! from them.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Normalized coefficients of a biquad section (`a0 == 1`).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// An identity section.
    pub fn identity() -> Self {
        Biquad { b0: 1.0, ..Default::default() }
    }

    /// A second-order low-pass section with normalized cutoff `freq` (cutoff / sample rate).
    pub fn low_pass(freq: f64, q: f64) -> Self {
        let omega = 2.0 * PI * freq;
        let alpha = omega.sin() / (2.0 * q);
        let cos = omega.cos();
        let a0 = 1.0 + alpha;

        Biquad {
            b0: (1.0 - cos) / 2.0 / a0,
            b1: (1.0 - cos) / a0,
            b2: (1.0 - cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// A second-order high-pass section with normalized cutoff `freq` (cutoff / sample rate).
    pub fn high_pass(freq: f64, q: f64) -> Self {
        let omega = 2.0 * PI * freq;
        let alpha = omega.sin() / (2.0 * q);
        let cos = omega.cos();
        let a0 = 1.0 + alpha;

        Biquad {
            b0: (1.0 + cos) / 2.0 / a0,
            b1: -(1.0 + cos) / a0,
            b2: (1.0 + cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// A biquad section with its filter state (transposed direct form II).
#[derive(Copy, Clone, Debug, Default)]
pub struct Section {
    coeffs: Biquad,
    z1: f64,
    z2: f64,
}

impl Section {
    pub fn new(coeffs: Biquad) -> Self {
        Section { coeffs, z1: 0.0, z2: 0.0 }
    }

    /// Clear the filter state.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    /// Filter one sample.
    #[inline]
    pub fn tick(&mut self, x: f64) -> f64 {
        let c = &self.coeffs;
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }

    /// Filter a block of samples in place.
    pub fn process(&mut self, samples: &mut [f64]) {
        for s in samples.iter_mut() {
            *s = self.tick(*s);
        }
    }
}

/// One side of a 4th-order Linkwitz-Riley crossover: two identical Butterworth sections in
/// cascade. The low-pass and high-pass sides sum to an all-pass response.
#[derive(Copy, Clone, Debug, Default)]
pub struct CrossoverSection {
    a: Section,
    b: Section,
}

impl CrossoverSection {
    /// The low-pass side at normalized cutoff `freq`.
    pub fn low_pass(freq: f64) -> Self {
        let coeffs = Biquad::low_pass(freq, FRAC_1_SQRT_2);
        CrossoverSection { a: Section::new(coeffs), b: Section::new(coeffs) }
    }

    /// The high-pass side at normalized cutoff `freq`.
    pub fn high_pass(freq: f64) -> Self {
        let coeffs = Biquad::high_pass(freq, FRAC_1_SQRT_2);
        CrossoverSection { a: Section::new(coeffs), b: Section::new(coeffs) }
    }

    /// Clear the filter state.
    pub fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
    }

    /// Filter one sample.
    #[inline]
    pub fn tick(&mut self, x: f64) -> f64 {
        self.b.tick(self.a.tick(x))
    }

    /// Filter a block of samples in place.
    pub fn process(&mut self, samples: &mut [f64]) {
        for s in samples.iter_mut() {
            *s = self.tick(*s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The steady-state amplitude of the section's response to a sine at normalized `freq`.
    fn response(mut filter: CrossoverSection, freq: f64) -> f64 {
        let n = 16384;
        let skip = n / 2;
        let mut peak = 0.0f64;
        for i in 0..n {
            let x = (2.0 * PI * freq * i as f64).sin();
            let y = filter.tick(x);
            if i >= skip {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn verify_low_pass_response() {
        let freq = 80.0 / 48000.0;

        // Passband: an octave below the cutoff passes nearly untouched.
        let pass = response(CrossoverSection::low_pass(freq), freq / 2.0);
        assert!(pass > 0.9 && pass < 1.1);

        // Stopband: two octaves above the cutoff a 4th-order slope gives ~48 dB attenuation.
        let stop = response(CrossoverSection::low_pass(freq), freq * 4.0);
        assert!(stop < 0.02);
    }

    #[test]
    fn verify_high_pass_response() {
        let freq = 80.0 / 48000.0;

        let pass = response(CrossoverSection::high_pass(freq), freq * 4.0);
        assert!(pass > 0.9 && pass < 1.1);

        let stop = response(CrossoverSection::high_pass(freq), freq / 4.0);
        assert!(stop < 0.02);
    }

    #[test]
    fn verify_crossover_sums_to_allpass() {
        // The defining Linkwitz-Riley property: |LP + HP| == 1 at every frequency.
        let freq = 80.0 / 48000.0;
        for &tone in &[freq / 2.0, freq, freq * 2.0, freq * 16.0] {
            let mut lp = CrossoverSection::low_pass(freq);
            let mut hp = CrossoverSection::high_pass(freq);

            let n = 16384;
            let mut peak = 0.0f64;
            for i in 0..n {
                let x = (2.0 * PI * tone * i as f64).sin();
                let y = lp.tick(x) + hp.tick(x);
                if i >= n / 2 {
                    peak = peak.max(y.abs());
                }
            }
            assert!((peak - 1.0).abs() < 0.01, "tone {}: peak {}", tone, peak);
        }
    }
}
