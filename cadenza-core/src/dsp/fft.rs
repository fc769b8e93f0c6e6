// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `fft` module implements the real discrete Fourier transform of power-of-two length used
//! by the convolvers, the resampler and the spectrum filter.
//!
//! The transform is computed as a complex radix-2 Cooley-Tukey FFT of half length over packed
//! even/odd sample pairs, followed by a split step. The spectrum layout is the compact in-place
//! layout common to real FFT packages:
//!
//! ```text
//! a[0]     = Re X[0]     (DC, real)
//! a[1]     = Re X[N/2]   (Nyquist, real)
//! a[2k]    = Re X[k]     1 <= k < N/2
//! a[2k+1]  = Im X[k]
//! ```
//!
//! [`Rdft::inverse`] is unscaled: `inverse(forward(x)) == (N/2) * x`. Callers fold the `1/(N/2)`
//! factor into pre-computed filter spectra, saving a scaling pass per block.

/// The real DFT of a fixed power-of-two length.
pub struct Rdft {
    len: usize,
    perm: Box<[u32]>,
    /// Twiddle factors of the half-length complex FFT: `e^(-2πik/(N/2))`, k in `0..N/4`.
    twiddle: Box<[(f64, f64)]>,
    /// Split twiddle factors: `e^(-2πik/N)`, k in `0..=N/4`.
    split: Box<[(f64, f64)]>,
}

impl Rdft {
    /// Instantiate a transform of length `len`. `len` must be a power of two and at least 2.
    pub fn new(len: usize) -> Self {
        assert!(len.is_power_of_two() && len >= 2);

        let m = len / 2;

        let perm = if m > 1 {
            let shift = (m as u32).leading_zeros() + 1;
            (0..m as u32).map(|i| i.reverse_bits() >> shift).collect()
        }
        else {
            vec![0u32].into_boxed_slice()
        };

        let theta = -2.0 * std::f64::consts::PI / m as f64;
        let twiddle = (0..m / 2)
            .map(|k| {
                let angle = theta * k as f64;
                (angle.cos(), angle.sin())
            })
            .collect();

        let theta = -2.0 * std::f64::consts::PI / len as f64;
        let split = (0..=m / 2)
            .map(|k| {
                let angle = theta * k as f64;
                (angle.cos(), angle.sin())
            })
            .collect();

        Rdft { len, perm, twiddle, split }
    }

    /// The transform length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// The half-length complex FFT over re/im pairs stored in `a`.
    fn fft_pairs(&self, a: &mut [f64], inverse: bool) {
        let m = self.len / 2;

        // Bit reversal using the pre-computed permutation table.
        for i in 0..m {
            let j = self.perm[i] as usize;
            if j > i {
                a.swap(2 * i, 2 * j);
                a.swap(2 * i + 1, 2 * j + 1);
            }
        }

        let mut half = 1;
        let mut step = m / 2;
        while half < m {
            let mut base = 0;
            while base < m {
                for k in 0..half {
                    let (wr, mut wi) = self.twiddle[k * step];
                    if inverse {
                        wi = -wi;
                    }

                    let i0 = 2 * (base + k);
                    let i1 = 2 * (base + k + half);

                    let tr = a[i1] * wr - a[i1 + 1] * wi;
                    let ti = a[i1 + 1] * wr + a[i1] * wi;
                    let ur = a[i0];
                    let ui = a[i0 + 1];

                    a[i0] = ur + tr;
                    a[i0 + 1] = ui + ti;
                    a[i1] = ur - tr;
                    a[i1 + 1] = ui - ti;
                }
                base += half * 2;
            }
            half *= 2;
            step /= 2;
        }
    }

    /// Transform `len` real samples in place into the packed spectrum layout.
    pub fn forward(&self, a: &mut [f64]) {
        assert!(a.len() >= self.len);
        let a = &mut a[..self.len];
        let m = self.len / 2;

        self.fft_pairs(a, false);

        // Split the half-length transform Z into the spectrum of the real signal.
        let zr = a[0];
        let zi = a[1];
        a[0] = zr + zi;
        a[1] = zr - zi;

        let mut k = 1;
        while 2 * k <= m {
            let j = m - k;

            let (zkr, zki) = (a[2 * k], a[2 * k + 1]);
            let (zjr, zji) = (a[2 * j], a[2 * j + 1]);

            // Even part Xe = (Z[k] + conj(Z[j])) / 2,
            // odd part Xo = -i (Z[k] - conj(Z[j])) / 2.
            let er = (zkr + zjr) * 0.5;
            let ei = (zki - zji) * 0.5;
            let or_ = (zki + zji) * 0.5;
            let oi = (zjr - zkr) * 0.5;

            // X[k] = Xe + w^k Xo, X[j] = conj(Xe - w^k Xo).
            let (wr, wi) = self.split[k];
            let tr = or_ * wr - oi * wi;
            let ti = oi * wr + or_ * wi;

            a[2 * k] = er + tr;
            a[2 * k + 1] = ei + ti;
            a[2 * j] = er - tr;
            a[2 * j + 1] = ti - ei;

            k += 1;
        }
    }

    /// Inverse transform of the packed spectrum layout, in place, scaled by `N/2`.
    pub fn inverse(&self, a: &mut [f64]) {
        assert!(a.len() >= self.len);
        let a = &mut a[..self.len];
        let m = self.len / 2;

        // Rebuild the packed half-length spectrum Z from the real spectrum.
        let x0 = a[0];
        let xn = a[1];
        a[0] = (x0 + xn) * 0.5;
        a[1] = (x0 - xn) * 0.5;

        let mut k = 1;
        while 2 * k <= m {
            let j = m - k;

            let (xkr, xki) = (a[2 * k], a[2 * k + 1]);
            let (xjr, xji) = (a[2 * j], a[2 * j + 1]);

            let er = (xkr + xjr) * 0.5;
            let ei = (xki - xji) * 0.5;
            let tr = (xkr - xjr) * 0.5;
            let ti = (xki + xji) * 0.5;

            // Xo = conj(w^k) (X[k] - conj(X[j])) / 2.
            let (wr, wi) = self.split[k];
            let or_ = tr * wr + ti * wi;
            let oi = ti * wr - tr * wi;

            // Z[k] = Xe + i Xo, Z[j] = conj(Xe) + i conj(Xo).
            a[2 * k] = er - oi;
            a[2 * k + 1] = ei + or_;
            a[2 * j] = er + oi;
            a[2 * j + 1] = or_ - ei;

            k += 1;
        }

        self.fft_pairs(a, true);
    }
}

/// Multiply the packed spectrum `a` in place by the packed spectrum `b` of the same length.
///
/// DC and Nyquist bins are real and multiply directly; all other bins multiply as complex
/// numbers. This is the frequency-domain convolution step shared by the convolvers and the
/// resampler.
pub fn spectrum_mul(a: &mut [f64], b: &[f64]) {
    debug_assert_eq!(a.len(), b.len());
    a[0] *= b[0];
    a[1] *= b[1];
    let n = a.len() / 2;
    for i in 1..n {
        let re = b[i * 2] * a[i * 2] - b[i * 2 + 1] * a[i * 2 + 1];
        let im = b[i * 2 + 1] * a[i * 2] + b[i * 2] * a[i * 2 + 1];
        a[i * 2] = re;
        a[i * 2 + 1] = im;
    }
}
