// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `kaiser` module implements the Kaiser window used by every FIR design in the crate.

/// The zeroth-order modified Bessel function of the first kind, I0(x).
///
/// Computed with the power series; the series converges quickly for the argument range produced
/// by [`kaiser_alpha`] (below ~25 for attenuations up to 200 dB).
pub fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1.0;
    loop {
        term *= (half / k) * (half / k);
        sum += term;
        if term < sum * 1e-21 {
            return sum;
        }
        k += 1.0;
    }
}

/// The window parameter alpha for a given stopband attenuation `a` in dB.
pub fn kaiser_alpha(a: f64) -> f64 {
    if a <= 21.0 {
        0.0
    }
    else if a <= 50.0 {
        0.5842 * (a - 21.0).powf(0.4) + 0.07886 * (a - 21.0)
    }
    else {
        0.1102 * (a - 8.7)
    }
}

/// The minimum window length for a stopband attenuation `a` in dB and a normalized transition
/// band width `df`.
pub fn kaiser_n(a: f64, df: f64) -> usize {
    let n = (a - 7.95) / (14.36 * df) + 1.0;
    if n < 1.0 {
        1
    }
    else {
        n as usize
    }
}

/// The `i`-th bin of a Kaiser window of length `n` with parameter `alpha`.
///
/// The window is centred at zero: `i` runs from `-(n-1)/2` to `(n-1)/2`.
pub fn kaiser_window(i: f64, n: usize, alpha: f64) -> f64 {
    let n1 = (n - 1) as f64;
    bessel_i0(alpha * (1.0 - 4.0 * i * i / (n1 * n1)).max(0.0).sqrt()) / bessel_i0(alpha)
}
