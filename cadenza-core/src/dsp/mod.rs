// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `dsp` module provides the signal processing primitives shared by the filters: the real
//! FFT kernel, the Kaiser window, biquad sections and the sample rate conversion core.

pub mod fft;
pub mod iir;
pub mod kaiser;
pub mod src;

use std::f64::consts::PI;

/// Two sample values closer than this are considered equal.
pub const SAMPLE_THRESHOLD: f64 = 1e-10;

/// Convert a gain in dB to a linear factor.
pub fn db2value(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Convert a linear factor to a gain in dB.
pub fn value2db(value: f64) -> f64 {
    20.0 * value.log10()
}

/// Returns true when two sample values are equal within [`SAMPLE_THRESHOLD`].
pub fn equal_samples(a: f64, b: f64) -> bool {
    (a - b).abs() < SAMPLE_THRESHOLD
}

/// The unnormalized cardinal sine, `sin(x) / x`.
pub fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    }
    else {
        x.sin() / x
    }
}

/// The `i`-th tap of an ideal low-pass impulse response with normalized cutoff `freq`.
pub fn lpf(i: i64, freq: f64) -> f64 {
    2.0 * freq * sinc(i as f64 * 2.0 * PI * freq)
}

/// The smallest power of two greater than or equal to `x`.
pub fn clp2(x: usize) -> usize {
    x.next_power_of_two()
}

/// The largest power of two less than or equal to `x`. Returns zero for zero.
pub fn flp2(x: usize) -> usize {
    if x == 0 {
        0
    }
    else {
        1 << (usize::BITS - 1 - x.leading_zeros())
    }
}

/// The greatest common divisor.
pub fn gcd(mut x: u32, mut y: u32) -> u32 {
    while y != 0 {
        let t = x % y;
        x = y;
        y = t;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_db_conversion() {
        assert!((db2value(20.0) - 10.0).abs() < 1e-12);
        assert!((value2db(10.0) - 20.0).abs() < 1e-12);
        assert!((db2value(value2db(0.25)) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn verify_powers_of_two() {
        assert_eq!(clp2(1), 1);
        assert_eq!(clp2(3), 4);
        assert_eq!(clp2(4096), 4096);
        assert_eq!(flp2(1), 1);
        assert_eq!(flp2(5), 4);
        assert_eq!(flp2(4096), 4096);
    }

    #[test]
    fn verify_gcd() {
        assert_eq!(gcd(44100, 48000), 300);
        assert_eq!(gcd(48000, 48000), 48000);
        assert_eq!(gcd(7, 13), 1);
    }

    #[test]
    fn verify_sinc() {
        assert_eq!(sinc(0.0), 1.0);
        assert!(sinc(PI).abs() < 1e-12);
    }
}
