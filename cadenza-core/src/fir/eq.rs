// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::dsp::kaiser::{kaiser_alpha, kaiser_n, kaiser_window};
use crate::dsp::{db2value, sinc, value2db};

use super::{FirGenerator, FirInstance};

const MIN_RIPPLE: f64 = 0.001;
const MAX_RIPPLE: f64 = 3.0;
const DEF_RIPPLE: f64 = 0.1;

// Max filter length is 64K.
const MAX_LENGTH: usize = 64 * 1024 - 1;

/// One equalizer band: the gain applied from `freq` up to the next band's frequency.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EqBand {
    /// Band start frequency in Hz.
    pub freq: u32,
    /// Linear gain of the band.
    pub gain: f64,
}

#[derive(Clone, Debug)]
struct State {
    bands: Vec<EqBand>,
    ripple: f64,
}

/// A graphic equalizer FIR generator.
///
/// The response is a staircase of band gains with Kaiser-windowed transitions between adjacent
/// bands. The filter is built incrementally, one transition per adjacent band pair, so a change
/// of one band leaves the response at the other bands untouched; this keeps interactive
/// adjustments local.
///
/// `ripple` (in dB) bounds the response error inside the bands and sizes the transition
/// windows.
pub struct EqFir {
    state: Mutex<State>,
    ver: AtomicU32,
}

impl Default for EqFir {
    fn default() -> Self {
        EqFir::new()
    }
}

impl EqFir {
    /// Instantiate with no bands (identity response).
    pub fn new() -> Self {
        EqFir {
            state: Mutex::new(State { bands: Vec::new(), ripple: DEF_RIPPLE }),
            ver: AtomicU32::new(0),
        }
    }

    /// Instantiate with the given bands.
    pub fn with_bands(bands: &[EqBand]) -> Self {
        let eq = EqFir::new();
        eq.set_bands(bands);
        eq
    }

    /// Replace the band set. Bands at zero frequency are dropped, gains are clamped to 1e10,
    /// and the remainder is sorted by frequency. Returns the number of bands kept.
    pub fn set_bands(&self, bands: &[EqBand]) -> usize {
        let mut kept: Vec<EqBand> = bands
            .iter()
            .filter(|band| band.freq > 0)
            .map(|band| EqBand { freq: band.freq, gain: band.gain.min(1e10) })
            .collect();
        kept.sort_by_key(|band| band.freq);

        let n = kept.len();
        self.state.lock().unwrap().bands = kept;
        self.ver.fetch_add(1, Ordering::Relaxed);
        n
    }

    /// The current band set.
    pub fn bands(&self) -> Vec<EqBand> {
        self.state.lock().unwrap().bands.clone()
    }

    /// The number of bands.
    pub fn nbands(&self) -> usize {
        self.state.lock().unwrap().bands.len()
    }

    /// Drop all bands.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.bands.is_empty() {
            state.bands.clear();
            self.ver.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The current ripple in dB.
    pub fn ripple(&self) -> f64 {
        self.state.lock().unwrap().ripple
    }

    /// Set the ripple in dB, clamped to [0.001, 3.0].
    pub fn set_ripple(&self, ripple: f64) {
        let ripple = ripple.abs().clamp(MIN_RIPPLE, MAX_RIPPLE);
        let mut state = self.state.lock().unwrap();
        if state.ripple != ripple {
            state.ripple = ripple;
            self.ver.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl FirGenerator for EqFir {
    fn version(&self) -> u32 {
        self.ver.load(Ordering::Relaxed)
    }

    fn make(&self, sample_rate: u32) -> Option<FirInstance> {
        let state = self.state.lock().unwrap().clone();
        let bands = &state.bands;
        let q = db2value(state.ripple) - 1.0;

        // Bands at or above Nyquist cannot be realized.
        let max_band =
            bands.iter().take_while(|band| band.freq <= sample_rate / 2).count();

        if max_band == 0 {
            return Some(FirInstance::identity(sample_rate));
        }
        if max_band == 1 {
            return Some(FirInstance::gain(sample_rate, bands[0].gain));
        }

        // Size the filter by the steepest transition.
        let mut max_n = 1;
        for pair in bands[..max_band].windows(2) {
            if pair[1].gain != pair[0].gain {
                let dg = pair[1].gain - pair[0].gain;
                let df = f64::from(pair[1].freq - pair[0].freq) / f64::from(sample_rate);
                let a = -value2db(q / dg.abs());
                let n = (kaiser_n(a, df) | 1).min(MAX_LENGTH);
                max_n = max_n.max(n);
            }
        }
        let max_c = max_n / 2;

        // Start from the top band's flat gain and add one windowed low-pass transition per
        // adjacent band pair. A change at one band does not affect other bands.
        let mut taps = vec![0.0; max_n];
        taps[max_c] += bands[max_band - 1].gain;

        for pair in bands[..max_band].windows(2) {
            if pair[0].gain == pair[1].gain {
                continue;
            }

            let dg = pair[0].gain - pair[1].gain;
            let df = f64::from(pair[1].freq - pair[0].freq) / f64::from(sample_rate);
            let cf = f64::from(pair[1].freq + pair[0].freq) / 2.0 / f64::from(sample_rate);
            let a = -value2db(q / dg.abs());
            let alpha = kaiser_alpha(a);
            let n = (kaiser_n(a, df) | 1).min(MAX_LENGTH);
            let c = (n / 2) as i64;

            for j in -c..=c {
                taps[(max_c as i64 + j) as usize] += dg
                    * 2.0
                    * cf
                    * sinc(j as f64 * 2.0 * PI * cf)
                    * kaiser_window(j as f64, n, alpha);
            }
        }

        Some(FirInstance::custom(sample_rate, max_c, taps))
    }
}
