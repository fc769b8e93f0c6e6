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
use crate::dsp::{db2value, sinc};

use super::{FirGenerator, FirInstance};

/// The response shape of a [`ParamFir`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamFirType {
    LowPass,
    HighPass,
    BandPass,
    BandStop,
}

#[derive(Copy, Clone, Debug)]
struct Params {
    kind: ParamFirType,
    f1: f64,
    f2: f64,
    df: f64,
    a: f64,
    norm: bool,
}

/// A parametric linear-phase filter generator.
///
/// Generates Kaiser-windowed type-1 (odd length, symmetric) responses for one of four shapes:
/// low-pass, high-pass, band-pass and band-stop. The response is defined by the centre
/// frequency `f1` (and `f2` for the band shapes), the transition band width `df` and the
/// stopband attenuation `a` in dB. Frequencies are in Hz, or normalized to the sample rate when
/// `norm` is set.
///
/// The range `[0, nyquist]` cuts the response: shapes degenerate to identity or to a scalar
/// attenuation when their passband or stopband leaves the representable range.
pub struct ParamFir {
    params: Mutex<Params>,
    ver: AtomicU32,
}

impl ParamFir {
    /// Instantiate with the given parameters; see [`ParamFir::set`].
    pub fn new(kind: ParamFirType, f1: f64, f2: f64, df: f64, a: f64, norm: bool) -> Self {
        let gen = ParamFir {
            params: Mutex::new(Params { kind, f1: 0.0, f2: 0.0, df: 0.0, a: 0.0, norm }),
            ver: AtomicU32::new(0),
        };
        gen.set(kind, f1, f2, df, a, norm);
        gen
    }

    /// Set the filter parameters. For the band shapes `f1` and `f2` are swapped when given in
    /// descending order. Returns false and changes nothing when a frequency is negative, the
    /// transition band is not positive, or the attenuation is negative.
    pub fn set(&self, kind: ParamFirType, f1: f64, f2: f64, df: f64, a: f64, norm: bool) -> bool {
        if f1 < 0.0 || f2 < 0.0 || df <= 0.0 || a < 0.0 {
            return false;
        }

        let (f1, f2) = if matches!(kind, ParamFirType::BandPass | ParamFirType::BandStop) && f1 > f2
        {
            (f2, f1)
        }
        else {
            (f1, f2)
        };

        *self.params.lock().unwrap() = Params { kind, f1, f2, df, a, norm };
        self.ver.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Get the filter parameters as `(kind, f1, f2, df, a, norm)`.
    pub fn get(&self) -> (ParamFirType, f64, f64, f64, f64, bool) {
        let p = self.params.lock().unwrap();
        (p.kind, p.f1, p.f2, p.df, p.a, p.norm)
    }
}

impl FirGenerator for ParamFir {
    fn version(&self) -> u32 {
        self.ver.load(Ordering::Relaxed)
    }

    fn make(&self, sample_rate: u32) -> Option<FirInstance> {
        let p = *self.params.lock().unwrap();

        // Normalize.
        let norm_factor = if p.norm { 1.0 } else { 1.0 / f64::from(sample_rate) };
        let f1 = p.f1 * norm_factor;
        let f2 = p.f2 * norm_factor;
        let df = p.df * norm_factor;
        let a = p.a;

        if f1 < 0.0 || f2 < 0.0 || df <= 0.0 || a < 0.0 {
            return None;
        }
        if a == 0.0 {
            return Some(FirInstance::identity(sample_rate));
        }

        // Degenerate shapes: the range [0, 0.5] cuts the response. A shape whose passband
        // covers the whole range degenerates to identity, one whose stopband covers it to the
        // residual stopband gain.
        let stopband = db2value(-a);
        match p.kind {
            ParamFirType::LowPass => {
                if f1 >= 0.5 {
                    return Some(FirInstance::identity(sample_rate));
                }
                if f1 == 0.0 {
                    return Some(FirInstance::gain(sample_rate, stopband));
                }
            }
            ParamFirType::HighPass => {
                if f1 >= 0.5 {
                    return Some(FirInstance::gain(sample_rate, stopband));
                }
                if f1 == 0.0 {
                    return Some(FirInstance::identity(sample_rate));
                }
            }
            ParamFirType::BandPass => {
                if f1 >= 0.5 || f2 == 0.0 {
                    return Some(FirInstance::gain(sample_rate, stopband));
                }
                if f1 == 0.0 && f2 >= 0.5 {
                    return Some(FirInstance::identity(sample_rate));
                }
            }
            ParamFirType::BandStop => {
                if f1 >= 0.5 || f2 == 0.0 {
                    return Some(FirInstance::identity(sample_rate));
                }
                if f1 == 0.0 && f2 >= 0.5 {
                    return Some(FirInstance::gain(sample_rate, stopband));
                }
            }
        }

        // Build a type 1 filter (odd length).
        let n = kaiser_n(a, df) | 1;
        let c = n / 2;
        let alpha = kaiser_alpha(a);

        let window = |i: usize| kaiser_window(i as f64 - c as f64, n, alpha);
        let lp = |i: usize, f: f64| 2.0 * f * sinc((i as f64 - c as f64) * 2.0 * PI * f);

        let mut taps = vec![0.0; n];
        match p.kind {
            ParamFirType::LowPass => {
                for (i, tap) in taps.iter_mut().enumerate() {
                    *tap = lp(i, f1) * window(i);
                }
            }
            ParamFirType::HighPass => {
                for (i, tap) in taps.iter_mut().enumerate() {
                    *tap = -lp(i, f1) * window(i);
                }
                taps[c] = (1.0 - 2.0 * f1) * window(c);
            }
            ParamFirType::BandPass => {
                for (i, tap) in taps.iter_mut().enumerate() {
                    *tap = (lp(i, f2) - lp(i, f1)) * window(i);
                }
            }
            ParamFirType::BandStop => {
                for (i, tap) in taps.iter_mut().enumerate() {
                    *tap = (lp(i, f1) - lp(i, f2)) * window(i);
                }
                taps[c] = (2.0 * f1 + 1.0 - 2.0 * f2) * window(c);
            }
        }

        Some(FirInstance::custom(sample_rate, c, taps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fir::FirType;

    #[test]
    fn verify_versioning() {
        let gen = ParamFir::new(ParamFirType::LowPass, 12000.0, 0.0, 100.0, 100.0, false);
        let v0 = gen.version();

        let _ = gen.make(48000);
        assert_eq!(gen.version(), v0);

        assert!(gen.set(ParamFirType::HighPass, 8000.0, 0.0, 100.0, 100.0, false));
        assert_ne!(gen.version(), v0);
    }

    #[test]
    fn verify_band_swap() {
        let gen = ParamFir::new(ParamFirType::BandPass, 12000.0, 4000.0, 100.0, 100.0, false);
        let (_, f1, f2, ..) = gen.get();
        assert_eq!(f1, 4000.0);
        assert_eq!(f2, 12000.0);
    }

    #[test]
    fn verify_invalid_params() {
        let gen = ParamFir::new(ParamFirType::LowPass, 12000.0, 0.0, 100.0, 100.0, false);
        let v = gen.version();
        assert!(!gen.set(ParamFirType::LowPass, -1.0, 0.0, 100.0, 100.0, false));
        assert!(!gen.set(ParamFirType::LowPass, 12000.0, 0.0, 0.0, 100.0, false));
        assert!(!gen.set(ParamFirType::LowPass, 12000.0, 0.0, 100.0, -3.0, false));
        assert_eq!(gen.version(), v);
    }

    #[test]
    fn verify_degenerate_shapes() {
        // Zero attenuation is a passthrough.
        let gen = ParamFir::new(ParamFirType::LowPass, 100.0, 0.0, 10.0, 0.0, false);
        assert_eq!(gen.make(48000).unwrap().kind(), FirType::Identity);

        // A low-pass above Nyquist passes everything.
        let gen = ParamFir::new(ParamFirType::LowPass, 30000.0, 0.0, 100.0, 100.0, false);
        assert_eq!(gen.make(48000).unwrap().kind(), FirType::Identity);

        // A high-pass above Nyquist passes only the stopband residual.
        let gen = ParamFir::new(ParamFirType::HighPass, 30000.0, 0.0, 100.0, 100.0, false);
        let fir = gen.make(48000).unwrap();
        assert_eq!(fir.kind(), FirType::Gain);
        assert!((fir.gain_value() - db2value(-100.0)).abs() < 1e-12);

        // A band-stop covering nothing passes everything.
        let gen = ParamFir::new(ParamFirType::BandStop, 30000.0, 40000.0, 100.0, 100.0, false);
        assert_eq!(gen.make(48000).unwrap().kind(), FirType::Identity);
    }

    #[test]
    fn verify_low_pass_design() {
        let gen = ParamFir::new(ParamFirType::LowPass, 12000.0, 0.0, 100.0, 100.0, false);
        let fir = gen.make(48000).unwrap();

        assert_eq!(fir.kind(), FirType::Custom);
        // Type 1: odd length, centred.
        assert_eq!(fir.length() % 2, 1);
        assert_eq!(fir.center(), fir.length() / 2);

        // Symmetric (linear phase).
        let taps = fir.data();
        let c = fir.center();
        for i in 0..c {
            assert!((taps[c - i] - taps[c + i]).abs() < 1e-15);
        }

        // Unity DC response is not expected of a low-pass at fs/4; instead the tap sum equals
        // the DC gain, which must be close to 1.
        let dc: f64 = taps.iter().sum();
        assert!((dc - 1.0).abs() < 1e-3);
    }

    #[test]
    fn verify_low_pass_tone_response() {
        // A low-pass at fs/4 with a 100 Hz transition band and 100 dB attenuation: a tone one
        // transition band below the centre passes with less than -100 dB error, a tone one
        // band above is suppressed below -100 dB.
        use crate::audio::{ChannelMask, Chunk, Format, SampleBuf, Speakers};
        use crate::filter::Filter;
        use crate::filters::Convolver;
        use std::sync::Arc;

        let fs = 48000u32;
        let gen = Arc::new(ParamFir::new(ParamFirType::LowPass, 12000.0, 0.0, 100.0, 100.0, false));
        let flen = gen.make(fs).unwrap().length();

        let run_tone = |freq: f64| -> (Vec<f64>, Vec<f64>) {
            let len = 2 * flen + 32768;
            let mut buf = SampleBuf::with_size(1, len);
            for (i, s) in buf.plane_mut(0).iter_mut().enumerate() {
                *s = (2.0 * PI * freq * i as f64 / f64::from(fs)).sin();
            }
            let reference = buf.plane(0).to_vec();

            let mut conv = Convolver::new(gen.clone());
            assert!(conv.open(Speakers::new(Format::Linear, ChannelMask::MONO, fs)));

            let mut collected = Vec::with_capacity(len);
            let mut input = Chunk::new();
            input.set_linear(buf, len);
            let mut out = Chunk::new();
            while conv.process(&mut input, &mut out).unwrap() {
                collected.extend_from_slice(out.plane(0));
            }
            while conv.flush(&mut out).unwrap() {
                collected.extend_from_slice(out.plane(0));
            }
            assert_eq!(collected.len(), len);

            // Slice off the filter transient from both ends.
            (collected[flen..len - flen].to_vec(), reference[flen..len - flen].to_vec())
        };

        let threshold = db2value(-100.0);

        // Passband tone: the output matches the input.
        let (out, reference) = run_tone(11900.0);
        let mut diff = 0.0f64;
        for (a, b) in out.iter().zip(reference.iter()) {
            diff = diff.max((a - b).abs());
        }
        assert!(diff < threshold, "passband error {} above threshold", diff);

        // Stopband tone: the output vanishes.
        let (out, _) = run_tone(12100.0);
        let peak = out.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        assert!(peak < threshold, "stopband peak {} above threshold", peak);
    }

    #[test]
    fn verify_band_shapes_response() {
        // Zero-phase response evaluation of the band shapes at probe frequencies on both sides
        // of their edges.
        let fs = 48000u32;
        let response = |fir: &crate::fir::FirInstance, freq: f64| -> f64 {
            let c = fir.center() as f64;
            fir.data()
                .iter()
                .enumerate()
                .map(|(i, tap)| tap * (2.0 * PI * freq / f64::from(fs) * (i as f64 - c)).cos())
                .sum()
        };

        let a = 100.0;
        let threshold = db2value(-a);

        // High-pass at 8 kHz.
        let gen = ParamFir::new(ParamFirType::HighPass, 8000.0, 0.0, 100.0, a, false);
        let fir = gen.make(fs).unwrap();
        assert!(response(&fir, 7900.0).abs() < threshold);
        assert!((response(&fir, 8100.0) - 1.0).abs() < threshold);

        // Band-pass 4..8 kHz.
        let gen = ParamFir::new(ParamFirType::BandPass, 4000.0, 8000.0, 100.0, a, false);
        let fir = gen.make(fs).unwrap();
        assert!(response(&fir, 3900.0).abs() < threshold);
        assert!((response(&fir, 4100.0) - 1.0).abs() < threshold);
        assert!((response(&fir, 7900.0) - 1.0).abs() < threshold);
        assert!(response(&fir, 8100.0).abs() < threshold);

        // Band-stop 4..8 kHz.
        let gen = ParamFir::new(ParamFirType::BandStop, 4000.0, 8000.0, 100.0, a, false);
        let fir = gen.make(fs).unwrap();
        assert!((response(&fir, 3900.0) - 1.0).abs() < threshold);
        assert!(response(&fir, 4100.0).abs() < threshold);
        assert!(response(&fir, 7900.0).abs() < threshold);
        assert!((response(&fir, 8100.0) - 1.0).abs() < threshold);
    }

    #[test]
    fn verify_high_pass_design() {
        let gen = ParamFir::new(ParamFirType::HighPass, 12000.0, 0.0, 100.0, 100.0, false);
        let fir = gen.make(48000).unwrap();

        // A high-pass suppresses DC.
        let dc: f64 = fir.data().iter().sum();
        assert!(dc.abs() < 1e-3);

        // And passes Nyquist: the alternating-sign sum is the response at fs/2.
        let nyq: f64 =
            fir.data().iter().enumerate().map(|(i, t)| if i % 2 == 0 { *t } else { -*t }).sum();
        assert!((nyq.abs() - 1.0).abs() < 1e-3);
    }
}
