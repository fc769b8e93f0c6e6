// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `fir` module defines FIR instances, the generator contract, and the built-in generators.
//!
//! A *generator* is a mutable factory of immutable, sample-rate-bound FIR *instances*. A
//! consumer (the convolver) keeps the generator's `version` it observed last; when the version
//! changes, the previously made instance is stale and a new one must be made. Generators are
//! shared as `Arc<dyn FirGenerator>`, so their setters use interior mutability and may be called
//! while a convolver holds a reference.

mod eq;
mod param;

pub use eq::{EqBand, EqFir};
pub use param::{ParamFir, ParamFirType};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// The kind of a FIR instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FirType {
    /// Bit-exact passthrough.
    Identity,
    /// All output samples are zero.
    Zero,
    /// Scalar gain.
    Gain,
    /// An arbitrary impulse response.
    Custom,
}

/// An immutable impulse response tuned to one sample rate.
#[derive(Clone, Debug)]
pub struct FirInstance {
    sample_rate: u32,
    kind: FirType,
    center: usize,
    data: Vec<f64>,
}

impl FirInstance {
    /// An identity instance.
    pub fn identity(sample_rate: u32) -> Self {
        FirInstance { sample_rate, kind: FirType::Identity, center: 0, data: vec![1.0] }
    }

    /// A zero instance.
    pub fn zero(sample_rate: u32) -> Self {
        FirInstance { sample_rate, kind: FirType::Zero, center: 0, data: vec![0.0] }
    }

    /// A scalar gain instance.
    pub fn gain(sample_rate: u32, gain: f64) -> Self {
        FirInstance { sample_rate, kind: FirType::Gain, center: 0, data: vec![gain] }
    }

    /// A custom impulse response with the given centre tap position.
    pub fn custom(sample_rate: u32, center: usize, data: Vec<f64>) -> Self {
        assert!(!data.is_empty() && center < data.len());
        FirInstance { sample_rate, kind: FirType::Custom, center, data }
    }

    /// The sample rate the instance was made for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The kind of the instance.
    pub fn kind(&self) -> FirType {
        self.kind
    }

    /// The number of taps.
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// The centre tap position (the group delay of a linear-phase response).
    pub fn center(&self) -> usize {
        self.center
    }

    /// The taps.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// The gain carried by identity, zero and gain instances.
    pub fn gain_value(&self) -> f64 {
        self.data[0]
    }
}

/// A factory of FIR instances.
///
/// `version` is monotonically non-decreasing and changes exactly when a subsequent `make` would
/// produce a behaviourally different instance.
pub trait FirGenerator: Send + Sync {
    /// The current parameter version.
    fn version(&self) -> u32;

    /// Synthesize an instance for the given sample rate. Returns `None` when the parameters do
    /// not describe a filter.
    fn make(&self, sample_rate: u32) -> Option<FirInstance>;
}

/// Generates identity instances. The version never changes.
#[derive(Debug, Default)]
pub struct IdentityFir;

impl FirGenerator for IdentityFir {
    fn version(&self) -> u32 {
        0
    }

    fn make(&self, sample_rate: u32) -> Option<FirInstance> {
        Some(FirInstance::identity(sample_rate))
    }
}

/// Generates zero instances. The version never changes.
#[derive(Debug, Default)]
pub struct ZeroFir;

impl FirGenerator for ZeroFir {
    fn version(&self) -> u32 {
        0
    }

    fn make(&self, sample_rate: u32) -> Option<FirInstance> {
        Some(FirInstance::zero(sample_rate))
    }
}

/// Generates scalar gain instances.
#[derive(Debug)]
pub struct GainFir {
    gain: Mutex<f64>,
    ver: AtomicU32,
}

impl GainFir {
    pub fn new(gain: f64) -> Self {
        GainFir { gain: Mutex::new(gain), ver: AtomicU32::new(0) }
    }

    pub fn gain(&self) -> f64 {
        *self.gain.lock().unwrap()
    }

    pub fn set_gain(&self, gain: f64) {
        let mut lock = self.gain.lock().unwrap();
        if *lock != gain {
            *lock = gain;
            self.ver.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl FirGenerator for GainFir {
    fn version(&self) -> u32 {
        self.ver.load(Ordering::Relaxed)
    }

    fn make(&self, sample_rate: u32) -> Option<FirInstance> {
        Some(FirInstance::gain(sample_rate, self.gain()))
    }
}

/// Wraps a caller-supplied impulse response as a generator.
///
/// The response is used verbatim at any sample rate; the caller is responsible for designing it
/// for the stream it is applied to.
#[derive(Debug, Default)]
pub struct CustomFir {
    response: Mutex<(Vec<f64>, usize)>,
    ver: AtomicU32,
}

impl CustomFir {
    pub fn new(center: usize, data: Vec<f64>) -> Self {
        assert!(!data.is_empty() && center < data.len());
        CustomFir { response: Mutex::new((data, center)), ver: AtomicU32::new(0) }
    }

    /// Replace the impulse response. Returns false and changes nothing when the response is
    /// empty or the centre is out of range.
    pub fn set_response(&self, center: usize, data: Vec<f64>) -> bool {
        if data.is_empty() || center >= data.len() {
            return false;
        }
        *self.response.lock().unwrap() = (data, center);
        self.ver.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl FirGenerator for CustomFir {
    fn version(&self) -> u32 {
        self.ver.load(Ordering::Relaxed)
    }

    fn make(&self, sample_rate: u32) -> Option<FirInstance> {
        let lock = self.response.lock().unwrap();
        if lock.0.is_empty() {
            return None;
        }
        Some(FirInstance::custom(sample_rate, lock.1, lock.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_trivial_generators() {
        let fir = IdentityFir.make(48000).unwrap();
        assert_eq!(fir.kind(), FirType::Identity);
        assert_eq!(fir.length(), 1);
        assert_eq!(fir.gain_value(), 1.0);

        let fir = ZeroFir.make(48000).unwrap();
        assert_eq!(fir.kind(), FirType::Zero);
        assert_eq!(fir.gain_value(), 0.0);

        let gen = GainFir::new(0.5);
        let fir = gen.make(48000).unwrap();
        assert_eq!(fir.kind(), FirType::Gain);
        assert_eq!(fir.gain_value(), 0.5);
    }

    #[test]
    fn verify_versioning() {
        let gen = GainFir::new(1.0);
        let v0 = gen.version();

        // Make does not bump the version.
        let _ = gen.make(48000);
        assert_eq!(gen.version(), v0);

        // A parameter change does.
        gen.set_gain(2.0);
        assert_ne!(gen.version(), v0);

        // Setting the same value again does not.
        let v1 = gen.version();
        gen.set_gain(2.0);
        assert_eq!(gen.version(), v1);
    }

    #[test]
    fn verify_custom() {
        let gen = CustomFir::new(1, vec![0.25, 0.5, 0.25]);
        let fir = gen.make(44100).unwrap();
        assert_eq!(fir.kind(), FirType::Custom);
        assert_eq!(fir.length(), 3);
        assert_eq!(fir.center(), 1);

        assert!(!gen.set_response(5, vec![1.0]));
        assert!(gen.set_response(0, vec![1.0, 0.5]));
        assert_eq!(gen.make(44100).unwrap().length(), 2);
    }
}
