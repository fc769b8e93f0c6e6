// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Project Cadenza core: a pull-model audio filter graph and the DSP primitives to build an
//! end-to-end multichannel transform pipeline with it.
//!
//! The crate is organized around a small number of contracts:
//!
//! * [`audio::Speakers`] describes a stream, [`audio::Chunk`] carries its data.
//! * [`filter::Filter`] is the streaming state machine every processing node obeys.
//! * [`graph::FilterGraph`] connects filters and rebuilds the chain on format and parameter
//!   changes without losing buffered samples.
//! * [`fir::FirGenerator`] produces impulse responses for the convolvers.
//!
//! Everything processes planar 64-bit samples; [`filters::Converter`] moves between PCM and
//! the planar representation at the edges of a pipeline.

pub mod audio;
pub mod dsp;
pub mod errors;
pub mod filter;
pub mod filters;
pub mod fir;
pub mod graph;
pub mod rng;
pub mod sync;
