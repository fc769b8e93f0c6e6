// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use smallvec::SmallVec;

use super::NUM_CHANNELS;

/// A multichannel planar sample buffer.
///
/// Samples are stored as one contiguous allocation of `nch` planes of `nsamples` samples each.
/// Reallocation with the same dimensions is free, so buffers may be sized on every `open` call.
#[derive(Clone, Debug, Default)]
pub struct SampleBuf {
    nch: usize,
    nsamples: usize,
    data: Vec<f64>,
}

impl SampleBuf {
    /// Instantiate an empty buffer with no planes.
    pub fn new() -> Self {
        SampleBuf::default()
    }

    /// Instantiate a zeroed buffer of `nch` planes of `nsamples` samples each.
    pub fn with_size(nch: usize, nsamples: usize) -> Self {
        let mut buf = SampleBuf::new();
        buf.allocate(nch, nsamples);
        buf
    }

    /// Resize the buffer to `nch` planes of `nsamples` samples and zero the content.
    ///
    /// The underlying allocation is reused when large enough.
    pub fn allocate(&mut self, nch: usize, nsamples: usize) {
        self.data.clear();
        self.data.resize(nch * nsamples, 0.0);
        self.nch = nch;
        self.nsamples = nsamples;
    }

    /// The number of planes.
    pub fn nch(&self) -> usize {
        self.nch
    }

    /// The number of samples per plane.
    pub fn nsamples(&self) -> usize {
        self.nsamples
    }

    /// Returns true when no storage is allocated.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Zero all samples.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Zero `len` samples of every plane starting at `offset`.
    pub fn zero_range(&mut self, offset: usize, len: usize) {
        for ch in 0..self.nch {
            self.plane_mut(ch)[offset..offset + len].fill(0.0);
        }
    }

    /// An immutable view of the plane of channel `ch`.
    pub fn plane(&self, ch: usize) -> &[f64] {
        &self.data[ch * self.nsamples..(ch + 1) * self.nsamples]
    }

    /// A mutable view of the plane of channel `ch`.
    pub fn plane_mut(&mut self, ch: usize) -> &mut [f64] {
        &mut self.data[ch * self.nsamples..(ch + 1) * self.nsamples]
    }

    /// Immutable views of all planes.
    pub fn planes(&self) -> SmallVec<[&[f64]; NUM_CHANNELS]> {
        self.data.chunks_exact(self.nsamples.max(1)).take(self.nch).collect()
    }

    /// Mutable views of all planes.
    pub fn planes_mut(&mut self) -> SmallVec<[&mut [f64]; NUM_CHANNELS]> {
        let nsamples = self.nsamples.max(1);
        self.data.chunks_exact_mut(nsamples).take(self.nch).collect()
    }

    /// Copy `len` samples of every plane of `src` starting at `src_offset` into this buffer at
    /// `dst_offset`. Both buffers must have at least `nch` planes.
    pub fn copy_from(
        &mut self,
        dst_offset: usize,
        src: &[&[f64]],
        src_offset: usize,
        nch: usize,
        len: usize,
    ) {
        for (ch, plane) in src.iter().enumerate().take(nch) {
            self.plane_mut(ch)[dst_offset..dst_offset + len]
                .copy_from_slice(&plane[src_offset..src_offset + len]);
        }
    }
}
