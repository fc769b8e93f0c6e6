// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use smallvec::SmallVec;

use super::{SampleBuf, NUM_CHANNELS};

#[derive(Debug, Default)]
enum ChunkData {
    /// No payload.
    #[default]
    Dummy,
    /// Planar samples. `start..start + len` of every plane is the live window.
    Linear { buf: SampleBuf, start: usize, len: usize },
    /// Raw bytes. `start..start + len` is the live window.
    Raw { buf: Vec<u8>, start: usize, len: usize },
}

/// A unit of data travelling between filters.
///
/// A chunk owns its payload: either planar linear samples, raw bytes, or nothing. A filter
/// consumes the head of an input chunk by calling [`Chunk::drop_samples`] or
/// [`Chunk::drop_rawdata`], leaving the unconsumed tail for the next `process` call.
///
/// Two sync fields ride along with the payload. When `sync` is set, `time` is the presentation
/// time of the first sample (or byte) of the chunk; later samples are implicitly timestamped by
/// their offset.
#[derive(Debug, Default)]
pub struct Chunk {
    data: ChunkData,
    /// The chunk carries a time stamp for its first sample.
    pub sync: bool,
    /// Presentation time in seconds. Meaningful only when `sync` is set.
    pub time: f64,
}

impl Chunk {
    /// Instantiate a dummy chunk.
    pub fn new() -> Self {
        Chunk::default()
    }

    /// The payload size: samples per channel for linear chunks, bytes for raw chunks.
    pub fn len(&self) -> usize {
        match self.data {
            ChunkData::Dummy => 0,
            ChunkData::Linear { len, .. } => len,
            ChunkData::Raw { len, .. } => len,
        }
    }

    /// Returns true when the chunk carries no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true when the chunk carries neither data nor a sync point.
    pub fn is_dummy(&self) -> bool {
        self.is_empty() && !self.sync
    }

    /// Returns true when the chunk carries planar samples.
    pub fn is_linear(&self) -> bool {
        matches!(self.data, ChunkData::Linear { .. })
    }

    /// Returns true when the chunk carries raw bytes.
    pub fn is_raw(&self) -> bool {
        matches!(self.data, ChunkData::Raw { .. })
    }

    /// Clear payload and sync state.
    pub fn set_empty(&mut self) {
        self.data = ChunkData::Dummy;
        self.sync = false;
        self.time = 0.0;
    }

    /// Set the sync state.
    pub fn set_sync(&mut self, sync: bool, time: f64) {
        self.sync = sync;
        self.time = time;
    }

    /// Attach a sample buffer as payload; the live window is the first `len` samples.
    pub fn set_linear(&mut self, buf: SampleBuf, len: usize) {
        debug_assert!(len <= buf.nsamples());
        self.data = ChunkData::Linear { buf, start: 0, len };
    }

    /// Attach a byte buffer as payload; the live window is the first `len` bytes.
    pub fn set_raw(&mut self, buf: Vec<u8>, len: usize) {
        debug_assert!(len <= buf.len());
        self.data = ChunkData::Raw { buf, start: 0, len };
    }

    /// Turn the chunk into a linear chunk of `nch` x `len` zeroed samples, reusing the previous
    /// allocation when possible, and return the buffer for filling.
    pub fn linear_mut(&mut self, nch: usize, len: usize) -> &mut SampleBuf {
        let mut buf = match std::mem::take(&mut self.data) {
            ChunkData::Linear { buf, .. } => buf,
            _ => SampleBuf::new(),
        };
        buf.allocate(nch, len);
        self.data = ChunkData::Linear { buf, start: 0, len };
        match self.data {
            ChunkData::Linear { ref mut buf, .. } => buf,
            _ => unreachable!(),
        }
    }

    /// Turn the chunk into a raw chunk of `len` zeroed bytes, reusing the previous allocation
    /// when possible, and return the bytes for filling.
    pub fn raw_bytes_mut(&mut self, len: usize) -> &mut [u8] {
        let mut buf = match std::mem::take(&mut self.data) {
            ChunkData::Raw { buf, .. } => buf,
            _ => Vec::new(),
        };
        buf.clear();
        buf.resize(len, 0);
        self.data = ChunkData::Raw { buf, start: 0, len };
        match self.data {
            ChunkData::Raw { ref mut buf, .. } => &mut buf[..],
            _ => unreachable!(),
        }
    }

    /// The live window of the plane of channel `ch`. Panics for non-linear chunks.
    pub fn plane(&self, ch: usize) -> &[f64] {
        match self.data {
            ChunkData::Linear { ref buf, start, len } => &buf.plane(ch)[start..start + len],
            _ => panic!("not a linear chunk"),
        }
    }

    /// The live windows of all planes. Panics for non-linear chunks.
    pub fn planes(&self) -> SmallVec<[&[f64]; NUM_CHANNELS]> {
        match self.data {
            ChunkData::Linear { ref buf, start, len } => {
                buf.planes().into_iter().map(|plane| &plane[start..start + len]).collect()
            }
            _ => panic!("not a linear chunk"),
        }
    }

    /// The mutable live windows of all planes. Panics for non-linear chunks.
    pub fn planes_mut(&mut self) -> SmallVec<[&mut [f64]; NUM_CHANNELS]> {
        match self.data {
            ChunkData::Linear { ref mut buf, start, len } => buf
                .planes_mut()
                .into_iter()
                .map(|plane| &mut plane[start..start + len])
                .collect(),
            _ => panic!("not a linear chunk"),
        }
    }

    /// The number of planes of a linear chunk.
    pub fn nch(&self) -> usize {
        match self.data {
            ChunkData::Linear { ref buf, .. } => buf.nch(),
            _ => 0,
        }
    }

    /// The live window of a raw chunk. Panics for non-raw chunks.
    pub fn raw(&self) -> &[u8] {
        match self.data {
            ChunkData::Raw { ref buf, start, len } => &buf[start..start + len],
            _ => panic!("not a raw chunk"),
        }
    }

    /// Consume `n` samples from the head of a linear chunk. Clears the sync flag.
    pub fn drop_samples(&mut self, n: usize) {
        if let ChunkData::Linear { ref mut start, ref mut len, .. } = self.data {
            let n = n.min(*len);
            *start += n;
            *len -= n;
        }
        self.sync = false;
    }

    /// Consume `n` bytes from the head of a raw chunk. Clears the sync flag.
    pub fn drop_rawdata(&mut self, n: usize) {
        if let ChunkData::Raw { ref mut start, ref mut len, .. } = self.data {
            let n = n.min(*len);
            *start += n;
            *len -= n;
        }
        self.sync = false;
    }

    /// Shorten the live window to `new_len` units. No-op when already shorter.
    pub fn truncate(&mut self, new_len: usize) {
        match self.data {
            ChunkData::Linear { ref mut len, .. } | ChunkData::Raw { ref mut len, .. } => {
                if *len > new_len {
                    *len = new_len;
                }
            }
            ChunkData::Dummy => (),
        }
    }

    /// Take the chunk, leaving a dummy in place.
    pub fn take(&mut self) -> Chunk {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_chunk(values: &[f64]) -> Chunk {
        let mut buf = SampleBuf::with_size(1, values.len());
        buf.plane_mut(0).copy_from_slice(values);
        let mut chunk = Chunk::new();
        chunk.set_linear(buf, values.len());
        chunk
    }

    #[test]
    fn verify_dummy() {
        let mut chunk = Chunk::new();
        assert!(chunk.is_dummy());

        // A sync point alone makes the chunk non-dummy.
        chunk.set_sync(true, 1.5);
        assert!(chunk.is_empty());
        assert!(!chunk.is_dummy());
    }

    #[test]
    fn verify_drop_samples() {
        let mut chunk = linear_chunk(&[1.0, 2.0, 3.0, 4.0]);
        chunk.set_sync(true, 0.0);

        chunk.drop_samples(1);
        assert_eq!(chunk.len(), 3);
        assert_eq!(chunk.plane(0), &[2.0, 3.0, 4.0]);
        assert!(!chunk.sync);

        // Dropping more than available empties the chunk.
        chunk.drop_samples(10);
        assert!(chunk.is_empty());
    }

    #[test]
    fn verify_raw_window() {
        let mut chunk = Chunk::new();
        chunk.set_raw(vec![1, 2, 3, 4, 5], 5);
        chunk.drop_rawdata(2);
        assert_eq!(chunk.raw(), &[3, 4, 5]);
    }

    #[test]
    fn verify_linear_mut_reuse() {
        let mut chunk = linear_chunk(&[1.0, 2.0]);
        let buf = chunk.linear_mut(2, 3);
        assert_eq!(buf.nch(), 2);
        assert_eq!(buf.nsamples(), 3);
        // Reallocated storage must be zeroed.
        assert_eq!(buf.plane(0), &[0.0; 3]);
    }
}
