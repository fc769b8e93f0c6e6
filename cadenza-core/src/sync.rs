// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `sync` module propagates presentation time stamps across buffering filters.

use std::collections::VecDeque;

use crate::audio::Chunk;

/// `SyncHelper` carries time stamps through a filter that buffers data.
///
/// A buffering filter cannot forward an incoming time stamp directly: by the time the stamped
/// sample leaves the filter, it sits somewhere in the middle of an output chunk. The helper
/// records each incoming stamp together with the buffer fill level at arrival, shifts the
/// recorded position as data drains, and re-attaches the stamp to the output chunk that carries
/// the stamped sample.
///
/// The queue is ordered by position descending. When the buffer is fully drained at most one
/// entry with a non-positive position remains; it stamps the first chunk produced after
/// buffering resumes.
#[derive(Debug, Default)]
pub struct SyncHelper {
    queue: VecDeque<(f64, i64)>,
    size: u64,
}

impl SyncHelper {
    /// Instantiate an empty helper.
    pub fn new() -> Self {
        SyncHelper::default()
    }

    /// Capture the sync point of an input chunk, if any, and clear it from the chunk.
    ///
    /// The stamp is recorded at the current buffer fill level, i.e. it belongs to the next
    /// sample pushed with [`SyncHelper::put`].
    pub fn receive_sync(&mut self, chunk: &mut Chunk) {
        if chunk.sync {
            self.queue.push_back((chunk.time, self.size as i64));
            chunk.sync = false;
        }
    }

    /// Account for `n` units pushed into the filter's buffer.
    pub fn put(&mut self, n: usize) {
        self.size += n as u64;
    }

    /// Account for `n` units drained from the filter's buffer.
    pub fn drop(&mut self, n: usize) {
        for entry in self.queue.iter_mut() {
            entry.1 -= n as i64;
        }
        while self.queue.len() > 1 && self.queue[1].1 <= 0 {
            self.queue.pop_front();
        }
        self.size = self.size.saturating_sub(n as u64);
    }

    /// Stamp an output chunk when the head of the queue has been reached.
    ///
    /// `size_to_time` converts buffered units into seconds. The stamp is shifted backwards to
    /// the first sample of the output chunk.
    pub fn send_sync(&mut self, chunk: &mut Chunk, size_to_time: f64) {
        if let Some(&(time, pos)) = self.queue.front() {
            if pos <= 0 {
                chunk.set_sync(true, time - pos as f64 * size_to_time);
                self.queue.pop_front();
            }
        }
    }

    /// Stamp an output chunk of linear samples and drain its size.
    pub fn send_sync_linear(&mut self, chunk: &mut Chunk, sample_rate: u32) {
        self.send_sync(chunk, 1.0 / f64::from(sample_rate));
        let len = chunk.len();
        self.drop(len);
    }

    /// Stamp an output chunk that is a whole frame of opaque data and drain its size.
    pub fn send_frame_sync(&mut self, chunk: &mut Chunk) {
        self.send_sync(chunk, 0.0);
        let len = chunk.len();
        self.drop(len);
    }

    /// Forget all stamps and reset the fill level.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.size = 0;
    }
}
