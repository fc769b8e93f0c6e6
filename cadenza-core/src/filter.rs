// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `filter` module defines the streaming contract all processing nodes obey.

use crate::audio::{Chunk, Speakers};
use crate::errors::Result;

/// The streaming contract of a processing node.
///
/// # Usage
///
/// A filter is configured through its own setters, opened with an input format, fed with
/// `process`, drained with `flush`, and optionally closed:
///
/// ```text
/// filter.open(spk);
/// while have_data() {
///     let mut input = next_chunk();
///     while filter.process(&mut input, &mut out)? {
///         deliver(&mut out);
///     }
/// }
/// while filter.flush(&mut out)? {
///     deliver(&mut out);
/// }
/// ```
///
/// `process` consumes the input chunk partially or wholly, leaving the unconsumed tail in
/// place; the caller repeats `process` with the same chunk until it returns `false` ("need more
/// input"). A filter may buffer data, so `flush` must be called at the end of a stream, and
/// before reopening the filter with a new format to avoid losing buffered samples.
///
/// # Stream changes
///
/// A filter announces that its next output chunk begins a new stream by returning `true` from
/// `new_stream` right after the `process` or `flush` call that produced the chunk. Downstream
/// consumers must finish the previous stream (flush) before accepting the chunk. Filters whose
/// output format is only known after inspecting data (`is_ofdd`) report
/// [`Speakers::UNKNOWN`] from `get_output` until the first produced chunk, and start their
/// output stream explicitly through `new_stream`.
///
/// # Errors
///
/// `process` and `flush` fail with [`crate::errors::Error::Process`]. After a failure the only
/// legal calls are `reset` or `close`.
pub trait Filter {
    /// The display name of the filter, used in error reports and chain dumps.
    fn name(&self) -> &'static str;

    /// Check format support. Must not allocate, and must be consistent until a parameter
    /// changes. A filter may still fail to `open` a supported format when resource allocation
    /// fails.
    fn can_open(&self, spk: Speakers) -> bool;

    /// Open the filter with the given input format and allocate resources. Returns `true` on
    /// success. Reopening an already open filter is legal and may reuse resources.
    fn open(&mut self, spk: Speakers) -> bool;

    /// Close the filter and release resources. Optional and idempotent.
    fn close(&mut self);

    /// Returns true while the filter is open and able to process data.
    fn is_open(&self) -> bool;

    /// Prepare for a new stream with the same input format: clear buffers and sync state
    /// without releasing resources. Data-driven filters may revert their output format to
    /// unknown.
    fn reset(&mut self);

    /// Process input data and try to produce one output chunk. Returns `true` when `out`
    /// carries a chunk to deliver downstream, `false` when more input is needed.
    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool>;

    /// Drain buffered data. Returns `true` while output chunks are produced; `false` once the
    /// filter is fully drained.
    fn flush(&mut self, out: &mut Chunk) -> Result<bool>;

    /// Returns true when the chunk just produced begins a new output stream.
    fn new_stream(&self) -> bool {
        false
    }

    /// Returns true when the output format is data driven, i.e. `get_output` may return the
    /// unknown format after a successful `open`.
    fn is_ofdd(&self) -> bool {
        false
    }

    /// The input format passed to the last successful `open`.
    fn get_input(&self) -> Speakers;

    /// The current output format, or [`Speakers::UNKNOWN`] when not yet determined.
    fn get_output(&self) -> Speakers;
}

/// Returns true for any fully specified linear format.
///
/// Most sample processing filters accept exactly this set of input formats.
pub fn is_linear_input(spk: Speakers) -> bool {
    spk.is_linear() && spk.is_fully_specified()
}

/// A filter that passes data through untouched. Used at the ends of a filter graph and as a
/// stand-in wherever a node is required but no processing is wanted.
#[derive(Debug, Default)]
pub struct Passthrough {
    open: bool,
    spk: Speakers,
}

impl Passthrough {
    pub fn new() -> Self {
        Passthrough::default()
    }
}

impl Filter for Passthrough {
    fn name(&self) -> &'static str {
        "Passthrough"
    }

    fn can_open(&self, _spk: Speakers) -> bool {
        true
    }

    fn open(&mut self, spk: Speakers) -> bool {
        self.open = true;
        self.spk = spk;
        true
    }

    fn close(&mut self) {
        self.open = false;
        self.spk = Speakers::UNKNOWN;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {}

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        Ok(!out.is_dummy())
    }

    fn flush(&mut self, _out: &mut Chunk) -> Result<bool> {
        Ok(false)
    }

    fn get_input(&self) -> Speakers {
        self.spk
    }

    fn get_output(&self) -> Speakers {
        self.spk
    }
}
