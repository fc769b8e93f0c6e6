// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `graph` module implements the dynamic filter chain runtime.
//!
//! A [`FilterGraph`] owns a set of filters and connects them one after another. The active
//! chain is rebuilt on the fly when a format changes between two nodes or when the filter set
//! is edited during processing. A rebuild is flush-aware: everything downstream of the change
//! drains its buffered data into the output before it is reopened or removed, so the output
//! stream never loses samples.

use std::fmt;

use log::{debug, trace};

use crate::audio::{Chunk, Speakers};
use crate::errors::{process_error, Result};
use crate::filter::{Filter, Passthrough};

/// A handle to a filter added to a [`FilterGraph`].
pub type FilterId = usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NodeState {
    Empty,
    Processing,
    Rebuild,
    DoneFlushing,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SlotRef {
    Start,
    End,
    Slot(usize),
}

struct Node {
    slot: SlotRef,
    state: NodeState,
    flushing: bool,
    input: Chunk,
    output: Chunk,
}

impl Node {
    fn new(slot: SlotRef) -> Self {
        Node {
            slot,
            state: NodeState::Empty,
            flushing: false,
            input: Chunk::new(),
            output: Chunk::new(),
        }
    }
}

struct Slot {
    filter: Option<Box<dyn Filter>>,
    name: String,
    removed: bool,
}

/// A dynamic chain of filters behaving as a single filter.
///
/// Filters are added with [`FilterGraph::add_back`] and [`FilterGraph::add_front`] and may be
/// added or removed *during* processing; the chain notices the change at the next chunk and
/// rebuilds gracefully, flushing the affected tail of the chain first. The same flush-aware
/// rebuild runs when a filter changes its output format mid-stream (`new_stream`).
///
/// An empty graph passes data through.
pub struct FilterGraph {
    slots: Vec<Slot>,
    order: Vec<usize>,
    chain: Vec<Node>,

    pass_start: Passthrough,
    pass_end: Passthrough,

    is_new_stream: bool,
    pending_new_stream: bool,

    open: bool,
}

impl FilterGraph {
    pub fn new() -> Self {
        FilterGraph {
            slots: Vec::new(),
            order: Vec::new(),
            chain: vec![Node::new(SlotRef::Start), Node::new(SlotRef::End)],
            pass_start: Passthrough::new(),
            pass_end: Passthrough::new(),
            is_new_stream: false,
            pending_new_stream: false,
            open: false,
        }
    }

    /// Append a filter to the end of the chain.
    pub fn add_back(&mut self, filter: Box<dyn Filter>, name: &str) -> FilterId {
        let id = self.slots.len();
        self.slots.push(Slot { filter: Some(filter), name: name.to_string(), removed: false });
        self.order.push(id);
        id
    }

    /// Insert a filter at the beginning of the chain.
    pub fn add_front(&mut self, filter: Box<dyn Filter>, name: &str) -> FilterId {
        let id = self.slots.len();
        self.slots.push(Slot { filter: Some(filter), name: name.to_string(), removed: false });
        self.order.insert(0, id);
        id
    }

    /// Remove a filter from the chain.
    ///
    /// The filter keeps processing until the rebuild has flushed it; it is dropped afterwards.
    /// Use [`FilterGraph::destroy`] to drop everything immediately.
    pub fn remove(&mut self, id: FilterId) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.removed = true;
        }
        self.order.retain(|&other| other != id);
    }

    /// Remove all filters from the chain, gracefully.
    pub fn clear(&mut self) {
        for &id in &self.order {
            self.slots[id].removed = true;
        }
        self.order.clear();
    }

    /// Drop the active chain and all filters immediately, losing any buffered data.
    pub fn destroy(&mut self) {
        self.truncate_after(0);
        self.pass_end.close();
        self.slots.clear();
        self.order.clear();
        for node in self.chain.iter_mut() {
            node.state = NodeState::Empty;
            node.flushing = false;
            node.input.set_empty();
            node.output.set_empty();
        }
    }

    /// The name a filter was added under.
    pub fn filter_name(&self, id: FilterId) -> Option<&str> {
        self.slots.get(id).map(|slot| slot.name.as_str())
    }

    /// Access a filter by id.
    pub fn filter(&self, id: FilterId) -> Option<&dyn Filter> {
        self.slots.get(id).and_then(|slot| slot.filter.as_deref())
    }

    /// Access a filter by id, mutably (to change its parameters during processing).
    pub fn filter_mut(&mut self, id: FilterId) -> Option<&mut (dyn Filter + '_)> {
        match self.slots.get_mut(id) {
            Some(slot) => match slot.filter.as_deref_mut() {
                Some(filter) => Some(filter as &mut dyn Filter),
                None => None,
            },
            None => None,
        }
    }

    /// The id of the node following `slot` in the chain layout.
    fn route_after(order: &[usize], slot: SlotRef) -> SlotRef {
        match slot {
            SlotRef::Start => match order.first() {
                Some(&id) => SlotRef::Slot(id),
                None => SlotRef::End,
            },
            SlotRef::Slot(id) => {
                match order.iter().position(|&other| other == id) {
                    Some(pos) => match order.get(pos + 1) {
                        Some(&next) => SlotRef::Slot(next),
                        None => SlotRef::End,
                    },
                    // The slot was removed; route to the end, the upstream check rebuilds.
                    None => SlotRef::End,
                }
            }
            SlotRef::End => SlotRef::End,
        }
    }

    fn node_filter_mut<'a>(
        pass_start: &'a mut Passthrough,
        pass_end: &'a mut Passthrough,
        slots: &'a mut [Slot],
        slot: SlotRef,
    ) -> &'a mut dyn Filter {
        match slot {
            SlotRef::Start => pass_start,
            SlotRef::End => pass_end,
            SlotRef::Slot(id) => slots[id].filter.as_deref_mut().expect("slot filter missing"),
        }
    }

    /// Close and drop the nodes strictly between `index` and the end node.
    fn truncate_after(&mut self, index: usize) {
        let end = self.chain.len() - 1;
        for node in self.chain.drain(index + 1..end) {
            if let SlotRef::Slot(id) = node.slot {
                if let Some(filter) = self.slots[id].filter.as_mut() {
                    filter.close();
                }
                if self.slots[id].removed {
                    self.slots[id].filter = None;
                }
            }
        }
    }

    /// Rebuild the chain from the node at `index` downwards. The node itself does not change.
    fn build_chain(&mut self, index: usize) -> bool {
        let mut i = index;
        loop {
            let next_spk = {
                let filter = Self::node_filter_mut(
                    &mut self.pass_start,
                    &mut self.pass_end,
                    &mut self.slots,
                    self.chain[i].slot,
                );
                filter.get_output()
            };

            // A data-driven filter in transition: leave the tail alone until the format is
            // known.
            if next_spk.is_unknown() {
                return true;
            }

            let next_route = Self::route_after(&self.order, self.chain[i].slot);

            if next_route == self.chain[i + 1].slot {
                // The node does not change; just reopen it with the new format and go down.
                if next_route == SlotRef::End {
                    let old = self.pass_end.get_output();
                    if !old.is_unknown() && old != next_spk {
                        self.pending_new_stream = true;
                    }
                }
                let filter = Self::node_filter_mut(
                    &mut self.pass_start,
                    &mut self.pass_end,
                    &mut self.slots,
                    next_route,
                );
                if !filter.open(next_spk) {
                    return false;
                }
                self.chain[i + 1].state = NodeState::Empty;
                self.chain[i + 1].flushing = false;

                if next_route == SlotRef::End {
                    return true;
                }
                i += 1;
                continue;
            }

            // The chain changes here: drop the stale tail.
            if self.chain[i + 1].slot != SlotRef::End {
                self.truncate_after(i);
            }

            if next_route == SlotRef::End {
                let old = self.pass_end.get_output();
                if !old.is_unknown() && old != next_spk {
                    self.pending_new_stream = true;
                }
                if !self.pass_end.open(next_spk) {
                    return false;
                }
                self.chain[i + 1].state = NodeState::Empty;
                self.chain[i + 1].flushing = false;
                return true;
            }

            // Build a new node.
            let SlotRef::Slot(id) = next_route else { unreachable!() };
            debug!("building node '{}' for {}", self.slots[id].name, next_spk);

            let filter = self.slots[id].filter.as_deref_mut().expect("slot filter missing");
            if !filter.open(next_spk) {
                return false;
            }

            self.chain.insert(i + 1, Node::new(next_route));
            i += 1;
        }
    }

    /// Walk the chain, pushing data down and pulling more from upstream as needed.
    ///
    /// Returns `Ok(true)` with a chunk in `out` when the end of the chain produced data, and
    /// `Ok(false)` when the whole chain is drained and needs more input.
    fn process_chain(&mut self, out: &mut Chunk) -> Result<bool> {
        // A chain rebuild may be decided only when the walk started from the very top,
        // otherwise a partially rebuilt chain would process stale data.
        let mut allow_rebuild = false;

        let mut i: isize = if self.chain[0].state == NodeState::Empty {
            0
        }
        else {
            (self.chain.len() - 1) as isize
        };

        loop {
            if i < 0 {
                return Ok(false);
            }
            let idx = i as usize;

            if idx == 0 {
                allow_rebuild = true;
            }

            // The end node only collects output.
            if self.chain[idx].slot == SlotRef::End {
                if self.chain[idx].flushing {
                    self.chain[idx].state = NodeState::Empty;
                    self.chain[idx].flushing = false;
                    i -= 1;
                    continue;
                }

                let node = &mut self.chain[idx];
                let produced = self.pass_end.process(&mut node.input, &mut node.output)?;
                if !produced {
                    node.state = NodeState::Empty;
                    i -= 1;
                    continue;
                }

                node.state = NodeState::Processing;
                *out = node.output.take();
                self.is_new_stream = self.pending_new_stream;
                self.pending_new_stream = false;
                return Ok(true);
            }

            match self.chain[idx].state {
                NodeState::Empty | NodeState::Processing => {
                    let mut rebuild = false;
                    let new_stream;

                    if self.chain[idx].flushing {
                        let node_slot = self.chain[idx].slot;
                        let filter = Self::node_filter_mut(
                            &mut self.pass_start,
                            &mut self.pass_end,
                            &mut self.slots,
                            node_slot,
                        );
                        let node = &mut self.chain[idx];
                        let more = filter.flush(&mut node.output)?;
                        if !more {
                            // This node is drained; flush the downstream and go down.
                            filter.reset();
                            node.state = NodeState::DoneFlushing;
                            node.flushing = false;
                            self.chain[idx + 1].flushing = true;
                            i += 1;
                            continue;
                        }
                        new_stream = filter.new_stream();
                    }
                    else {
                        let node_slot = self.chain[idx].slot;
                        let filter = Self::node_filter_mut(
                            &mut self.pass_start,
                            &mut self.pass_end,
                            &mut self.slots,
                            node_slot,
                        );
                        let node = &mut self.chain[idx];
                        let produced = filter.process(&mut node.input, &mut node.output)?;
                        if !produced {
                            // No data; go up for more.
                            node.state = NodeState::Empty;
                            i -= 1;
                            continue;
                        }
                        new_stream = filter.new_stream();

                        // Verify the chain layout below this node.
                        if allow_rebuild
                            && Self::route_after(&self.order, node_slot)
                                != self.chain[idx + 1].slot
                        {
                            rebuild = true;
                        }
                    }

                    if rebuild || new_stream {
                        trace!("flushing downstream for a chain rebuild at node {}", idx);
                        self.chain[idx].state = NodeState::Rebuild;
                        self.chain[idx + 1].flushing = true;
                        i += 1;
                        continue;
                    }

                    self.chain[idx].state = NodeState::Processing;
                    let chunk = self.chain[idx].output.take();
                    self.chain[idx + 1].input = chunk;
                    i += 1;
                }
                NodeState::Rebuild => {
                    // The downstream finished flushing; renew the tail and send the pending
                    // chunk of the new stream down.
                    if !self.build_chain(idx) {
                        return process_error("FilterGraph", "cannot rebuild the chain");
                    }
                    self.chain[idx].state = NodeState::Processing;
                    let chunk = self.chain[idx].output.take();
                    self.chain[idx + 1].input = chunk;
                    i += 1;
                }
                NodeState::DoneFlushing => {
                    // The downstream finished flushing; go up for more data.
                    self.chain[idx].state = NodeState::Empty;
                    i -= 1;
                }
            }
        }
    }
}

impl Default for FilterGraph {
    fn default() -> Self {
        FilterGraph::new()
    }
}

impl Filter for FilterGraph {
    fn name(&self) -> &'static str {
        "FilterGraph"
    }

    fn can_open(&self, spk: Speakers) -> bool {
        match self.order.first() {
            Some(&id) => match self.slots[id].filter.as_deref() {
                Some(filter) => filter.can_open(spk),
                None => false,
            },
            None => true,
        }
    }

    fn open(&mut self, spk: Speakers) -> bool {
        if !self.can_open(spk) {
            return false;
        }

        // Drop the previous chain with everything buffered.
        self.truncate_after(0);
        for node in self.chain.iter_mut() {
            node.state = NodeState::Empty;
            node.flushing = false;
            node.input.set_empty();
            node.output.set_empty();
        }

        self.pass_start.open(spk);
        if !self.build_chain(0) {
            self.open = false;
            return false;
        }

        self.is_new_stream = false;
        self.pending_new_stream = false;
        self.open = true;
        true
    }

    fn close(&mut self) {
        self.truncate_after(0);
        self.pass_start.close();
        self.pass_end.close();
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {
        for i in 0..self.chain.len() {
            let slot = self.chain[i].slot;
            let filter = Self::node_filter_mut(
                &mut self.pass_start,
                &mut self.pass_end,
                &mut self.slots,
                slot,
            );
            filter.reset();
            self.chain[i].state = NodeState::Empty;
            self.chain[i].flushing = false;
            self.chain[i].input.set_empty();
            self.chain[i].output.set_empty();
        }
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        if !self.open {
            return process_error("FilterGraph", "filter is not open");
        }

        if self.chain[0].state != NodeState::Empty && self.process_chain(out)? {
            return Ok(true);
        }

        if input.is_dummy() {
            return Ok(false);
        }

        self.chain[0].input = input.take();
        self.process_chain(out)
    }

    fn flush(&mut self, out: &mut Chunk) -> Result<bool> {
        if !self.open {
            return process_error("FilterGraph", "filter is not open");
        }

        self.chain[0].flushing = true;
        self.process_chain(out)
    }

    fn new_stream(&self) -> bool {
        self.is_new_stream
    }

    fn is_ofdd(&self) -> bool {
        self.order.iter().any(|&id| {
            self.slots[id].filter.as_deref().map(|filter| filter.is_ofdd()).unwrap_or(false)
        })
    }

    fn get_input(&self) -> Speakers {
        self.pass_start.get_input()
    }

    fn get_output(&self) -> Speakers {
        self.pass_end.get_output()
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pass_start.get_input())?;
        for node in self.chain.iter() {
            if let SlotRef::Slot(id) = node.slot {
                let name = &self.slots[id].name;
                let spk = match self.slots[id].filter.as_deref() {
                    Some(filter) => filter.get_output(),
                    None => Speakers::UNKNOWN,
                };
                write!(f, " -> {} -> {}", name, spk)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ChannelMask, Format, SampleBuf};
    use crate::filters::{Agc, Convolver, Counter, Gain, Mixer};
    use crate::fir::CustomFir;
    use std::sync::Arc;

    fn stereo() -> Speakers {
        Speakers::new(Format::Linear, ChannelMask::STEREO, 48000)
    }

    fn ramp(nch: usize, len: usize) -> SampleBuf {
        let mut buf = SampleBuf::with_size(nch, len);
        for ch in 0..nch {
            for (i, s) in buf.plane_mut(ch).iter_mut().enumerate() {
                *s = (i as f64 * 0.1).sin() * 0.5 + ch as f64 * 0.01;
            }
        }
        buf
    }

    fn run(graph: &mut FilterGraph, input: &SampleBuf, chunk: usize) -> SampleBuf {
        let mut collected: Vec<Vec<f64>> = vec![Vec::new(); crate::audio::NUM_CHANNELS];

        let mut pos = 0;
        while pos < input.nsamples() {
            let len = chunk.min(input.nsamples() - pos);
            let mut buf = SampleBuf::with_size(input.nch(), len);
            buf.copy_from(0, &input.planes(), pos, input.nch(), len);
            let mut inp = Chunk::new();
            inp.set_linear(buf, len);
            pos += len;

            let mut out = Chunk::new();
            while graph.process(&mut inp, &mut out).unwrap() {
                for ch in 0..graph.get_output().nch() {
                    collected[ch].extend_from_slice(out.plane(ch));
                }
            }
        }
        let mut out = Chunk::new();
        while graph.flush(&mut out).unwrap() {
            if !out.is_empty() {
                for ch in 0..graph.get_output().nch() {
                    collected[ch].extend_from_slice(out.plane(ch));
                }
            }
        }

        let nch = graph.get_output().nch().max(1);
        let mut result = SampleBuf::with_size(nch, collected[0].len());
        for ch in 0..nch {
            result.plane_mut(ch).copy_from_slice(&collected[ch]);
        }
        result
    }

    #[test]
    fn verify_empty_graph_is_passthrough() {
        let mut graph = FilterGraph::new();
        assert!(graph.open(stereo()));
        assert_eq!(graph.get_output(), stereo());

        let input = ramp(2, 100);
        let out = run(&mut graph, &input, 32);
        assert_eq!(out.nsamples(), 100);
        assert_eq!(out.plane(0), input.plane(0));
    }

    #[test]
    fn verify_gains_compose() {
        let mut graph = FilterGraph::new();
        graph.add_back(Box::new(Gain::new(2.0)), "gain 2");
        graph.add_back(Box::new(Gain::new(0.5)), "gain 0.5");
        assert!(graph.open(stereo()));

        let input = ramp(2, 300);
        let out = run(&mut graph, &input, 77);
        assert_eq!(out.nsamples(), 300);
        for ch in 0..2 {
            for (a, b) in out.plane(ch).iter().zip(input.plane(ch)) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn verify_format_change_through_mixer() {
        // A mixer in the chain changes the channel layout; the graph output format follows.
        let mut mixer = Mixer::new(1024);
        assert!(mixer.set_output(Speakers::new(Format::Linear, ChannelMask::MONO, 0)));

        let mut graph = FilterGraph::new();
        graph.add_back(Box::new(mixer), "mixer");
        assert!(graph.open(stereo()));

        assert_eq!(graph.get_output().mask, ChannelMask::MONO);
        assert_eq!(graph.get_output().sample_rate, 48000);

        let input = ramp(2, 256);
        let out = run(&mut graph, &input, 64);
        assert_eq!(out.nsamples(), 256);
    }

    #[test]
    fn verify_buffered_chain_preserves_sample_count() {
        // A convolver and an AGC both buffer; the flushed output matches the input length.
        let taps: Vec<f64> = vec![0.2; 21];
        let mut graph = FilterGraph::new();
        graph.add_back(Box::new(Convolver::new(Arc::new(CustomFir::new(10, taps)))), "fir");
        graph.add_back(Box::new(Agc::new(256)), "agc");
        graph.add_back(Box::new(Counter::new()), "counter");
        assert!(graph.open(stereo()));

        let input = ramp(2, 10000);
        let out = run(&mut graph, &input, 997);
        assert_eq!(out.nsamples(), 10000);
    }

    #[test]
    fn verify_reset_reproducibility() {
        // Running the same stream twice around a reset produces identical output.
        let taps: Vec<f64> = vec![0.1, 0.5, 0.8, 0.5, 0.1];
        let mut graph = FilterGraph::new();
        graph.add_back(Box::new(Convolver::new(Arc::new(CustomFir::new(2, taps)))), "fir");
        graph.add_back(Box::new(Gain::new(0.9)), "gain");
        assert!(graph.open(stereo()));

        let input = ramp(2, 3000);
        let first = run(&mut graph, &input, 501);

        graph.reset();
        let second = run(&mut graph, &input, 501);

        assert_eq!(first.nsamples(), second.nsamples());
        for ch in 0..2 {
            assert_eq!(first.plane(ch), second.plane(ch));
        }
    }

    #[test]
    fn verify_chain_edit_during_processing() {
        // Removing a filter mid-stream rebuilds the chain without losing samples.
        let mut graph = FilterGraph::new();
        let gain_id = graph.add_back(Box::new(Gain::new(2.0)), "gain");
        assert!(graph.open(stereo()));

        let input = ramp(2, 100);

        // First half with the gain in place.
        let mut buf = SampleBuf::with_size(2, 50);
        buf.copy_from(0, &input.planes(), 0, 2, 50);
        let mut inp = Chunk::new();
        inp.set_linear(buf, 50);

        let mut collected = Vec::new();
        let mut out = Chunk::new();
        while graph.process(&mut inp, &mut out).unwrap() {
            collected.extend_from_slice(out.plane(0));
        }

        // Drop the gain; the next chunk goes through the rebuilt (empty) chain.
        graph.remove(gain_id);

        let mut buf = SampleBuf::with_size(2, 50);
        buf.copy_from(0, &input.planes(), 50, 2, 50);
        let mut inp = Chunk::new();
        inp.set_linear(buf, 50);
        while graph.process(&mut inp, &mut out).unwrap() {
            collected.extend_from_slice(out.plane(0));
        }
        let mut out = Chunk::new();
        while graph.flush(&mut out).unwrap() {
            if !out.is_empty() {
                collected.extend_from_slice(out.plane(0));
            }
        }

        assert_eq!(collected.len(), 100);
        for (i, s) in collected.iter().enumerate() {
            let expected = if i < 50 { input.plane(0)[i] * 2.0 } else { input.plane(0)[i] };
            assert!((s - expected).abs() < 1e-12, "sample {}", i);
        }
    }

    #[test]
    fn verify_display() {
        let mut graph = FilterGraph::new();
        graph.add_back(Box::new(Gain::new(1.0)), "gain");
        assert!(graph.open(stereo()));
        let text = graph.to_string();
        assert!(text.contains("gain"));
        assert!(text.contains("Linear"));
    }
}
