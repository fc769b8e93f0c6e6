// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{ChannelName, Chunk, Speakers, NUM_CHANNELS};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};

/// The speed of sound used for distance-based delay units.
pub const SONIC_SPEED: f64 = 330.0;

/// The unit delay values are specified in.
///
/// Distance units are negative delays: a speaker standing further away needs its signal
/// *earlier*, so the other channels are delayed instead.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DelayUnits {
    #[default]
    Samples,
    Milliseconds,
    Meters,
    Centimeters,
    Feet,
    Inches,
}

/// A per-channel delay line.
///
/// Delays are specified per channel name. The common part of all delays is cancelled and
/// carried as a plain timestamp shift, so only the differences between channels cost memory.
#[derive(Debug, Default)]
pub struct Delay {
    enabled: bool,
    units: DelayUnits,
    delays: [f64; NUM_CHANNELS],

    // Per input channel: a circular delay line and its write position.
    lines: Vec<Vec<f64>>,
    pos: Vec<usize>,
    lag: f64,

    open: bool,
    spk: Speakers,
}

impl Delay {
    pub fn new() -> Self {
        Delay { enabled: true, ..Default::default() }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn units(&self) -> DelayUnits {
        self.units
    }

    /// Change the unit, converting the stored delay values so the effective delays stay put.
    pub fn set_units(&mut self, units: DelayUnits) {
        let factor = self.units2samples(self.units) / self.units2samples(units);
        for delay in self.delays.iter_mut() {
            *delay *= factor;
        }
        self.units = units;
    }

    /// The delay values per channel name, in the current unit.
    pub fn delays(&self) -> [f64; NUM_CHANNELS] {
        self.delays
    }

    /// Set the delay values per channel name, in the current unit.
    pub fn set_delays(&mut self, delays: [f64; NUM_CHANNELS]) {
        self.delays = delays;
        if self.open {
            self.rebuild();
        }
    }

    fn units2samples(&self, units: DelayUnits) -> f64 {
        let rate = f64::from(self.spk.sample_rate.max(1));
        match units {
            DelayUnits::Samples => 1.0,
            DelayUnits::Milliseconds => rate / 1000.0,
            DelayUnits::Meters => -rate / SONIC_SPEED,
            DelayUnits::Centimeters => -rate / SONIC_SPEED / 100.0,
            DelayUnits::Feet => -rate / SONIC_SPEED / 3.28,
            DelayUnits::Inches => -rate / SONIC_SPEED / 39.37,
        }
    }

    fn rebuild(&mut self) {
        let factor = self.units2samples(self.units);
        let order = self.spk.order();

        let samples: Vec<f64> =
            order.iter().map(|name| self.delays[name.index()] * factor).collect();

        // The smallest delay is common to all channels; cancel it and keep it as a timestamp
        // shift.
        let lag = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let lag = if lag.is_finite() { lag.floor() } else { 0.0 };
        self.lag = lag;

        self.lines.clear();
        self.pos.clear();
        for s in samples {
            let d = (s - lag).round().max(0.0) as usize;
            self.lines.push(vec![0.0; d]);
            self.pos.push(0);
        }
    }

    /// The delay of channel `name` in samples, after lag cancellation.
    pub fn channel_delay(&self, name: ChannelName) -> usize {
        match self.spk.channel_index(name) {
            Some(ch) => self.lines[ch].len(),
            None => 0,
        }
    }
}

impl Filter for Delay {
    fn name(&self) -> &'static str {
        "Delay"
    }

    fn can_open(&self, spk: Speakers) -> bool {
        is_linear_input(spk)
    }

    fn open(&mut self, spk: Speakers) -> bool {
        if !self.can_open(spk) {
            return false;
        }
        self.open = true;
        self.spk = spk;
        self.rebuild();
        true
    }

    fn close(&mut self) {
        self.open = false;
        self.spk = Speakers::UNKNOWN;
        self.lines.clear();
        self.pos.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {
        for line in self.lines.iter_mut() {
            line.fill(0.0);
        }
        self.pos.fill(0);
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        *out = input.take();
        if out.is_dummy() {
            return Ok(false);
        }

        if out.sync {
            out.time += self.lag / f64::from(self.spk.sample_rate);
        }

        if !self.enabled {
            return Ok(true);
        }

        for (ch, plane) in out.planes_mut().into_iter().enumerate().take(self.spk.nch()) {
            let line = &mut self.lines[ch];
            if line.is_empty() {
                continue;
            }
            let len = line.len();
            let pos = &mut self.pos[ch];
            for s in plane.iter_mut() {
                std::mem::swap(s, &mut line[*pos]);
                *pos += 1;
                if *pos >= len {
                    *pos = 0;
                }
            }
        }
        Ok(true)
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
