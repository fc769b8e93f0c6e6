// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{ChannelMask, Chunk, Relation, Speakers, NUM_CHANNELS};
use crate::errors::Result;
use crate::filter::{is_linear_input, Filter};

use std::f64::consts::FRAC_1_SQRT_2;

/// A mixing matrix indexed `[input channel name][output channel name]`.
pub type MixMatrix = [[f64; NUM_CHANNELS]; NUM_CHANNELS];

const LEVEL_3DB: f64 = FRAC_1_SQRT_2;
const LEVEL_SIDE_OF_CENTER_TO_SIDE: f64 = 0.86602540378443864676372317075294;
const LEVEL_SIDE_OF_CENTER_TO_FAR_SIDE: f64 = 0.5;

// Channel name indexes, for matrix subscripts.
const L: usize = 0;
const C: usize = 1;
const R: usize = 2;
const SL: usize = 3;
const SR: usize = 4;
const LFE: usize = 5;
const CL: usize = 6;
const CR: usize = 7;
const BL: usize = 8;
const BC: usize = 9;
const BR: usize = 10;

// The mono surround channel of Dolby Surround sources.
const S: usize = SL;

#[inline]
fn has(mask: u32, ch: usize) -> bool {
    mask & (1 << ch) != 0
}

/// The channel-matrix mixer: `O = M * I` over the channel vectors of each sample.
///
/// The input format is set by `open`, the output format by [`Mixer::set_output`] (its sample
/// rate is ignored and inherited from the input). The matrix is synthesized automatically from
/// the channel masks, the inter-channel relations and the level options, or set manually when
/// `auto_matrix` is off.
///
/// Mixing runs in place when the output has no more channels than the input; otherwise output
/// blocks of at most `nsamples` samples are produced per call.
pub struct Mixer {
    out_spk: Speakers,
    nsamples: usize,

    auto_matrix: bool,
    normalize_matrix: bool,
    voice_control: bool,
    expand_stereo: bool,

    clev: f64,
    slev: f64,
    lfelev: f64,

    gain: f64,
    input_gains: [f64; NUM_CHANNELS],
    output_gains: [f64; NUM_CHANNELS],

    matrix: MixMatrix,
    m: MixMatrix,

    open: bool,
    spk: Speakers,
}

impl Mixer {
    /// Instantiate a mixer producing blocks of at most `nsamples` samples in buffered mode.
    pub fn new(nsamples: usize) -> Self {
        let mut mixer = Mixer {
            out_spk: Speakers::UNKNOWN,
            nsamples: nsamples.max(1),
            auto_matrix: true,
            normalize_matrix: true,
            voice_control: true,
            expand_stereo: true,
            clev: 1.0,
            slev: 1.0,
            lfelev: 1.0,
            gain: 1.0,
            input_gains: [1.0; NUM_CHANNELS],
            output_gains: [1.0; NUM_CHANNELS],
            matrix: [[0.0; NUM_CHANNELS]; NUM_CHANNELS],
            m: [[0.0; NUM_CHANNELS]; NUM_CHANNELS],
            open: false,
            spk: Speakers::UNKNOWN,
        };
        mixer.calc_matrix();
        mixer
    }

    /// Set the desired output format. Only the format, mask, relation and level are honored;
    /// the sample rate is inherited from the input.
    pub fn set_output(&mut self, spk: Speakers) -> bool {
        if !spk.is_linear() || spk.mask.is_empty() {
            return false;
        }

        self.out_spk = spk;
        self.out_spk.sample_rate = self.spk.sample_rate;

        if self.open {
            if self.auto_matrix {
                self.calc_matrix();
            }
            self.prepare_matrix();
        }
        true
    }

    /// Returns true when mixing into a separate buffer (more output than input channels).
    pub fn is_buffered(&self) -> bool {
        self.out_spk.nch() > self.spk.nch()
    }

    pub fn buffer_size(&self) -> usize {
        self.nsamples
    }

    pub fn set_buffer_size(&mut self, nsamples: usize) {
        self.nsamples = nsamples.max(1);
    }

    pub fn matrix(&self) -> &MixMatrix {
        &self.matrix
    }

    /// Set the matrix manually. Only honored with `auto_matrix` off.
    pub fn set_matrix(&mut self, matrix: &MixMatrix) {
        if !self.auto_matrix {
            self.matrix = *matrix;
            self.prepare_matrix();
        }
    }

    pub fn auto_matrix(&self) -> bool {
        self.auto_matrix
    }

    pub fn set_auto_matrix(&mut self, auto_matrix: bool) {
        self.auto_matrix = auto_matrix;
        if auto_matrix {
            self.calc_matrix();
        }
    }

    pub fn normalize_matrix(&self) -> bool {
        self.normalize_matrix
    }

    pub fn set_normalize_matrix(&mut self, normalize_matrix: bool) {
        self.normalize_matrix = normalize_matrix;
        if self.auto_matrix {
            self.calc_matrix();
        }
    }

    pub fn voice_control(&self) -> bool {
        self.voice_control
    }

    pub fn set_voice_control(&mut self, voice_control: bool) {
        self.voice_control = voice_control;
        if self.auto_matrix {
            self.calc_matrix();
        }
    }

    pub fn expand_stereo(&self) -> bool {
        self.expand_stereo
    }

    pub fn set_expand_stereo(&mut self, expand_stereo: bool) {
        self.expand_stereo = expand_stereo;
        if self.auto_matrix {
            self.calc_matrix();
        }
    }

    pub fn clev(&self) -> f64 {
        self.clev
    }

    pub fn set_clev(&mut self, clev: f64) {
        self.clev = clev;
        if self.auto_matrix {
            self.calc_matrix();
        }
    }

    pub fn slev(&self) -> f64 {
        self.slev
    }

    pub fn set_slev(&mut self, slev: f64) {
        self.slev = slev;
        if self.auto_matrix {
            self.calc_matrix();
        }
    }

    pub fn lfelev(&self) -> f64 {
        self.lfelev
    }

    pub fn set_lfelev(&mut self, lfelev: f64) {
        self.lfelev = lfelev;
        if self.auto_matrix {
            self.calc_matrix();
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain;
        self.prepare_matrix();
    }

    pub fn input_gains(&self) -> &[f64; NUM_CHANNELS] {
        &self.input_gains
    }

    pub fn set_input_gains(&mut self, gains: [f64; NUM_CHANNELS]) {
        self.input_gains = gains;
        self.prepare_matrix();
    }

    pub fn output_gains(&self) -> &[f64; NUM_CHANNELS] {
        &self.output_gains
    }

    pub fn set_output_gains(&mut self, gains: [f64; NUM_CHANNELS]) {
        self.output_gains = gains;
        self.prepare_matrix();
    }

    /// Synthesize the automatic matrix from the current formats and options. Works even with
    /// `auto_matrix` off.
    pub fn calc_matrix(&mut self) {
        let in_mask = self.spk.mask.bits();
        let out_mask = self.out_spk.mask.bits();

        let in_nfront = has(in_mask, L) as u32 + has(in_mask, C) as u32 + has(in_mask, R) as u32;
        let in_nrear = has(in_mask, SL) as u32 + has(in_mask, SR) as u32;

        let in_dolby = matches!(self.spk.relation, Relation::Dolby | Relation::DolbyPlii)
            .then_some(self.spk.relation);
        let out_dolby = matches!(self.out_spk.relation, Relation::Dolby | Relation::DolbyPlii)
            .then_some(self.out_spk.relation);

        let clev = self.clev;
        let slev = self.slev;
        let lfelev = self.lfelev;

        let mut matrix = [[0.0f64; NUM_CHANNELS]; NUM_CHANNELS];

        /////////////////////////////////////////////////////
        // Downmixing

        if in_dolby.is_some() && out_dolby.is_some() {
            // Dolby modes are backwards-compatible.
            matrix[L][L] = 1.0;
            matrix[R][R] = 1.0;
        }
        else if let Some(out_dolby) = out_dolby {
            // Mix to Dolby Surround / Pro Logic / Pro Logic II.
            if in_nfront >= 2 {
                matrix[L][L] = 1.0;
                matrix[R][R] = 1.0;
            }
            if in_nfront != 2 {
                matrix[C][L] = LEVEL_3DB * clev;
                matrix[C][R] = LEVEL_3DB * clev;
            }
            if in_nrear == 1 {
                matrix[S][L] = -LEVEL_3DB * slev;
                matrix[S][R] = LEVEL_3DB * slev;
            }
            else if in_nrear == 2 {
                match out_dolby {
                    Relation::DolbyPlii => {
                        matrix[SL][L] = -0.8660 * slev;
                        matrix[SR][L] = -0.5000 * slev;
                        matrix[SL][R] = 0.5000 * slev;
                        matrix[SR][R] = 0.8660 * slev;
                    }
                    _ => {
                        matrix[SL][L] = -slev;
                        matrix[SR][L] = -slev;
                        matrix[SL][R] = slev;
                        matrix[SR][R] = slev;
                    }
                }
            }
        }
        else {
            // Direct routes.
            if has(in_mask & out_mask, L) {
                matrix[L][L] = 1.0;
            }
            if has(in_mask & out_mask, R) {
                matrix[R][R] = 1.0;
            }
            if has(in_mask & out_mask, C) {
                matrix[C][C] = clev;
            }
            if has(in_mask & out_mask, SL) {
                matrix[SL][SL] = slev;
            }
            if has(in_mask & out_mask, SR) {
                matrix[SR][SR] = slev;
            }
            if has(in_mask & out_mask, CL) {
                matrix[CL][CL] = 1.0;
            }
            if has(in_mask & out_mask, CR) {
                matrix[CR][CR] = 1.0;
            }
            if has(in_mask & out_mask, BL) {
                matrix[BL][BL] = slev;
            }
            if has(in_mask & out_mask, BC) {
                matrix[BC][BC] = slev;
            }
            if has(in_mask & out_mask, BR) {
                matrix[BR][BR] = slev;
            }
            if has(in_mask & out_mask, LFE) {
                matrix[LFE][LFE] = lfelev;
            }

            // Mix the centre.
            if has(in_mask & !out_mask, C) {
                if has(out_mask, CL) && has(out_mask, CR) {
                    matrix[C][CL] = LEVEL_3DB * clev;
                    matrix[C][CR] = LEVEL_3DB * clev;
                }
                else if has(out_mask, L) && has(out_mask, R) {
                    matrix[C][L] = LEVEL_3DB * clev;
                    matrix[C][R] = LEVEL_3DB * clev;
                }
            }

            // Mix left & right.
            if has(in_mask & !out_mask, L) && has(out_mask, C) {
                matrix[L][C] = 1.0;
            }
            if has(in_mask & !out_mask, R) && has(out_mask, C) {
                matrix[R][C] = 1.0;
            }

            // Mix left-of-centre & right-of-centre.
            if has(in_mask & !out_mask, CL) {
                if has(out_mask, L) && has(out_mask, C) {
                    matrix[CL][L] = LEVEL_3DB;
                    matrix[CL][C] = LEVEL_3DB;
                }
                else if has(out_mask, L) && has(out_mask, R) {
                    matrix[CL][L] = LEVEL_SIDE_OF_CENTER_TO_SIDE;
                    matrix[CL][R] = LEVEL_SIDE_OF_CENTER_TO_FAR_SIDE;
                }
                else if has(out_mask, C) {
                    matrix[CL][C] = 1.0;
                }
            }
            if has(in_mask & !out_mask, CR) {
                if has(out_mask, R) && has(out_mask, C) {
                    matrix[CR][R] = LEVEL_3DB;
                    matrix[CR][C] = LEVEL_3DB;
                }
                else if has(out_mask, L) && has(out_mask, R) {
                    matrix[CR][R] = LEVEL_SIDE_OF_CENTER_TO_SIDE;
                    matrix[CR][L] = LEVEL_SIDE_OF_CENTER_TO_FAR_SIDE;
                }
                else if has(out_mask, C) {
                    matrix[CR][C] = 1.0;
                }
            }

            // Mix side left & side right.
            if has(in_mask & !out_mask, SL) {
                if has(out_mask, BL) {
                    matrix[SL][BL] = slev;
                }
                else if has(out_mask, BC) {
                    matrix[SL][BC] = slev;
                }
                else if has(out_mask, L) {
                    matrix[SL][L] = slev;
                }
                else if has(out_mask, C) {
                    matrix[SL][C] = slev;
                }
            }
            if has(in_mask & !out_mask, SR) {
                if has(out_mask, BR) {
                    matrix[SR][BR] = slev;
                }
                else if has(out_mask, BC) {
                    matrix[SR][BC] = slev;
                }
                else if has(out_mask, R) {
                    matrix[SR][R] = slev;
                }
                else if has(out_mask, C) {
                    matrix[SR][C] = slev;
                }
            }

            // Mix back left & back right.
            if has(in_mask & !out_mask, BL) {
                if has(out_mask, SL) {
                    matrix[BL][SL] = slev;
                }
                else if has(out_mask, BC) {
                    matrix[BL][BC] = slev;
                }
                else if has(out_mask, L) {
                    matrix[BL][L] = slev;
                }
                else if has(out_mask, C) {
                    matrix[BL][C] = slev;
                }
            }
            if has(in_mask & !out_mask, BR) {
                if has(out_mask, SR) {
                    matrix[BR][SR] = slev;
                }
                else if has(out_mask, BC) {
                    matrix[BR][BC] = slev;
                }
                else if has(out_mask, R) {
                    matrix[BR][R] = slev;
                }
                else if has(out_mask, C) {
                    matrix[BR][C] = slev;
                }
            }

            // Mix back centre.
            if has(in_mask & !out_mask, BC) {
                if has(out_mask, BL) && has(out_mask, BR) {
                    matrix[BC][BL] = LEVEL_3DB * slev;
                    matrix[BC][BR] = LEVEL_3DB * slev;
                }
                else if has(out_mask, SL) && has(out_mask, SR) {
                    matrix[BC][SL] = LEVEL_3DB * slev;
                    matrix[BC][SR] = LEVEL_3DB * slev;
                }
                else if has(out_mask, L) && has(out_mask, R) {
                    matrix[BC][L] = LEVEL_3DB * slev;
                    matrix[BC][R] = LEVEL_3DB * slev;
                }
                else if has(out_mask, C) {
                    matrix[BC][C] = slev;
                }
            }

            // Mix LFE.
            if has(in_mask & !out_mask, LFE) {
                if has(out_mask, L) && has(out_mask, R) {
                    matrix[LFE][L] = LEVEL_3DB * lfelev;
                    matrix[LFE][R] = LEVEL_3DB * lfelev;
                }
                else if has(out_mask, C) {
                    matrix[LFE][C] = lfelev;
                }
            }
        }

        /////////////////////////////////////////////////////
        // Expand stereo: synthesize missing centre and surround from the stereo pair.

        if self.expand_stereo {
            if has(!in_mask & out_mask, C) && out_mask != 1 << C {
                matrix[L][C] = clev * LEVEL_3DB;
                matrix[R][C] = clev * LEVEL_3DB;
            }

            // No surround at the input: route the matrix difference signal.
            let surround_mask = (1 << SL) | (1 << SR) | (1 << BL) | (1 << BR) | (1 << BC);
            if in_mask & surround_mask == 0 {
                if has(out_mask, SL) && has(out_mask, SR) {
                    matrix[L][SL] = slev * 0.5;
                    matrix[R][SL] = -slev * 0.5;
                    matrix[L][SR] = -slev * 0.5;
                    matrix[R][SR] = slev * 0.5;
                }
                if has(out_mask, BL) && has(out_mask, BR) {
                    matrix[L][BL] = slev * 0.5;
                    matrix[R][BL] = -slev * 0.5;
                    matrix[L][BR] = -slev * 0.5;
                    matrix[R][BR] = slev * 0.5;
                }
                if has(out_mask, BC) {
                    matrix[L][BC] = slev * LEVEL_3DB;
                    matrix[R][BC] = -slev * LEVEL_3DB;
                }
            }
        }

        /////////////////////////////////////////////////////
        // Voice control: emulate a variable centre with a dematrixing pair when neither side
        // carries a real centre channel.

        if self.voice_control {
            let center_level: f64 = (0..NUM_CHANNELS).map(|i| matrix[i][C].abs()).sum();

            if has(in_mask, L)
                && has(in_mask, R)
                && !has(in_mask, C)
                && has(out_mask, L)
                && has(out_mask, R)
                && center_level == 0.0
            {
                matrix[L][L] = 0.5 * (1.0 + clev);
                matrix[R][L] = -0.5 * (1.0 - clev);
                matrix[L][R] = -0.5 * (1.0 - clev);
                matrix[R][R] = 0.5 * (1.0 + clev);
            }
        }

        /////////////////////////////////////////////////////
        // Matrix normalization: bound every output by the sum of its input coefficients.

        if self.normalize_matrix {
            let mut max_level = 0.0f64;
            for out_ch in 0..NUM_CHANNELS {
                let level: f64 = (0..NUM_CHANNELS).map(|in_ch| matrix[in_ch][out_ch].abs()).sum();
                max_level = max_level.max(level);
            }

            if max_level > 0.0 {
                let norm = 1.0 / max_level;
                for row in matrix.iter_mut() {
                    for cell in row.iter_mut() {
                        *cell *= norm;
                    }
                }
            }
        }

        self.matrix = matrix;
        self.prepare_matrix();
    }

    /// Reduce the name-indexed matrix to the plane-indexed form including all gains.
    fn prepare_matrix(&mut self) {
        let in_order = self.spk.order();
        let out_order = self.out_spk.order();

        let factor = if self.spk.level > 0.0 {
            self.out_spk.level / self.spk.level * self.gain
        }
        else {
            self.out_spk.level * self.gain
        };

        self.m = [[0.0; NUM_CHANNELS]; NUM_CHANNELS];
        for (ch1, in_name) in in_order.iter().enumerate() {
            for (ch2, out_name) in out_order.iter().enumerate() {
                self.m[ch1][ch2] = self.matrix[in_name.index()][out_name.index()]
                    * self.input_gains[in_name.index()]
                    * self.output_gains[out_name.index()]
                    * factor;
            }
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Mixing kernels. One specialization per input x output channel count up to
// 8x8; the general routine covers the rest.
///////////////////////////////////////////////////////////////////////////////

fn io_mix<const NI: usize, const NO: usize>(
    m: &MixMatrix,
    input: &[&[f64]],
    output: &mut [&mut [f64]],
    len: usize,
) {
    for s in 0..len {
        let mut acc = [0.0f64; NO];
        for i in 0..NI {
            let v = input[i][s];
            for (o, a) in acc.iter_mut().enumerate() {
                *a += v * m[i][o];
            }
        }
        for (o, a) in acc.iter().enumerate() {
            output[o][s] = *a;
        }
    }
}

fn ip_mix<const NI: usize, const NO: usize>(m: &MixMatrix, planes: &mut [&mut [f64]], len: usize) {
    for s in 0..len {
        let mut acc = [0.0f64; NO];
        for (i, row) in m.iter().enumerate().take(NI) {
            let v = planes[i][s];
            for (o, a) in acc.iter_mut().enumerate() {
                *a += v * row[o];
            }
        }
        for (o, a) in acc.iter().enumerate() {
            planes[o][s] = *a;
        }
    }
}

fn io_mix_any(
    m: &MixMatrix,
    input: &[&[f64]],
    output: &mut [&mut [f64]],
    ni: usize,
    no: usize,
    len: usize,
) {
    for s in 0..len {
        let mut acc = [0.0f64; NUM_CHANNELS];
        for i in 0..ni {
            let v = input[i][s];
            for (o, a) in acc.iter_mut().enumerate().take(no) {
                *a += v * m[i][o];
            }
        }
        for (o, plane) in output.iter_mut().enumerate().take(no) {
            plane[s] = acc[o];
        }
    }
}

fn ip_mix_any(m: &MixMatrix, planes: &mut [&mut [f64]], ni: usize, no: usize, len: usize) {
    for s in 0..len {
        let mut acc = [0.0f64; NUM_CHANNELS];
        for i in 0..ni {
            let v = planes[i][s];
            for (o, a) in acc.iter_mut().enumerate().take(no) {
                *a += v * m[i][o];
            }
        }
        for (o, plane) in planes.iter_mut().enumerate().take(no) {
            plane[s] = acc[o];
        }
    }
}

type IoMixFn = fn(&MixMatrix, &[&[f64]], &mut [&mut [f64]], usize);
type IpMixFn = fn(&MixMatrix, &mut [&mut [f64]], usize);

macro_rules! io_mix_row {
    ($ni:literal) => {
        [
            io_mix::<$ni, 1>,
            io_mix::<$ni, 2>,
            io_mix::<$ni, 3>,
            io_mix::<$ni, 4>,
            io_mix::<$ni, 5>,
            io_mix::<$ni, 6>,
            io_mix::<$ni, 7>,
            io_mix::<$ni, 8>,
        ]
    };
}

macro_rules! ip_mix_row {
    ($ni:literal) => {
        [
            ip_mix::<$ni, 1>,
            ip_mix::<$ni, 2>,
            ip_mix::<$ni, 3>,
            ip_mix::<$ni, 4>,
            ip_mix::<$ni, 5>,
            ip_mix::<$ni, 6>,
            ip_mix::<$ni, 7>,
            ip_mix::<$ni, 8>,
        ]
    };
}

static IO_MIX_TBL: [[IoMixFn; 8]; 8] = [
    io_mix_row!(1),
    io_mix_row!(2),
    io_mix_row!(3),
    io_mix_row!(4),
    io_mix_row!(5),
    io_mix_row!(6),
    io_mix_row!(7),
    io_mix_row!(8),
];

static IP_MIX_TBL: [[IpMixFn; 8]; 8] = [
    ip_mix_row!(1),
    ip_mix_row!(2),
    ip_mix_row!(3),
    ip_mix_row!(4),
    ip_mix_row!(5),
    ip_mix_row!(6),
    ip_mix_row!(7),
    ip_mix_row!(8),
];

impl Filter for Mixer {
    fn name(&self) -> &'static str {
        "Mixer"
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
        self.out_spk.sample_rate = spk.sample_rate;
        if self.out_spk.is_unknown() {
            // No output format requested: mix to the input layout.
            self.out_spk = spk;
        }

        if self.auto_matrix {
            self.calc_matrix();
        }
        self.prepare_matrix();
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
        let in_nch = self.spk.nch();
        let out_nch = self.out_spk.nch();

        if self.is_buffered() {
            if input.is_dummy() {
                return Ok(false);
            }

            let n = self.nsamples.min(input.len());
            let sync = input.sync;
            let time = input.time;

            {
                let in_planes = input.planes();
                let buf = out.linear_mut(out_nch, n);
                let mut out_planes = buf.planes_mut();

                if in_nch <= 8 && out_nch <= 8 {
                    IO_MIX_TBL[in_nch - 1][out_nch - 1](&self.m, &in_planes, &mut out_planes, n);
                }
                else {
                    io_mix_any(&self.m, &in_planes, &mut out_planes, in_nch, out_nch, n);
                }
            }

            out.set_sync(sync, time);
            input.drop_samples(n);
            Ok(!out.is_dummy())
        }
        else {
            *out = input.take();
            if out.is_dummy() {
                return Ok(false);
            }

            let len = out.len();
            let mut planes = out.planes_mut();
            if in_nch <= 8 && out_nch <= 8 {
                IP_MIX_TBL[in_nch - 1][out_nch - 1](&self.m, &mut planes, len);
            }
            else {
                ip_mix_any(&self.m, &mut planes, in_nch, out_nch, len);
            }
            Ok(true)
        }
    }

    fn flush(&mut self, _out: &mut Chunk) -> Result<bool> {
        Ok(false)
    }

    fn get_input(&self) -> Speakers {
        self.spk
    }

    fn get_output(&self) -> Speakers {
        self.out_spk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Format, SampleBuf};
    use crate::filters::Gain;

    fn linear(mask: ChannelMask) -> Speakers {
        Speakers::new(Format::Linear, mask, 48000)
    }

    #[test]
    fn verify_defaults() {
        let mixer = Mixer::new(1024);
        assert!(mixer.auto_matrix());
        assert!(mixer.normalize_matrix());
        assert!(mixer.voice_control());
        assert!(mixer.expand_stereo());
        assert_eq!(mixer.clev(), 1.0);
        assert_eq!(mixer.slev(), 1.0);
        assert_eq!(mixer.lfelev(), 1.0);
        assert_eq!(mixer.gain(), 1.0);
        assert_eq!(mixer.buffer_size(), 1024);
    }

    #[test]
    fn verify_downmix_5_1_to_stereo_matrix() {
        let mut mixer = Mixer::new(1024);
        assert!(mixer.set_output(linear(ChannelMask::STEREO)));
        assert!(mixer.open(linear(ChannelMask::SURROUND_5_1)));

        let m = mixer.matrix();

        // With normalization on, the left column sums to one:
        // direct 1.0, centre and LFE at -3 dB, side at full level.
        assert!((m[L][L] - 0.2929).abs() < 0.001, "l->l {}", m[L][L]);
        assert!((m[C][L] - 0.2071).abs() < 0.001, "c->l {}", m[C][L]);
        assert!((m[C][R] - 0.2071).abs() < 0.001, "c->r {}", m[C][R]);
        assert!((m[R][R] - 0.2929).abs() < 0.001, "r->r {}", m[R][R]);
        assert!((m[SL][L] - 0.2929).abs() < 0.001, "sl->l {}", m[SL][L]);
        assert!((m[SR][R] - 0.2929).abs() < 0.001, "sr->r {}", m[SR][R]);
        assert!((m[LFE][L] - 0.2071).abs() < 0.001, "lfe->l {}", m[LFE][L]);
        assert!((m[LFE][R] - 0.2071).abs() < 0.001, "lfe->r {}", m[LFE][R]);

        // Nothing routes across sides.
        assert_eq!(m[L][R], 0.0);
        assert_eq!(m[SL][R], 0.0);
    }

    #[test]
    fn verify_stereo_identity() {
        // Stereo to stereo with default options and unity voice level is an identity.
        let mut mixer = Mixer::new(1024);
        assert!(mixer.set_output(linear(ChannelMask::STEREO)));
        assert!(mixer.open(linear(ChannelMask::STEREO)));

        let mut buf = SampleBuf::with_size(2, 4);
        buf.plane_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        buf.plane_mut(1).copy_from_slice(&[-1.0, -2.0, -3.0, -4.0]);
        let mut input = Chunk::new();
        input.set_linear(buf, 4);

        let mut out = Chunk::new();
        assert!(mixer.process(&mut input, &mut out).unwrap());
        assert_eq!(out.plane(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.plane(1), &[-1.0, -2.0, -3.0, -4.0]);
    }

    #[test]
    fn verify_buffered_upmix() {
        // Mono to stereo runs buffered and splits the centre to both sides.
        let mut mixer = Mixer::new(16);
        mixer.set_expand_stereo(false);
        mixer.set_voice_control(false);
        assert!(mixer.set_output(linear(ChannelMask::STEREO)));
        assert!(mixer.open(linear(ChannelMask::MONO)));
        assert!(mixer.is_buffered());

        let mut buf = SampleBuf::with_size(1, 40);
        buf.plane_mut(0).fill(1.0);
        let mut input = Chunk::new();
        input.set_linear(buf, 40);

        // Output comes in blocks of at most 16 samples. The centre splits at -3 dB to both
        // sides, and normalization scales the single route back to full level.
        let mut total = 0;
        let mut out = Chunk::new();
        while mixer.process(&mut input, &mut out).unwrap() {
            assert!(out.len() <= 16);
            let l = out.plane(0).to_vec();
            let r = out.plane(1).to_vec();
            assert_eq!(l, r);
            for &s in &l {
                assert!((s - 1.0).abs() < 1e-9);
            }
            total += out.len();
        }
        assert_eq!(total, 40);
    }

    #[test]
    fn verify_gain_equivalence() {
        // Mixer(output = S, gain = G) equals Mixer(output = S) -> Gain(G).
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let spk = linear(ChannelMask::SURROUND_5_1);
        let gain = 0.7;

        let mut rng = SmallRng::seed_from_u64(934_759_385);
        let mut buf = SampleBuf::with_size(6, 512);
        for ch in 0..6 {
            for s in buf.plane_mut(ch).iter_mut() {
                *s = rng.random::<f64>() * 2.0 - 1.0;
            }
        }

        let run = |mixer: &mut Mixer, buf: &SampleBuf| -> SampleBuf {
            let mut input = Chunk::new();
            let mut copy = SampleBuf::with_size(6, 512);
            copy.copy_from(0, &buf.planes(), 0, 6, 512);
            input.set_linear(copy, 512);

            let mut out = Chunk::new();
            assert!(mixer.process(&mut input, &mut out).unwrap());
            let mut result = SampleBuf::with_size(2, out.len());
            result.copy_from(0, &out.planes(), 0, 2, out.len());
            result
        };

        let mut with_gain = Mixer::new(1024);
        with_gain.set_gain(gain);
        assert!(with_gain.set_output(linear(ChannelMask::STEREO)));
        assert!(with_gain.open(spk));
        let a = run(&mut with_gain, &buf);

        let mut without = Mixer::new(1024);
        assert!(without.set_output(linear(ChannelMask::STEREO)));
        assert!(without.open(spk));
        let mixed = run(&mut without, &buf);

        let mut gain_filter = Gain::new(gain);
        assert!(gain_filter.open(linear(ChannelMask::STEREO)));
        let mut input = Chunk::new();
        input.set_linear(mixed, 512);
        let mut b = Chunk::new();
        assert!(gain_filter.process(&mut input, &mut b).unwrap());

        for ch in 0..2 {
            for (x, y) in a.plane(ch).iter().zip(b.plane(ch)) {
                assert!((x - y).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn verify_voice_control_dematrix() {
        // Stereo in, stereo out, no centre anywhere: voice control applies the dematrix pair.
        let mut mixer = Mixer::new(1024);
        mixer.set_expand_stereo(false);
        mixer.set_clev(0.0);
        assert!(mixer.set_output(linear(ChannelMask::STEREO)));
        assert!(mixer.open(linear(ChannelMask::STEREO)));

        // With clev = 0 the voice pair becomes (L-R)/2 style: 0.5 on the diagonal, -0.5 across.
        let m = mixer.matrix();
        assert!((m[L][L] - 0.5).abs() < 1e-9);
        assert!((m[R][L] + 0.5).abs() < 1e-9);
        assert!((m[L][R] + 0.5).abs() < 1e-9);
        assert!((m[R][R] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn verify_manual_matrix() {
        let mut mixer = Mixer::new(1024);
        mixer.set_auto_matrix(false);

        let mut manual = [[0.0; NUM_CHANNELS]; NUM_CHANNELS];
        manual[L][R] = 1.0;
        manual[R][L] = 1.0;
        mixer.set_matrix(&manual);

        assert!(mixer.set_output(linear(ChannelMask::STEREO)));
        assert!(mixer.open(linear(ChannelMask::STEREO)));

        let mut buf = SampleBuf::with_size(2, 2);
        buf.plane_mut(0).copy_from_slice(&[1.0, 2.0]);
        buf.plane_mut(1).copy_from_slice(&[3.0, 4.0]);
        let mut input = Chunk::new();
        input.set_linear(buf, 2);

        let mut out = Chunk::new();
        assert!(mixer.process(&mut input, &mut out).unwrap());
        assert_eq!(out.plane(0), &[3.0, 4.0]);
        assert_eq!(out.plane(1), &[1.0, 2.0]);
    }
}
