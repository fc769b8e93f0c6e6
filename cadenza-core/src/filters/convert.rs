// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::audio::{Chunk, Format, Speakers};
use crate::errors::Result;
use crate::filter::Filter;

/// Converts between interleaved PCM and planar linear samples.
///
/// Conversion keeps the numeric scale of the samples: a PCM16 stream decodes to linear samples
/// in the ±32768 range, announced by the reference level of the output format. When the input
/// format equals the target, the converter passes chunks through untouched.
///
/// An optional channel permutation reorders channels during conversion: input channel `k` is
/// written to output channel `order[k]`.
///
/// PCM frames do not align with chunk boundaries in general (a 24-bit stereo frame is 6 bytes),
/// so a partial frame is carried across `process` calls.
pub struct Converter {
    format: Format,
    nsamples: usize,
    order: Vec<usize>,

    part_buf: Vec<u8>,
    part_size: usize,

    open: bool,
    spk: Speakers,
}

impl Converter {
    /// Instantiate a converter to `format` processing at most `nsamples` samples per chunk.
    pub fn new(format: Format, nsamples: usize) -> Self {
        Converter {
            format,
            nsamples: nsamples.max(1),
            order: Vec::new(),
            part_buf: Vec::new(),
            part_size: 0,
            open: false,
            spk: Speakers::UNKNOWN,
        }
    }

    /// The target format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Change the target format. Fails when the filter is open with an incompatible input.
    pub fn set_format(&mut self, format: Format) -> bool {
        if !(format.is_linear() || format.is_pcm()) {
            return false;
        }
        if self.open && !formats_compatible(self.spk.format, format) {
            return false;
        }
        self.format = format;
        true
    }

    /// Set the channel permutation: input channel `k` goes to output channel `order[k]`. An
    /// empty order is the identity. Fails when `order` is not a permutation.
    pub fn set_order(&mut self, order: &[usize]) -> bool {
        let mut seen = [false; crate::audio::NUM_CHANNELS];
        for &ch in order {
            if ch >= order.len() || seen[ch] {
                return false;
            }
            seen[ch] = true;
        }
        self.order = order.to_vec();
        true
    }

    fn out_channel(&self, ch: usize) -> usize {
        if self.order.is_empty() {
            ch
        }
        else {
            self.order[ch]
        }
    }

    fn pcm2linear(&mut self, input: &mut Chunk, out: &mut Chunk) -> bool {
        let nch = self.spk.nch();
        let frame = self.spk.format.sample_bytes().unwrap() * nch;
        let format = self.spk.format;

        let sync = input.sync;
        let time = input.time;

        let buf = out.linear_mut(nch, self.nsamples);
        let mut out_size = 0;

        // Complete the partial frame carried from the previous chunk.
        if self.part_size > 0 {
            let need = frame - self.part_size;
            if input.len() < need {
                let len = input.len();
                self.part_buf[self.part_size..self.part_size + len]
                    .copy_from_slice(input.raw());
                self.part_size += len;
                input.drop_rawdata(len);
                return false;
            }

            self.part_buf[self.part_size..frame].copy_from_slice(&input.raw()[..need]);
            for ch in 0..nch {
                let dst = self.out_channel(ch);
                buf.plane_mut(dst)[0] = decode_sample(
                    format,
                    &self.part_buf[ch * (frame / nch)..],
                );
            }
            input.drop_rawdata(need);
            self.part_size = 0;
            out_size = 1;
        }

        // Convert whole frames.
        let n = (input.len() / frame).min(self.nsamples - out_size);
        {
            let raw = input.raw();
            let width = frame / nch;
            for ch in 0..nch {
                let dst = self.out_channel(ch);
                let plane = buf.plane_mut(dst);
                for s in 0..n {
                    let offset = s * frame + ch * width;
                    plane[out_size + s] = decode_sample(format, &raw[offset..]);
                }
            }
        }
        input.drop_rawdata(n * frame);
        out_size += n;

        // Stash a trailing partial frame.
        if input.len() < frame && !input.is_empty() {
            let len = input.len();
            self.part_buf[..len].copy_from_slice(input.raw());
            self.part_size = len;
            input.drop_rawdata(len);
        }

        out.truncate(out_size);
        out.set_sync(sync, time);
        out_size > 0 || sync
    }

    fn linear2pcm(&mut self, input: &mut Chunk, out: &mut Chunk) -> bool {
        let nch = self.spk.nch();
        let width = self.format.sample_bytes().unwrap();
        let frame = width * nch;
        let format = self.format;

        let sync = input.sync;
        let time = input.time;

        let n = input.len().min(self.nsamples);
        if n == 0 {
            return false;
        }

        {
            let planes = input.planes();
            let raw = out.raw_bytes_mut(n * frame);
            for (ch, plane) in planes.iter().enumerate().take(nch) {
                let dst = self.out_channel(ch);
                for (s, &v) in plane[..n].iter().enumerate() {
                    let offset = s * frame + dst * width;
                    encode_sample(format, v, &mut raw[offset..offset + width]);
                }
            }
        }

        input.drop_samples(n);
        out.set_sync(sync, time);
        true
    }
}

fn formats_compatible(input: Format, target: Format) -> bool {
    if input == target {
        return true;
    }
    (input.is_pcm() && target.is_linear()) || (input.is_linear() && target.is_pcm())
}

fn decode_sample(format: Format, bytes: &[u8]) -> f64 {
    match format {
        Format::Pcm16 => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        Format::Pcm16Be => f64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
        Format::Pcm24 => {
            f64::from(i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8)
        }
        Format::Pcm24Be => {
            f64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8)
        }
        Format::Pcm32 => {
            f64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        Format::Pcm32Be => {
            f64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        Format::PcmFloat => {
            f64::from(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        Format::PcmFloatBe => {
            f64::from(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        Format::PcmDouble => f64::from_le_bytes(bytes[..8].try_into().unwrap()),
        Format::PcmDoubleBe => f64::from_be_bytes(bytes[..8].try_into().unwrap()),
        _ => 0.0,
    }
}

fn encode_sample(format: Format, v: f64, out: &mut [u8]) {
    match format {
        Format::Pcm16 => out.copy_from_slice(&(round(v) as i16).to_le_bytes()),
        Format::Pcm16Be => out.copy_from_slice(&(round(v) as i16).to_be_bytes()),
        Format::Pcm24 => out.copy_from_slice(&(round(v) as i32).to_le_bytes()[..3]),
        Format::Pcm24Be => out.copy_from_slice(&(round(v) as i32).to_be_bytes()[1..]),
        Format::Pcm32 => out.copy_from_slice(&(round(v) as i32).to_le_bytes()),
        Format::Pcm32Be => out.copy_from_slice(&(round(v) as i32).to_be_bytes()),
        Format::PcmFloat => out.copy_from_slice(&(v as f32).to_le_bytes()),
        Format::PcmFloatBe => out.copy_from_slice(&(v as f32).to_be_bytes()),
        Format::PcmDouble => out.copy_from_slice(&v.to_le_bytes()),
        Format::PcmDoubleBe => out.copy_from_slice(&v.to_be_bytes()),
        _ => (),
    }
}

fn round(v: f64) -> f64 {
    (v + 0.5).floor()
}

impl Filter for Converter {
    fn name(&self) -> &'static str {
        "Converter"
    }

    fn can_open(&self, spk: Speakers) -> bool {
        spk.is_fully_specified() && formats_compatible(spk.format, self.format)
    }

    fn open(&mut self, spk: Speakers) -> bool {
        if !self.can_open(spk) {
            return false;
        }
        self.open = true;
        self.spk = spk;
        self.part_size = 0;

        if let Some(width) = spk.format.sample_bytes() {
            self.part_buf.resize(width * spk.nch(), 0);
        }
        true
    }

    fn close(&mut self) {
        self.open = false;
        self.spk = Speakers::UNKNOWN;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset(&mut self) {
        self.part_size = 0;
    }

    fn process(&mut self, input: &mut Chunk, out: &mut Chunk) -> Result<bool> {
        if input.is_dummy() {
            return Ok(false);
        }

        if self.spk.format == self.format {
            *out = input.take();
            return Ok(true);
        }

        let produced = if self.format.is_linear() {
            self.pcm2linear(input, out)
        }
        else {
            self.linear2pcm(input, out)
        };
        Ok(produced)
    }

    fn flush(&mut self, _out: &mut Chunk) -> Result<bool> {
        // A trailing partial frame cannot be decoded; it is dropped with the stream.
        Ok(false)
    }

    fn get_input(&self) -> Speakers {
        self.spk
    }

    fn get_output(&self) -> Speakers {
        Speakers { format: self.format, ..self.spk }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ChannelMask, SampleBuf};

    fn stereo(format: Format) -> Speakers {
        Speakers::new(format, ChannelMask::STEREO, 48000)
    }

    #[test]
    fn verify_round_trip_pcm16() {
        // linear -> PCM16 -> linear over integral values is exact.
        let samples_l = [0.0, 100.0, -100.0, 32767.0, -32768.0];
        let samples_r = [1.0, -1.0, 12345.0, -12345.0, 0.0];

        let mut to_pcm = Converter::new(Format::Pcm16, 1024);
        assert!(to_pcm.open(stereo(Format::Linear)));

        let mut buf = SampleBuf::with_size(2, 5);
        buf.plane_mut(0).copy_from_slice(&samples_l);
        buf.plane_mut(1).copy_from_slice(&samples_r);
        let mut input = Chunk::new();
        input.set_linear(buf, 5);

        let mut pcm = Chunk::new();
        assert!(to_pcm.process(&mut input, &mut pcm).unwrap());
        assert_eq!(pcm.raw().len(), 5 * 2 * 2);

        let mut to_linear = Converter::new(Format::Linear, 1024);
        assert!(to_linear.open(stereo(Format::Pcm16)));

        let mut out = Chunk::new();
        assert!(to_linear.process(&mut pcm, &mut out).unwrap());
        assert_eq!(out.plane(0), &samples_l);
        assert_eq!(out.plane(1), &samples_r);
    }

    #[test]
    fn verify_pcm24_partial_frames() {
        // 24-bit stereo frames are 6 bytes; split the byte stream mid-frame and verify the
        // partial sample is carried across the boundary.
        let samples: Vec<f64> = (0..16).map(|i| f64::from(i * 1000 - 8000)).collect();

        let mut to_pcm = Converter::new(Format::Pcm24, 1024);
        assert!(to_pcm.open(stereo(Format::Linear)));

        let mut buf = SampleBuf::with_size(2, 16);
        buf.plane_mut(0).copy_from_slice(&samples);
        buf.plane_mut(1).copy_from_slice(&samples);
        let mut input = Chunk::new();
        input.set_linear(buf, 16);

        let mut pcm = Chunk::new();
        assert!(to_pcm.process(&mut input, &mut pcm).unwrap());
        let bytes = pcm.raw().to_vec();
        assert_eq!(bytes.len(), 16 * 6);

        // Feed the bytes in chunks of 7 (never frame aligned).
        let mut to_linear = Converter::new(Format::Linear, 1024);
        assert!(to_linear.open(stereo(Format::Pcm24)));

        let mut collected = Vec::new();
        for piece in bytes.chunks(7) {
            let mut chunk = Chunk::new();
            chunk.set_raw(piece.to_vec(), piece.len());
            let mut out = Chunk::new();
            while to_linear.process(&mut chunk, &mut out).unwrap() {
                collected.extend_from_slice(out.plane(0));
            }
        }
        assert_eq!(collected, samples);
    }

    #[test]
    fn verify_channel_order() {
        // Swap left and right while decoding.
        let mut to_linear = Converter::new(Format::Linear, 1024);
        assert!(to_linear.set_order(&[1, 0]));
        assert!(to_linear.open(stereo(Format::Pcm16)));

        // One frame: L = 100, R = -100.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&100i16.to_le_bytes());
        bytes.extend_from_slice(&(-100i16).to_le_bytes());
        let len = bytes.len();
        let mut chunk = Chunk::new();
        chunk.set_raw(bytes, len);

        let mut out = Chunk::new();
        assert!(to_linear.process(&mut chunk, &mut out).unwrap());
        assert_eq!(out.plane(0), &[-100.0]);
        assert_eq!(out.plane(1), &[100.0]);
    }

    #[test]
    fn verify_output_format() {
        let conv = Converter::new(Format::Linear, 1024);
        assert!(conv.can_open(stereo(Format::Pcm16)));
        assert!(!conv.can_open(stereo(Format::Ac3)));

        let mut conv = Converter::new(Format::Linear, 1024);
        assert!(conv.open(stereo(Format::Pcm16)));
        let out = conv.get_output();
        assert_eq!(out.format, Format::Linear);
        // The numeric scale of the samples is preserved and announced by the level.
        assert_eq!(out.level, 32768.0);
    }
}
