//! Sample width conversion
//!
//! I/Q components travel as signed little-endian integers of 8, 16 or 24
//! significant bits (24-bit components use 4 bytes on the wire). Width
//! changes are plain arithmetic shifts, no dithering.
//!
//! Narrowing floors the value, so a narrow-then-widen round trip loses at
//! most `2^(wide - narrow) - 1` per component:
//!
//! | round trip      | max error |
//! |-----------------|-----------|
//! | 24 → 16 → 24    | 255       |
//! | 16 → 8 → 16     | 255       |
//! | 24 → 8 → 24     | 65535     |
//!
//! Widening first is exact.

use crate::error::FormatError;

/// Supported component widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleWidth {
    Bits8,
    Bits16,
    Bits24,
}

impl SampleWidth {
    /// Width from a bit count
    pub fn from_bits(bits: u8) -> Result<Self, FormatError> {
        match bits {
            8 => Ok(SampleWidth::Bits8),
            16 => Ok(SampleWidth::Bits16),
            24 => Ok(SampleWidth::Bits24),
            other => Err(FormatError::UnsupportedSampleWidth(other)),
        }
    }

    /// Significant bits per component
    pub fn bits(self) -> u8 {
        match self {
            SampleWidth::Bits8 => 8,
            SampleWidth::Bits16 => 16,
            SampleWidth::Bits24 => 24,
        }
    }

    /// Bytes per component on the wire
    pub fn bytes(self) -> u8 {
        match self {
            SampleWidth::Bits8 => 1,
            SampleWidth::Bits16 => 2,
            SampleWidth::Bits24 => 4,
        }
    }

    /// Bytes per I/Q pair on the wire
    pub fn pair_bytes(self) -> usize {
        2 * self.bytes() as usize
    }

    fn min(self) -> i32 {
        -(1 << (self.bits() - 1))
    }

    fn max(self) -> i32 {
        (1 << (self.bits() - 1)) - 1
    }
}

/// One complex sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IqSample {
    pub i: i32,
    pub q: i32,
}

impl IqSample {
    pub fn new(i: i32, q: i32) -> Self {
        Self { i, q }
    }
}

#[inline]
fn scale(value: i32, src: SampleWidth, dst: SampleWidth) -> i32 {
    let (s, d) = (src.bits(), dst.bits());

    if d >= s {
        value << (d - s)
    } else {
        value >> (s - d)
    }
}

/// Convert samples between widths
pub fn convert(src: SampleWidth, dst: SampleWidth, samples: &[IqSample]) -> Vec<IqSample> {
    if src == dst {
        return samples.to_vec();
    }

    samples
        .iter()
        .map(|s| IqSample::new(scale(s.i, src, dst), scale(s.q, src, dst)))
        .collect()
}

/// Convert samples between widths given as bit counts
pub fn convert_bits(src_bits: u8, dst_bits: u8, samples: &[IqSample]) -> Result<Vec<IqSample>, FormatError> {
    let src = SampleWidth::from_bits(src_bits)?;
    let dst = SampleWidth::from_bits(dst_bits)?;
    Ok(convert(src, dst, samples))
}

/// Append samples to `out` in wire layout, saturating to the width's range
pub fn pack(width: SampleWidth, samples: &[IqSample], out: &mut Vec<u8>) {
    out.reserve(samples.len() * width.pair_bytes());

    for s in samples {
        for v in [s.i, s.q] {
            let v = v.clamp(width.min(), width.max());
            match width {
                SampleWidth::Bits8 => out.push(v as i8 as u8),
                SampleWidth::Bits16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
                SampleWidth::Bits24 => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
    }
}

/// Append samples parsed from wire layout; a trailing partial pair is ignored
pub fn unpack(width: SampleWidth, data: &[u8], out: &mut Vec<IqSample>) {
    let pair = width.pair_bytes();
    out.reserve(data.len() / pair);

    for chunk in data.chunks_exact(pair) {
        let sample = match width {
            SampleWidth::Bits8 => IqSample::new(chunk[0] as i8 as i32, chunk[1] as i8 as i32),
            SampleWidth::Bits16 => IqSample::new(
                i16::from_le_bytes([chunk[0], chunk[1]]) as i32,
                i16::from_le_bytes([chunk[2], chunk[3]]) as i32,
            ),
            SampleWidth::Bits24 => IqSample::new(
                i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                i32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            ),
        };
        out.push(sample);
    }
}

/// Wire-to-output converter with a reusable buffer
///
/// Built when the stream or output width changes, so an unsupported width
/// is reported then and never while samples flow.
pub struct SampleConverter {
    wire: SampleWidth,
    output: SampleWidth,
    buffer: Vec<IqSample>,
}

impl SampleConverter {
    pub fn new(wire_bits: u8, output_bits: u8) -> Result<Self, FormatError> {
        Ok(Self {
            wire: SampleWidth::from_bits(wire_bits)?,
            output: SampleWidth::from_bits(output_bits)?,
            buffer: Vec::new(),
        })
    }

    /// Parse wire bytes and rescale them to the output width
    pub fn convert(&mut self, data: &[u8]) -> &[IqSample] {
        self.buffer.clear();
        unpack(self.wire, data, &mut self.buffer);

        if self.wire != self.output {
            for s in self.buffer.iter_mut() {
                s.i = scale(s.i, self.wire, self.output);
                s.q = scale(s.q, self.wire, self.output);
            }
        }

        &self.buffer
    }

    pub fn wire_width(&self) -> SampleWidth {
        self.wire
    }

    pub fn output_width(&self) -> SampleWidth {
        self.output
    }
}
