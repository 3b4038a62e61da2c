//! Dense 2D sample grids.

use serde::Serialize;

use crate::error::{ImageError, Result};

// =============================================================================
// DataType
// =============================================================================

/// Scalar element type of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Float32,
}

impl DataType {
    pub const fn name(&self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::UInt8 => "uint8",
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Float32 => "float32",
        }
    }

    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Float32 => 4,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "int8" | "i8" | "schar" => Some(DataType::Int8),
            "uint8" | "u8" | "uchar" => Some(DataType::UInt8),
            "int16" | "i16" | "short" => Some(DataType::Int16),
            "uint16" | "u16" | "ushort" => Some(DataType::UInt16),
            "float32" | "f32" | "float" => Some(DataType::Float32),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// FrameData
// =============================================================================

/// Typed sample buffer, row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Float32(Vec<f32>),
}

impl FrameData {
    pub fn len(&self) -> usize {
        match self {
            FrameData::Int8(v) => v.len(),
            FrameData::UInt8(v) => v.len(),
            FrameData::Int16(v) => v.len(),
            FrameData::UInt16(v) => v.len(),
            FrameData::Float32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            FrameData::Int8(_) => DataType::Int8,
            FrameData::UInt8(_) => DataType::UInt8,
            FrameData::Int16(_) => DataType::Int16,
            FrameData::UInt16(_) => DataType::UInt16,
            FrameData::Float32(_) => DataType::Float32,
        }
    }

    pub fn zeros(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::Int8 => FrameData::Int8(vec![0; len]),
            DataType::UInt8 => FrameData::UInt8(vec![0; len]),
            DataType::Int16 => FrameData::Int16(vec![0; len]),
            DataType::UInt16 => FrameData::UInt16(vec![0; len]),
            DataType::Float32 => FrameData::Float32(vec![0.0; len]),
        }
    }

    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            FrameData::Int8(v) => v.iter().map(|&s| s as f32).collect(),
            FrameData::UInt8(v) => v.iter().map(|&s| s as f32).collect(),
            FrameData::Int16(v) => v.iter().map(|&s| s as f32).collect(),
            FrameData::UInt16(v) => v.iter().map(|&s| s as f32).collect(),
            FrameData::Float32(v) => v.clone(),
        }
    }

    /// Cast `samples` to `data_type`, rounding and saturating for integer targets.
    pub fn from_f32(samples: &[f32], data_type: DataType) -> Self {
        // float-to-int `as` saturates and maps NaN to 0
        match data_type {
            DataType::Int8 => FrameData::Int8(samples.iter().map(|s| s.round() as i8).collect()),
            DataType::UInt8 => FrameData::UInt8(samples.iter().map(|s| s.round() as u8).collect()),
            DataType::Int16 => {
                FrameData::Int16(samples.iter().map(|s| s.round() as i16).collect())
            }
            DataType::UInt16 => {
                FrameData::UInt16(samples.iter().map(|s| s.round() as u16).collect())
            }
            DataType::Float32 => FrameData::Float32(samples.to_vec()),
        }
    }

    /// Little-endian byte encoding of the samples.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.data_type().bytes_per_sample());
        match self {
            FrameData::Int8(v) => out.extend(v.iter().map(|&s| s as u8)),
            FrameData::UInt8(v) => out.extend_from_slice(v),
            FrameData::Int16(v) => v.iter().for_each(|s| out.extend_from_slice(&s.to_le_bytes())),
            FrameData::UInt16(v) => v.iter().for_each(|s| out.extend_from_slice(&s.to_le_bytes())),
            FrameData::Float32(v) => v.iter().for_each(|s| out.extend_from_slice(&s.to_le_bytes())),
        }
        out
    }

    /// Decode little-endian samples. `bytes` must hold a whole number of samples.
    pub fn from_le_bytes(bytes: &[u8], data_type: DataType) -> Self {
        match data_type {
            DataType::Int8 => FrameData::Int8(bytes.iter().map(|&b| b as i8).collect()),
            DataType::UInt8 => FrameData::UInt8(bytes.to_vec()),
            DataType::Int16 => FrameData::Int16(
                bytes
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            DataType::UInt16 => FrameData::UInt16(
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            DataType::Float32 => FrameData::Float32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
        }
    }
}

impl From<Vec<i8>> for FrameData {
    fn from(v: Vec<i8>) -> Self {
        FrameData::Int8(v)
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(v: Vec<u8>) -> Self {
        FrameData::UInt8(v)
    }
}

impl From<Vec<i16>> for FrameData {
    fn from(v: Vec<i16>) -> Self {
        FrameData::Int16(v)
    }
}

impl From<Vec<u16>> for FrameData {
    fn from(v: Vec<u16>) -> Self {
        FrameData::UInt16(v)
    }
}

impl From<Vec<f32>> for FrameData {
    fn from(v: Vec<f32>) -> Self {
        FrameData::Float32(v)
    }
}

// =============================================================================
// Frame
// =============================================================================

/// Summary statistics of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub rms: f32,
}

/// One decoded 2D sample grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: usize,
    height: usize,
    data: FrameData,
}

impl Frame {
    /// Build a frame, checking that `data` holds `width * height` samples.
    pub fn new(width: usize, height: usize, data: impl Into<FrameData>) -> Result<Self> {
        let data = data.into();
        if data.len() != width * height {
            return Err(ImageError::Validation(format!(
                "{}x{} frame needs {} samples, got {}",
                width,
                height,
                width * height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn zeros(width: usize, height: usize, data_type: DataType) -> Self {
        Self {
            width,
            height,
            data: FrameData::zeros(data_type, width * height),
        }
    }

    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: FrameData::Float32(vec![value; width * height]),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &FrameData {
        &self.data
    }

    pub fn into_data(self) -> FrameData {
        self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.data.to_f32()
    }

    /// Sample at column `x`, row `y`, as f32.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y * self.width + x;
        Some(match &self.data {
            FrameData::Int8(v) => v[i] as f32,
            FrameData::UInt8(v) => v[i] as f32,
            FrameData::Int16(v) => v[i] as f32,
            FrameData::UInt16(v) => v[i] as f32,
            FrameData::Float32(v) => v[i],
        })
    }

    /// Convert samples to another element type (round + saturate for integers).
    pub fn convert(&self, data_type: DataType) -> Frame {
        if data_type == self.data_type() {
            return self.clone();
        }
        Frame {
            width: self.width,
            height: self.height,
            data: FrameData::from_f32(&self.to_f32(), data_type),
        }
    }

    /// Apply `f` to every sample; the result is float32.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            data: FrameData::Float32(self.to_f32().into_iter().map(f).collect()),
        }
    }

    /// Accumulate `other` into this frame sample by sample. The result is float32.
    pub fn add_assign(&mut self, other: &Frame) -> Result<()> {
        self.ensure_same_size(other)?;
        let rhs = other.to_f32();
        match &mut self.data {
            FrameData::Float32(acc) => acc.iter_mut().zip(rhs).for_each(|(a, b)| *a += b),
            data => {
                let summed = data.to_f32().into_iter().zip(rhs).map(|(a, b)| a + b).collect();
                *data = FrameData::Float32(summed);
            }
        }
        Ok(())
    }

    /// Multiply every sample by `factor`; the result is float32.
    pub fn scale(&self, factor: f32) -> Frame {
        self.map(|s| s * factor)
    }

    pub fn ensure_same_size(&self, other: &Frame) -> Result<()> {
        if self.size() != other.size() {
            return Err(ImageError::ShapeMismatch {
                expected: self.size(),
                actual: other.size(),
            });
        }
        Ok(())
    }

    /// Min, max, mean and root-mean-square deviation of the samples.
    pub fn stats(&self) -> FrameStats {
        let samples = self.to_f32();
        if samples.is_empty() {
            return FrameStats {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                rms: 0.0,
            };
        }

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0f64;
        for &s in &samples {
            min = min.min(s);
            max = max.max(s);
            sum += s as f64;
        }
        let mean = sum / samples.len() as f64;
        let var = samples
            .iter()
            .map(|&s| (s as f64 - mean).powi(2))
            .sum::<f64>()
            / samples.len() as f64;

        FrameStats {
            min,
            max,
            mean: mean as f32,
            rms: var.sqrt() as f32,
        }
    }

    /// Min/max stretch to 0..=255, one byte per sample.
    pub fn to_u8_stretched(&self) -> Vec<u8> {
        let samples = self.to_f32();
        let FrameStats { min, max, .. } = self.stats();
        let range = max - min;
        if range <= 0.0 || !range.is_finite() {
            return vec![0; samples.len()];
        }
        samples
            .iter()
            .map(|&s| ((s - min) / range * 255.0).round() as u8)
            .collect()
    }

    /// Resample through a 2x3 affine matrix `[a, b, c, d, e, f]` mapping source
    /// `(x, y)` to destination `(a*x + b*y + c, d*x + e*y + f)`.
    ///
    /// Output has the same size, float32 samples, bilinear interpolation, zero
    /// outside the source.
    pub fn warp_affine(&self, m: &[f32; 6]) -> Result<Frame> {
        let m_inv = invert_affine_transform(m)?;
        let src = self.to_f32();
        let (cols, rows) = (self.width, self.height);
        let mut dst = vec![0f32; cols * rows];

        for y in 0..rows {
            for x in 0..cols {
                let (u, v) = transform_point(x as f32, y as f32, &m_inv);
                if u >= 0.0 && u < cols as f32 && v >= 0.0 && v < rows as f32 {
                    dst[y * cols + x] = bilinear(&src, cols, rows, u, v);
                }
            }
        }

        Frame::new(cols, rows, dst)
    }
}

fn invert_affine_transform(m: &[f32; 6]) -> Result<[f32; 6]> {
    let (a, b, c, d, e, f) = (m[0], m[1], m[2], m[3], m[4], m[5]);
    let determinant = a * e - b * d;
    if determinant == 0.0 || !determinant.is_finite() {
        return Err(ImageError::Validation(format!(
            "affine matrix {:?} is not invertible",
            m
        )));
    }
    let inv = 1.0 / determinant;

    let new_a = e * inv;
    let new_b = -b * inv;
    let new_d = -d * inv;
    let new_e = a * inv;
    let new_c = -(new_a * c + new_b * f);
    let new_f = -(new_d * c + new_e * f);

    Ok([new_a, new_b, new_c, new_d, new_e, new_f])
}

fn transform_point(x: f32, y: f32, m: &[f32; 6]) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

fn bilinear(data: &[f32], cols: usize, rows: usize, u: f32, v: f32) -> f32 {
    let iu0 = (u.trunc() as usize).min(cols - 1);
    let iv0 = (v.trunc() as usize).min(rows - 1);
    let iu1 = if iu0 + 1 < cols { iu0 + 1 } else { iu0 };
    let iv1 = if iv0 + 1 < rows { iv0 + 1 } else { iv0 };

    let (fu, fv) = (u.fract(), v.fract());

    data[iv0 * cols + iu0] * (1.0 - fu) * (1.0 - fv)
        + data[iv0 * cols + iu1] * fu * (1.0 - fv)
        + data[iv1 * cols + iu0] * (1.0 - fu) * fv
        + data[iv1 * cols + iu1] * fu * fv
}

// =============================================================================
// Tests
// =============================================================================
