//! Normal/height texture derived from the height field.

use super::height::{try_zeroed, GridSize, HeightBuffer};
use super::kernel::{encode_texel, unbias};
use crate::error::Result;

/// Bytes per texel.
pub const TEXEL_BYTES: usize = 4;

/// RGBA8 image of the encoded field.
///
/// | channel | content |
/// |---|---|
/// | R | inverse-length scale of the normal, biased |
/// | G | y-gradient, scaled and biased |
/// | B | x-gradient, scaled and biased |
/// | A | height clamped to `[0, 1]` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalHeightTexture {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl NormalHeightTexture {
    /// Texture of a flat, empty field.
    pub fn new(size: GridSize) -> Result<Self> {
        let mut data: Vec<u8> = try_zeroed(size.cells() * TEXEL_BYTES, "normal/height texture")?;
        let flat = encode_texel(0.0, 0.0, 0.0, 1.0).to_rgba8();
        for texel in data.chunks_exact_mut(TEXEL_BYTES) {
            texel.copy_from_slice(&flat);
        }

        Ok(Self {
            width: size.width,
            height: size.height,
            data,
        })
    }

    /// 0×0 placeholder handed out while no simulation exists.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
        }
    }

    /// Wrap raw RGBA8 rows (used for GPU readback).
    pub(crate) fn from_raw(size: GridSize, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), size.cells() * TEXEL_BYTES);
        Self {
            width: size.width,
            height: size.height,
            data,
        }
    }

    /// Width in texels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether this is the placeholder.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Tightly packed RGBA8 rows.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// One texel.
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * TEXEL_BYTES;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Decoded `(x-normal, y-normal, height)` of a texel, normals in `[-0.5, 0.5]`.
    pub fn decode(&self, x: u32, y: u32) -> (f32, f32, f32) {
        let [_, g, b, a] = self.texel(x, y);
        (unbias(b), unbias(g), a as f32 / 255.0)
    }

    /// Re-encode the whole texture from the current grid.
    ///
    /// Ghost cells must hold replicated edges, which [`HeightBuffer::step`]
    /// guarantees.
    pub fn encode_from(&mut self, field: &HeightBuffer, gain: f32) {
        debug_assert_eq!(
            field.size(),
            GridSize {
                width: self.width,
                height: self.height,
            }
        );

        let stride = field.stride();
        let heights = field.current();
        let width = self.width as usize;

        for (y, row) in self.data.chunks_exact_mut(width * TEXEL_BYTES).enumerate() {
            let base = (y + 1) * stride + 1;
            for (x, texel) in row.chunks_exact_mut(TEXEL_BYTES).enumerate() {
                let idx = base + x;
                let dx = heights[idx + 1] - heights[idx - 1];
                let dy = heights[idx + stride] - heights[idx - stride];
                texel.copy_from_slice(&encode_texel(heights[idx], dx, dy, gain).to_rgba8());
            }
        }
    }
}
