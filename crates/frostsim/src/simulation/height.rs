//! Padded height field and its wave stepper.
//!
//! Both grids are `(W + 2) × (H + 2)` row-major arrays. The one-cell ghost
//! border lets the stencil read neighbours without bounds checks; it is
//! never simulated and is refreshed by edge replication instead.

use super::kernel::{laplacian, wave_update, WaveParams};
use crate::error::{FrostError, Result};

/// Interior dimensions of the simulation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

impl GridSize {
    /// Create a grid size. Both dimensions must be positive.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(FrostError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }

    /// Grid for a screen: fixed short edge, width following the aspect ratio.
    pub fn for_screen(screen_width: u32, screen_height: u32, short_edge: u32) -> Result<Self> {
        if screen_width == 0 || screen_height == 0 {
            return Err(FrostError::InvalidDimensions {
                width: screen_width,
                height: screen_height,
            });
        }
        let width = (short_edge as u64 * screen_width as u64 / screen_height as u64).max(1);
        let width = u32::try_from(width).map_err(|_| FrostError::InvalidDimensions {
            width: screen_width,
            height: screen_height,
        })?;
        Self::new(width, short_edge)
    }

    /// Number of interior cells.
    pub fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether `(x, y)` addresses an interior cell.
    #[inline(always)]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }
}

/// Allocate a zeroed grid, reporting allocation failure instead of aborting.
pub(crate) fn try_zeroed<T: Copy + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| FrostError::allocation(format!("{} ({} cells): {}", what, len, e)))?;
    data.resize(len, T::default());
    Ok(data)
}

/// Double-buffered padded height field.
pub struct HeightBuffer {
    size: GridSize,
    /// Padded row stride.
    stride: usize,
    /// Height at the current time step.
    current: Vec<f32>,
    /// Height one step older. Receives the next step in place.
    older: Vec<f32>,
}

impl HeightBuffer {
    /// Allocate a zeroed field.
    pub fn new(size: GridSize) -> Result<Self> {
        let stride = size.width as usize + 2;
        let len = stride * (size.height as usize + 2);

        Ok(Self {
            size,
            stride,
            current: try_zeroed(len, "current height grid")?,
            older: try_zeroed(len, "older height grid")?,
        })
    }

    /// Interior dimensions.
    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Padded row stride.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Padded index of interior coordinates (ghost cells at -1 and W / H).
    #[inline(always)]
    pub fn index(&self, x: i32, y: i32) -> usize {
        (y + 1) as usize * self.stride + (x + 1) as usize
    }

    /// Height of an interior or ghost cell of the current grid.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> f32 {
        self.current[self.index(x, y)]
    }

    /// Overwrite an interior cell of the current grid. Cells outside the
    /// interior are ignored.
    #[inline]
    pub fn set(&mut self, x: i32, y: i32, value: f32) {
        if self.size.contains(x, y) {
            let idx = self.index(x, y);
            self.current[idx] = value;
        }
    }

    /// The padded current grid.
    pub fn current(&self) -> &[f32] {
        &self.current
    }

    /// The padded older grid.
    pub fn older(&self) -> &[f32] {
        &self.older
    }

    /// Copy of the interior of the current grid, row-major.
    pub fn interior(&self) -> Vec<f32> {
        let width = self.size.width as usize;
        let mut out = Vec::with_capacity(self.size.cells());
        for y in 0..self.size.height as i32 {
            let start = self.index(0, y);
            out.extend_from_slice(&self.current[start..start + width]);
        }
        out
    }

    /// Largest absolute height.
    pub fn max_abs(&self) -> f32 {
        self.current.iter().map(|h| h.abs()).fold(0.0, f32::max)
    }

    /// Zero both grids.
    pub fn clear(&mut self) {
        self.current.fill(0.0);
        self.older.fill(0.0);
    }

    /// Advance the field by one tick.
    ///
    /// The new field is written over the older grid, its ghost border is
    /// replicated and the grids swap roles.
    pub fn step(&mut self, params: &WaveParams) {
        // Stimuli may have touched edge cells since the last replication
        replicate_border(&mut self.current, self.stride, self.size);

        let stride = self.stride;
        let width = self.size.width as usize;
        let height = self.size.height as usize;
        let current = &self.current;

        for y in 1..=height {
            let row = y * stride;
            let older_row = &mut self.older[row..row + stride];

            for x in 1..=width {
                let idx = row + x;
                let center = current[idx];
                let lap = laplacian(
                    center,
                    current[idx - stride],
                    current[idx + stride],
                    current[idx - 1],
                    current[idx + 1],
                );
                older_row[x] = wave_update(center, older_row[x], lap, params);
            }
        }

        replicate_border(&mut self.older, self.stride, self.size);
        std::mem::swap(&mut self.current, &mut self.older);
    }
}

/// Copy the outermost interior rows and columns into the ghost border.
fn replicate_border(grid: &mut [f32], stride: usize, size: GridSize) {
    let rows = size.height as usize + 2;

    // Top and bottom rows, ghost corners included
    grid.copy_within(stride..2 * stride, 0);
    grid.copy_within((rows - 2) * stride..(rows - 1) * stride, (rows - 1) * stride);

    for y in 0..rows {
        let row = y * stride;
        grid[row] = grid[row + 1];
        grid[row + stride - 1] = grid[row + stride - 2];
    }
}
