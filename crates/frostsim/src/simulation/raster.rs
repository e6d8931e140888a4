//! Stimulus primitives and their rasterization to grid cells.
//!
//! Coordinates are in simulation cells, `(0, 0)` being the top-left
//! interior cell. Every primitive overwrites the cells it covers with the
//! stimulus magnitude; cells outside the interior are discarded.

use super::height::{GridSize, HeightBuffer};
use crate::error::{FrostError, Result};

/// Largest accepted coordinate magnitude.
///
/// Keeps edge functions inside `i64` and every vertex exactly
/// representable as `f32`.
pub const COORD_LIMIT: i32 = 1 << 20;

/// Integer cell (or screen pixel) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl Point {
    /// Create a point.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Primitive kind of a stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// 3×3 splat around each point.
    Point,
    /// Independent segments from consecutive point pairs.
    Line,
    /// Filled triangles from consecutive point triples.
    Triangle,
}

impl Primitive {
    /// Points consumed per primitive.
    pub fn arity(self) -> usize {
        match self {
            Primitive::Point => 1,
            Primitive::Line => 2,
            Primitive::Triangle => 3,
        }
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Primitive::Point => write!(f, "point"),
            Primitive::Line => write!(f, "line"),
            Primitive::Triangle => write!(f, "triangle"),
        }
    }
}

/// One validated stimulus.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusEvent {
    primitive: Primitive,
    points: Vec<Point>,
    magnitude: f32,
}

impl StimulusEvent {
    /// Create a stimulus, checking the point count and magnitude.
    pub fn new(primitive: Primitive, points: Vec<Point>, magnitude: f32) -> Result<Self> {
        if points.is_empty() || points.len() % primitive.arity() != 0 {
            return Err(FrostError::stimulus(format!(
                "{} stimulus needs a positive multiple of {} points, got {}",
                primitive,
                primitive.arity(),
                points.len()
            )));
        }
        if let Some(p) = points
            .iter()
            .find(|p| p.x.abs() > COORD_LIMIT || p.y.abs() > COORD_LIMIT)
        {
            return Err(FrostError::stimulus(format!(
                "point ({}, {}) beyond ±{}",
                p.x, p.y, COORD_LIMIT
            )));
        }
        if !magnitude.is_finite() || !(-1.0..=1.0).contains(&magnitude) {
            return Err(FrostError::stimulus(format!(
                "magnitude {} outside [-1, 1]",
                magnitude
            )));
        }

        Ok(Self {
            primitive,
            points,
            magnitude,
        })
    }

    /// Single point splat.
    pub fn point(p: Point, magnitude: f32) -> Result<Self> {
        Self::new(Primitive::Point, vec![p], magnitude)
    }

    /// Single line segment.
    pub fn line(from: Point, to: Point, magnitude: f32) -> Result<Self> {
        Self::new(Primitive::Line, vec![from, to], magnitude)
    }

    /// Single filled triangle.
    pub fn triangle(a: Point, b: Point, c: Point, magnitude: f32) -> Result<Self> {
        Self::new(Primitive::Triangle, vec![a, b, c], magnitude)
    }

    /// Primitive kind.
    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    /// Vertices.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Value written into covered cells.
    pub fn magnitude(&self) -> f32 {
        self.magnitude
    }

    /// Whether the stimulus should keep the simulation awake.
    pub fn is_visible(&self) -> bool {
        self.magnitude != 0.0
    }

    /// Visit every interior cell covered by the stimulus, in primitive order.
    pub fn for_each_cell(&self, size: GridSize, mut visit: impl FnMut(i32, i32)) {
        let mut clipped = |x: i32, y: i32| {
            if size.contains(x, y) {
                visit(x, y);
            }
        };

        match self.primitive {
            Primitive::Point => {
                for p in &self.points {
                    splat_cells(*p, &mut clipped);
                }
            }
            Primitive::Line => {
                for pair in self.points.chunks_exact(2) {
                    line_cells(pair[0], pair[1], &mut clipped);
                }
            }
            Primitive::Triangle => {
                for tri in self.points.chunks_exact(3) {
                    triangle_cells(tri[0], tri[1], tri[2], size, &mut clipped);
                }
            }
        }
    }
}

/// Write a stimulus into the current grid of a height buffer.
pub fn rasterize(buffer: &mut HeightBuffer, event: &StimulusEvent) {
    let magnitude = event.magnitude();
    let size = buffer.size();
    event.for_each_cell(size, |x, y| buffer.set(x, y, magnitude));
}

/// The point and its 8 neighbours.
pub fn splat_cells(p: Point, visit: &mut impl FnMut(i32, i32)) {
    for dy in -1..=1 {
        for dx in -1..=1 {
            visit(p.x + dx, p.y + dy);
        }
    }
}

/// Bresenham segment, both endpoints included.
///
/// Steep segments are walked along y so every row gets exactly one cell,
/// and endpoints are ordered so the covered set does not depend on the
/// segment direction.
pub fn line_cells(from: Point, to: Point, visit: &mut impl FnMut(i32, i32)) {
    let (mut x1, mut y1, mut x2, mut y2) = (from.x, from.y, to.x, to.y);

    let steep = (y2 - y1).abs() > (x2 - x1).abs();
    if steep {
        std::mem::swap(&mut x1, &mut y1);
        std::mem::swap(&mut x2, &mut y2);
    }
    if x1 > x2 {
        std::mem::swap(&mut x1, &mut x2);
        std::mem::swap(&mut y1, &mut y2);
    }

    let delta_x = x2 - x1;
    let delta_y = (y2 - y1).abs();
    let y_step = if y1 < y2 { 1 } else { -1 };

    let mut error = 0;
    let mut y = y1;
    for x in x1..=x2 {
        if steep {
            visit(y, x);
        } else {
            visit(x, y);
        }

        error += delta_y;
        if 2 * error >= delta_x {
            y += y_step;
            error -= delta_x;
        }
    }
}

/// Filled triangle with vertices at cell centres.
///
/// A cell is covered when its coordinates lie strictly inside the triangle,
/// or on a top or left edge. This is the rule GPU rasterizers apply to
/// pixel centres, so both backends cover the same cells.
pub fn triangle_cells(
    a: Point,
    b: Point,
    c: Point,
    size: GridSize,
    visit: &mut impl FnMut(i32, i32),
) {
    let (a, mut b, mut c) = (a, b, c);
    let area = edge(a, b, c);
    if area == 0 {
        return;
    }
    if area < 0 {
        std::mem::swap(&mut b, &mut c);
    }

    let min_x = a.x.min(b.x).min(c.x).max(0);
    let min_y = a.y.min(b.y).min(c.y).max(0);
    let max_x = a.x.max(b.x).max(c.x).min(size.width as i32 - 1);
    let max_y = a.y.max(b.y).max(c.y).min(size.height as i32 - 1);

    let edges = [(a, b), (b, c), (c, a)];
    let top_left = edges.map(|(from, to)| is_top_left(from, to));

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = Point::new(x, y);
            let inside = edges.iter().zip(top_left).all(|(&(from, to), tl)| {
                let w = edge(from, to, p);
                w > 0 || (w == 0 && tl)
            });
            if inside {
                visit(x, y);
            }
        }
    }
}

/// Twice the signed area of `(a, b, p)`; positive when `p` is on the
/// interior side of `a → b` for a positively wound triangle.
#[inline]
fn edge(a: Point, b: Point, p: Point) -> i64 {
    (b.x - a.x) as i64 * (p.y - a.y) as i64 - (b.y - a.y) as i64 * (p.x - a.x) as i64
}

/// Top edge (horizontal, interior below) or left edge (interior to the
/// right), with y growing downwards.
#[inline]
fn is_top_left(from: Point, to: Point) -> bool {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    (dy == 0 && dx > 0) || dy < 0
}
