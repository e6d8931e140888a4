//! Host-side stimulus generators.
//!
//! Gestures work in screen pixels and own no event loop. The host feeds
//! them input and timing and forwards what they yield to
//! [`FrostSimulation::inject_screen`](crate::FrostSimulation::inject_screen).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::StimulusConfig;
use crate::error::Result;
use crate::simulation::{GridSize, Point, Primitive, StimulusEvent, COORD_LIMIT};

/// Screen to simulation scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenMapping {
    /// Screen width in pixels.
    pub screen_width: u32,
    /// Screen height in pixels.
    pub screen_height: u32,
    /// Grid the screen maps onto.
    pub grid: GridSize,
}

impl ScreenMapping {
    /// Create a mapping.
    pub fn new(screen_width: u32, screen_height: u32, grid: GridSize) -> Self {
        Self {
            screen_width,
            screen_height,
            grid,
        }
    }

    /// Scale a screen pixel to a grid cell (`x·gridW/screenW`, floored).
    pub fn to_grid(&self, p: Point) -> Point {
        let scale = |v: i32, cells: u32, pixels: u32| {
            let scaled = (v as i64 * cells as i64).div_euclid(pixels.max(1) as i64);
            scaled.clamp(-(COORD_LIMIT as i64), COORD_LIMIT as i64) as i32
        };
        Point::new(
            scale(p.x, self.grid.width, self.screen_width),
            scale(p.y, self.grid.height, self.screen_height),
        )
    }

    /// Scale a screen stimulus into a validated simulation stimulus.
    pub fn to_event(&self, stimulus: &ScreenStimulus) -> Result<StimulusEvent> {
        StimulusEvent::new(
            stimulus.primitive,
            stimulus.points.iter().map(|p| self.to_grid(*p)).collect(),
            stimulus.magnitude,
        )
    }
}

/// Stimulus in screen coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenStimulus {
    /// Primitive kind.
    pub primitive: Primitive,
    /// Vertices in screen pixels.
    pub points: Vec<Point>,
    /// Value written into covered cells.
    pub magnitude: f32,
}

impl ScreenStimulus {
    /// Point splat.
    pub fn point(at: Point, magnitude: f32) -> Self {
        Self {
            primitive: Primitive::Point,
            points: vec![at],
            magnitude,
        }
    }

    /// Line segment.
    pub fn line(from: Point, to: Point, magnitude: f32) -> Self {
        Self {
            primitive: Primitive::Line,
            points: vec![from, to],
            magnitude,
        }
    }

    /// Filled triangle.
    pub fn triangle(a: Point, b: Point, c: Point, magnitude: f32) -> Self {
        Self {
            primitive: Primitive::Triangle,
            points: vec![a, b, c],
            magnitude,
        }
    }
}

/// Pointer drag state of one simulation.
#[derive(Debug, Clone)]
pub struct PointerStroke {
    press: f32,
    drag: f32,
    last: Option<Point>,
}

impl PointerStroke {
    /// Create a released pointer.
    pub fn new(config: &StimulusConfig) -> Self {
        Self {
            press: config.press,
            drag: config.drag,
            last: None,
        }
    }

    /// Button pressed: splat under the pointer.
    pub fn press(&mut self, at: Point) -> ScreenStimulus {
        self.last = Some(at);
        ScreenStimulus::point(at, self.press)
    }

    /// Pointer moved: a stroke from the previous position while pressed.
    pub fn motion(&mut self, to: Point) -> Option<ScreenStimulus> {
        let from = self.last?;
        self.last = Some(to);
        Some(ScreenStimulus::line(from, to, self.drag))
    }

    /// Button released.
    pub fn release(&mut self) {
        self.last = None;
    }

    /// Whether a stroke is in progress.
    pub fn is_pressed(&self) -> bool {
        self.last.is_some()
    }
}

/// Wedge sweeping between 0° and 180° around the bottom centre.
#[derive(Debug, Clone)]
pub struct Wiper {
    /// Degrees, 0 = pointing left, 180 = pointing right.
    angle: f32,
    /// Signed speed in degrees per 20 ms; zero until the first kick.
    velocity: f32,
    speed: f32,
    magnitude: f32,
    interval_ms: f32,
    since_kick_ms: f32,
}

impl Wiper {
    /// Resting wiper at 0°.
    pub fn new(config: &StimulusConfig) -> Self {
        Self {
            angle: 0.0,
            velocity: 0.0,
            speed: config.wiper_speed,
            magnitude: config.wipe,
            interval_ms: config.wiper_interval_ms as f32,
            since_kick_ms: 0.0,
        }
    }

    /// Current angle in degrees.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Start a sweep if resting at either end.
    pub fn kick(&mut self) {
        if self.angle == 0.0 {
            self.velocity = self.speed;
        } else if self.angle == 180.0 {
            self.velocity = -self.speed;
        }
    }

    /// Drive the kick timer and sweep. The wiper only moves while the
    /// simulation is active.
    pub fn poll(
        &mut self,
        delta_ms: f32,
        active: bool,
        screen: &ScreenMapping,
    ) -> Option<ScreenStimulus> {
        self.since_kick_ms += delta_ms;
        if self.since_kick_ms >= self.interval_ms {
            self.since_kick_ms = 0.0;
            if active {
                self.kick();
            }
        }

        if !active {
            return None;
        }
        self.advance(delta_ms, screen)
    }

    /// Move by `velocity·delta/20` degrees and return the wedge swept.
    pub fn advance(&mut self, delta_ms: f32, screen: &ScreenMapping) -> Option<ScreenStimulus> {
        let step = self.velocity * delta_ms / 20.0;

        let (from, to) = if self.velocity > 0.0 {
            if self.angle >= 180.0 {
                return None;
            }
            let from = self.angle;
            self.angle = (self.angle + step).min(180.0);
            (from, self.angle)
        } else {
            if self.angle <= 0.0 {
                return None;
            }
            let to = self.angle;
            self.angle = (self.angle + step).max(0.0);
            (self.angle, to)
        };

        let w = screen.screen_width as i32;
        let h = screen.screen_height as i32;
        let pivot = Point::new(w / 2, h);

        // Where the wiper edge at `angle` crosses the top of the screen
        let crossing = |angle: f32| {
            let x = (w / 2) as f32 - h as f32 / angle.to_radians().tan();
            let limit = COORD_LIMIT as f32;
            Point::new(x.clamp(-limit, limit) as i32, 0)
        };

        let trailing = if from > 0.0 {
            crossing(from)
        } else {
            Point::new(0, h)
        };
        let leading = if to < 180.0 {
            crossing(to)
        } else {
            Point::new(w, h)
        };

        Some(ScreenStimulus::triangle(
            leading,
            pivot,
            trailing,
            self.magnitude,
        ))
    }
}

/// Random drops at a fixed rate.
#[derive(Debug, Clone)]
pub struct Rain {
    rng: StdRng,
    max: f32,
    interval_ms: f32,
    elapsed_ms: f32,
}

impl Rain {
    /// Seeded drop generator.
    pub fn new(config: &StimulusConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max: config.rain_max,
            interval_ms: config.rain_interval_ms.max(1) as f32,
            elapsed_ms: 0.0,
        }
    }

    /// One drop at a uniformly random screen position.
    pub fn drop_at(&mut self, screen: &ScreenMapping) -> ScreenStimulus {
        let x = self.rng.gen_range(0..screen.screen_width.max(1)) as i32;
        let y = self.rng.gen_range(0..screen.screen_height.max(1)) as i32;
        let magnitude = self.max * self.rng.gen::<f32>();
        ScreenStimulus::point(Point::new(x, y), magnitude)
    }

    /// Drops due after `delta_ms` more milliseconds.
    pub fn poll(&mut self, delta_ms: f32, screen: &ScreenMapping) -> Vec<ScreenStimulus> {
        self.elapsed_ms += delta_ms.max(0.0);
        let mut drops = Vec::new();
        while self.elapsed_ms >= self.interval_ms {
            self.elapsed_ms -= self.interval_ms;
            drops.push(self.drop_at(screen));
        }
        drops
    }
}

/// Outer frame of a window, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowFrame {
    /// Client area left edge.
    pub x: i32,
    /// Client area top edge.
    pub y: i32,
    /// Client area width.
    pub width: i32,
    /// Left decoration width.
    pub left: i32,
    /// Right decoration width.
    pub right: i32,
    /// Title bar height.
    pub top: i32,
}

/// Scripted point, at the screen centre unless given.
pub fn point_default(
    config: &StimulusConfig,
    screen: &ScreenMapping,
    at: Option<Point>,
) -> ScreenStimulus {
    let centre = Point::new(
        screen.screen_width as i32 / 2,
        screen.screen_height as i32 / 2,
    );
    ScreenStimulus::point(at.unwrap_or(centre), config.point)
}

/// Scripted line across the middle half of the screen at mid-height.
pub fn line_default(config: &StimulusConfig, screen: &ScreenMapping) -> ScreenStimulus {
    let w = screen.screen_width as i32;
    let y = screen.screen_height as i32 / 2;
    ScreenStimulus::line(Point::new(w / 4, y), Point::new(w - w / 4, y), config.line)
}

/// Line through the middle of a window's title bar, frame to frame.
pub fn title_line(config: &StimulusConfig, frame: WindowFrame) -> ScreenStimulus {
    let y = frame.y - frame.top / 2;
    ScreenStimulus::line(
        Point::new(frame.x - frame.left, y),
        Point::new(frame.x + frame.width + frame.right, y),
        config.title,
    )
}
